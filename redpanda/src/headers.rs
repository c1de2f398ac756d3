//! Envelope ↔ Kafka record mapping.
//!
//! Envelope attributes travel as record headers and the body as the record
//! payload. Two extra headers carry transport state and never surface as
//! attributes:
//!
//! - [`HEADER_MESSAGE_ID`]: assigned once at publish and kept across redeliveries
//! - [`HEADER_RECEIVE_COUNT`]: deliveries so far, written when a message is redriven

use product_audit_core::envelope::{Attributes, Envelope};
use product_audit_core::transport::MessageId;
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};

/// Prefix reserved for transport headers.
pub const TRANSPORT_HEADER_PREFIX: &str = "x-audit-";
/// Header carrying the message id.
pub const HEADER_MESSAGE_ID: &str = "x-audit-message-id";
/// Header carrying the number of completed deliveries.
pub const HEADER_RECEIVE_COUNT: &str = "x-audit-receive-count";

/// Build record headers for `envelope`.
///
/// Attributes that collide with the reserved prefix are dropped.
pub(crate) fn encode(envelope: &Envelope, message_id: &MessageId, receive_count: u32) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new_with_capacity(envelope.attributes.len() + 2);
    for (name, value) in &envelope.attributes {
        if name.starts_with(TRANSPORT_HEADER_PREFIX) {
            continue;
        }
        headers = headers.insert(Header {
            key: name,
            value: Some(value.as_str()),
        });
    }

    headers = headers.insert(Header {
        key: HEADER_MESSAGE_ID,
        value: Some(message_id.as_str()),
    });
    if receive_count > 0 {
        let count = receive_count.to_string();
        headers = headers.insert(Header {
            key: HEADER_RECEIVE_COUNT,
            value: Some(count.as_str()),
        });
    }
    headers
}

/// A consumed record split back into transport state and envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Inbound {
    pub message_id: MessageId,
    /// Deliveries completed before this one
    pub previous_receives: u32,
    pub envelope: Envelope,
}

/// Read a consumed record.
///
/// A record without a message id header (produced outside this crate) is
/// identified by its coordinates. An unreadable receive count counts as zero.
pub(crate) fn decode<M: Message>(message: &M) -> Inbound {
    let mut attributes = Attributes::new();
    let mut message_id = None;
    let mut previous_receives = 0;

    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            let value = header
                .value
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            match header.key {
                HEADER_MESSAGE_ID => message_id = Some(MessageId::new(value)),
                HEADER_RECEIVE_COUNT => previous_receives = value.parse().unwrap_or(0),
                key if key.starts_with(TRANSPORT_HEADER_PREFIX) => {}
                key => {
                    attributes.insert(key.to_string(), value);
                }
            }
        }
    }

    let message_id = message_id.unwrap_or_else(|| {
        MessageId::new(format!(
            "{}/{}/{}",
            message.topic(),
            message.partition(),
            message.offset()
        ))
    });
    let body = message
        .payload()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();

    Inbound {
        message_id,
        previous_receives,
        envelope: Envelope::new(attributes, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use product_audit_core::envelope::{ATTR_CORRELATION_ID, ATTR_EVENT_TYPE, ATTR_TRACE_ID};
    use rdkafka::Timestamp;
    use rdkafka::message::OwnedMessage;

    fn record(headers: Option<OwnedHeaders>, payload: &str) -> OwnedMessage {
        OwnedMessage::new(
            Some(payload.as_bytes().to_vec()),
            None,
            "product-events".to_string(),
            Timestamp::NotAvailable,
            2,
            41,
            headers,
        )
    }

    fn envelope() -> Envelope {
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_EVENT_TYPE.to_string(), "PRODUCT_CREATED".to_string());
        attributes.insert(ATTR_CORRELATION_ID.to_string(), "req-1".to_string());
        attributes.insert(ATTR_TRACE_ID.to_string(), "1-abc-def".to_string());
        Envelope::new(attributes, r#"{"id":"p1","code":"ABC12","price":99.9}"#.to_string())
    }

    #[test]
    fn attributes_and_message_id_survive_a_record() {
        let envelope = envelope();
        let headers = encode(&envelope, &MessageId::new("m-1"), 0);

        let inbound = decode(&record(Some(headers), &envelope.body));

        assert_eq!(inbound.envelope, envelope);
        assert_eq!(inbound.message_id, MessageId::new("m-1"));
        assert_eq!(inbound.previous_receives, 0);
    }

    #[test]
    fn receive_count_is_carried_but_not_an_attribute() {
        let envelope = envelope();
        let headers = encode(&envelope, &MessageId::new("m-1"), 2);

        let inbound = decode(&record(Some(headers), &envelope.body));

        assert_eq!(inbound.previous_receives, 2);
        assert!(
            inbound
                .envelope
                .attributes
                .keys()
                .all(|key| !key.starts_with(TRANSPORT_HEADER_PREFIX))
        );
    }

    #[test]
    fn reserved_attribute_names_are_not_forwarded() {
        let mut envelope = envelope();
        envelope
            .attributes
            .insert(HEADER_RECEIVE_COUNT.to_string(), "99".to_string());

        let inbound = decode(&record(Some(encode(&envelope, &MessageId::new("m-1"), 0)), "{}"));

        assert_eq!(inbound.previous_receives, 0);
    }

    #[test]
    fn foreign_record_falls_back_to_coordinates() {
        let inbound = decode(&record(None, "not json"));

        assert_eq!(inbound.message_id, MessageId::new("product-events/2/41"));
        assert!(inbound.envelope.attributes.is_empty());
        assert_eq!(inbound.envelope.body, "not json");
    }
}
