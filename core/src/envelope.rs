//! Transport envelope codec.
//!
//! An [`Envelope`] is what travels over the topic and queues: a JSON body plus a
//! flat map of string attributes. Routing and correlation data live in the
//! attributes so that subscription filters never need to parse the body.
//!
//! ```text
//! attributes: { eventType: PRODUCT_CREATED, correlationId: req-1, traceId: 1-... }
//! body:       {"id":"p1","code":"ABC12","price":99.9}
//! ```
//!
//! # Example
//!
//! ```
//! use product_audit_core::context::{RequestContext, TraceId};
//! use product_audit_core::envelope::Envelope;
//! use product_audit_core::event::{EventType, ProductEvent};
//!
//! let ctx = RequestContext::new(Some("req-1".to_string()), TraceId::new("1-abc-def"));
//! let payload = ProductEvent { id: "p1".into(), code: "ABC12".into(), price: 99.9 };
//!
//! let envelope = Envelope::encode(EventType::ProductCreated, &payload, &ctx).unwrap();
//! let decoded = envelope.decode().unwrap();
//!
//! assert_eq!(decoded.event_type, EventType::ProductCreated);
//! assert_eq!(decoded.correlation_id, "req-1");
//! assert_eq!(decoded.payload::<ProductEvent>().unwrap(), payload);
//! ```

use crate::context::RequestContext;
use crate::event::{EventType, UnknownEventType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute holding the routing discriminator.
pub const ATTR_EVENT_TYPE: &str = "eventType";
/// Attribute holding the caller-visible request id.
pub const ATTR_CORRELATION_ID: &str = "correlationId";
/// Attribute holding the distributed-trace id.
pub const ATTR_TRACE_ID: &str = "traceId";

/// Value recorded when a correlation attribute (or the message id) is absent.
pub const MISSING_ATTRIBUTE: &str = "unknown";

/// Transport attributes, keyed by attribute name.
pub type Attributes = BTreeMap<String, String>;

/// Failed to build an envelope from a payload.
#[derive(Error, Debug)]
#[error("Failed to encode envelope body: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// An envelope could not be turned into a typed event.
///
/// Every variant is structural: redelivering the same bytes cannot fix it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A mandatory attribute is missing or empty
    #[error("Missing attribute '{0}'")]
    MissingAttribute(&'static str),

    /// The event type attribute is not a known event type
    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),

    /// The body is not valid JSON or does not match the expected payload shape
    #[error("Malformed body: {0}")]
    MalformedBody(String),
}

/// Message as published to (and delivered from) the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing and correlation attributes
    pub attributes: Attributes,
    /// JSON payload
    pub body: String,
}

impl Envelope {
    /// Build an envelope around a raw body and attributes.
    #[must_use]
    pub const fn new(attributes: Attributes, body: String) -> Self {
        Self { attributes, body }
    }

    /// Serialize `payload` and attach the routing and correlation attributes.
    ///
    /// `correlationId` is written only when the context carries one.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the payload cannot be serialized to JSON.
    pub fn encode<T: Serialize>(
        event_type: EventType,
        payload: &T,
        ctx: &RequestContext,
    ) -> Result<Self, EncodeError> {
        let body = serde_json::to_string(payload)?;

        let mut attributes = Attributes::new();
        attributes.insert(ATTR_EVENT_TYPE.to_string(), event_type.as_str().to_string());
        attributes.insert(ATTR_TRACE_ID.to_string(), ctx.trace_id.as_str().to_string());
        if let Some(correlation_id) = ctx.correlation_id() {
            attributes.insert(ATTR_CORRELATION_ID.to_string(), correlation_id.to_string());
        }

        Ok(Self { attributes, body })
    }

    /// Look up a non-empty attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Raw event type attribute, if present.
    #[must_use]
    pub fn event_type_attribute(&self) -> Option<&str> {
        self.attribute(ATTR_EVENT_TYPE)
    }

    /// Parse attributes and body.
    ///
    /// Missing `correlationId` / `traceId` attributes decode to
    /// [`MISSING_ATTRIBUTE`] rather than failing: the audit trail keeps the
    /// record and marks the gap.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::MissingAttribute`] if `eventType` is absent
    /// - [`DecodeError::UnknownEventType`] if `eventType` is not recognised
    /// - [`DecodeError::MalformedBody`] if the body is not JSON
    pub fn decode(&self) -> Result<DecodedEnvelope, DecodeError> {
        let event_type = self
            .event_type_attribute()
            .ok_or(DecodeError::MissingAttribute(ATTR_EVENT_TYPE))?
            .parse::<EventType>()?;

        let body = serde_json::from_str(&self.body)
            .map_err(|e| DecodeError::MalformedBody(e.to_string()))?;

        Ok(DecodedEnvelope {
            event_type,
            correlation_id: self.attribute_or_missing(ATTR_CORRELATION_ID),
            trace_id: self.attribute_or_missing(ATTR_TRACE_ID),
            body,
        })
    }

    fn attribute_or_missing(&self, name: &str) -> String {
        self.attribute(name).unwrap_or(MISSING_ATTRIBUTE).to_string()
    }
}

/// An envelope whose attributes have been validated.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedEnvelope {
    /// Routing discriminator
    pub event_type: EventType,
    /// Request id, or [`MISSING_ATTRIBUTE`]
    pub correlation_id: String,
    /// Trace id, or [`MISSING_ATTRIBUTE`]
    pub trace_id: String,
    /// Parsed JSON body
    pub body: serde_json::Value,
}

impl DecodedEnvelope {
    /// Deserialize the body into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedBody`] if the body does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        T::deserialize(&self.body).map_err(|e| DecodeError::MalformedBody(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::TraceId;
    use crate::event::{ProductEvent, ProductFailureEvent};

    fn ctx(correlation_id: Option<&str>) -> RequestContext {
        RequestContext::new(correlation_id.map(str::to_string), TraceId::new("1-5f-abc"))
    }

    fn envelope_with(attributes: &[(&str, &str)], body: &str) -> Envelope {
        Envelope::new(
            attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body.to_string(),
        )
    }

    #[test]
    fn encode_keeps_event_type_out_of_the_body() {
        let payload = ProductEvent {
            id: "p1".to_string(),
            code: "ABC12".to_string(),
            price: 99.9,
        };
        let envelope = Envelope::encode(EventType::ProductCreated, &payload, &ctx(Some("req-1"))).unwrap();

        assert_eq!(envelope.event_type_attribute(), Some("PRODUCT_CREATED"));
        assert_eq!(envelope.attribute(ATTR_CORRELATION_ID), Some("req-1"));
        assert_eq!(envelope.attribute(ATTR_TRACE_ID), Some("1-5f-abc"));
        assert!(!envelope.body.contains("PRODUCT_CREATED"));
    }

    #[test]
    fn encode_omits_absent_correlation_id() {
        let payload = ProductFailureEvent {
            id: None,
            status: 412,
            error: "duplicate code".to_string(),
        };
        let envelope = Envelope::encode(EventType::ProductFailure, &payload, &ctx(None)).unwrap();
        assert!(!envelope.attributes.contains_key(ATTR_CORRELATION_ID));

        let decoded = envelope.decode().unwrap();
        assert_eq!(decoded.correlation_id, MISSING_ATTRIBUTE);
        assert_eq!(decoded.trace_id, "1-5f-abc");
    }

    #[test]
    fn decode_requires_event_type() {
        let envelope = envelope_with(&[(ATTR_TRACE_ID, "t")], "{}");
        assert_eq!(
            envelope.decode(),
            Err(DecodeError::MissingAttribute(ATTR_EVENT_TYPE))
        );

        let envelope = envelope_with(&[(ATTR_EVENT_TYPE, "")], "{}");
        assert_eq!(
            envelope.decode(),
            Err(DecodeError::MissingAttribute(ATTR_EVENT_TYPE))
        );
    }

    #[test]
    fn decode_rejects_unknown_event_type() {
        let envelope = envelope_with(&[(ATTR_EVENT_TYPE, "PRODUCT_ARCHIVED")], "{}");
        assert_eq!(
            envelope.decode(),
            Err(DecodeError::UnknownEventType(UnknownEventType(
                "PRODUCT_ARCHIVED".to_string()
            )))
        );
    }

    #[test]
    fn decode_rejects_non_json_body() {
        let envelope = envelope_with(&[(ATTR_EVENT_TYPE, "PRODUCT_UPDATED")], "not json");
        assert!(matches!(envelope.decode(), Err(DecodeError::MalformedBody(_))));
    }

    #[test]
    fn payload_shape_mismatch_is_malformed_body() {
        let envelope = envelope_with(&[(ATTR_EVENT_TYPE, "PRODUCT_UPDATED")], r#"{"id":"p1"}"#);
        let decoded = envelope.decode().unwrap();
        assert!(matches!(
            decoded.payload::<ProductEvent>(),
            Err(DecodeError::MalformedBody(_))
        ));
    }
}
