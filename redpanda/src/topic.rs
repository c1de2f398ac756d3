//! Publishing side: [`RedpandaTopic`].

use crate::headers;
use product_audit_core::envelope::Envelope;
use product_audit_core::transport::{MessageId, Topic, TransportError, TransportFuture};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Default producer send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes envelopes to one Kafka topic.
///
/// Each publish gets a fresh UUID message id, carried in a header so that
/// every delivery of the message (redeliveries and dead letters included)
/// reports the same id.
///
/// # Example
///
/// ```no_run
/// use product_audit_redpanda::RedpandaTopic;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let topic = RedpandaTopic::builder()
///     .brokers("localhost:9092")
///     .topic("product-events")
///     .producer_acks("all")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaTopic {
    producer: FutureProducer,
    name: String,
    timeout: Duration,
}

impl RedpandaTopic {
    /// Builder with default producer settings.
    #[must_use]
    pub fn builder() -> RedpandaTopicBuilder {
        RedpandaTopicBuilder::default()
    }
}

impl Topic for RedpandaTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish<'a>(&'a self, envelope: &'a Envelope) -> TransportFuture<'a, MessageId> {
        Box::pin(async move {
            let message_id = MessageId::new(uuid::Uuid::new_v4().to_string());
            send(&self.producer, &self.name, envelope, &message_id, 0, self.timeout).await?;
            Ok(message_id)
        })
    }
}

/// Builder for [`RedpandaTopic`].
#[derive(Default)]
pub struct RedpandaTopicBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaTopicBuilder {
    /// Comma-separated bootstrap brokers (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic to publish to (required).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout.
    ///
    /// Default: [`DEFAULT_SEND_TIMEOUT`]
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaTopic`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if brokers or topic are
    /// not set, or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaTopic, TransportError> {
        let brokers = required(self.brokers, "brokers")?;
        let name = required(self.topic, "topic")?;
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer = create_producer(&brokers, acks, compression, timeout)?;

        tracing::info!(
            brokers = %brokers,
            topic = %name,
            acks,
            compression,
            "RedpandaTopic created"
        );

        Ok(RedpandaTopic {
            producer,
            name,
            timeout,
        })
    }
}

pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, TransportError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TransportError::ConnectionFailed(format!("{field} not configured")))
}

pub(crate) fn create_producer(
    brokers: &str,
    acks: &str,
    compression: &str,
    timeout: Duration,
) -> Result<FutureProducer, TransportError> {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", timeout.as_millis().to_string())
        .set("acks", acks)
        .set("compression.type", compression)
        .create()
        .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create producer: {e}")))
}

/// Produce one record and wait for the broker's acknowledgment.
pub(crate) async fn send(
    producer: &FutureProducer,
    topic: &str,
    envelope: &Envelope,
    message_id: &MessageId,
    receive_count: u32,
    timeout: Duration,
) -> Result<(), TransportError> {
    let record = FutureRecord::to(topic)
        .key(message_id.as_str())
        .payload(envelope.body.as_str())
        .headers(headers::encode(envelope, message_id, receive_count));

    match producer.send(record, Timeout::After(timeout)).await {
        Ok((partition, offset)) => {
            tracing::debug!(
                topic,
                partition,
                offset,
                message_id = %message_id,
                event_type = envelope.event_type_attribute().unwrap_or_default(),
                "Record produced"
            );
            Ok(())
        }
        Err((error, _)) => {
            tracing::error!(topic, message_id = %message_id, error = %error, "Failed to produce record");
            Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: error.to_string(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaTopic>();
    }

    #[test]
    fn brokers_and_topic_are_required() {
        let missing_brokers = RedpandaTopic::builder().topic("product-events").build();
        assert!(matches!(missing_brokers, Err(TransportError::ConnectionFailed(m)) if m.contains("brokers")));

        let missing_topic = RedpandaTopic::builder().brokers("localhost:9092").build();
        assert!(matches!(missing_topic, Err(TransportError::ConnectionFailed(m)) if m.contains("topic")));
    }

    #[test]
    fn builder_creates_producer_without_contacting_brokers() {
        let topic = RedpandaTopic::builder()
            .brokers("localhost:9092")
            .topic("product-events")
            .compression("lz4")
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(topic.name(), "product-events");
        assert_eq!(topic.timeout, Duration::from_secs(2));
    }
}
