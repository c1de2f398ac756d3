//! Consuming side: [`RedpandaQueue`].
//!
//! Kafka has neither subscription filters nor per-message redelivery, so a
//! queue is assembled from a consumer group and two extra topics:
//!
//! ```text
//!  product topic ───────┐
//!                       ├─▶ consumer group ─▶ filter ─┬─ no match ─▶ settle
//!  <queue>-redelivery ──┘   (queue name)              └─▶ delivery
//!                                                          ├─ ack ──▶ settle
//!                                                          └─ nack ─▶ <queue>-redelivery, settle
//!                                                                 or dead-letter topic once exhausted
//! ```
//!
//! A nacked message is re-produced with its receive count in a header and the
//! original record is settled. Redelivery is therefore immediate rather than
//! delayed by a visibility timeout.
//!
//! Records settle in any order, filtered ones as soon as they are read. The
//! committed offset of a partition only moves up to its oldest unsettled
//! record, so after a crash every record that was in flight is read again.

use crate::headers::{self, Inbound};
use crate::offsets::OffsetTracker;
use crate::topic::{DEFAULT_SEND_TIMEOUT, create_producer, required, send};
use product_audit_core::envelope::Envelope;
use product_audit_core::redrive::RedrivePolicy;
use product_audit_core::routing::FilterPolicy;
use product_audit_core::transport::{
    Delivery, MessageId, MessageQueue, ReceiptHandle, TransportError, TransportFuture,
};
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::producer::FutureProducer;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// How long a receive keeps collecting once the first message arrived.
pub const BATCH_LINGER: Duration = Duration::from_millis(100);

/// Suffix of the topic a queue redelivers nacked messages through.
pub const REDELIVERY_SUFFIX: &str = "-redelivery";

/// Pause before polling again while a subscribed topic does not exist yet.
const MISSING_TOPIC_BACKOFF: Duration = Duration::from_millis(250);

/// A delivery waiting to be settled.
#[derive(Debug)]
struct InFlight {
    topic: String,
    partition: i32,
    offset: i64,
    message_id: MessageId,
    receive_count: u32,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct Settlement {
    in_flight: HashMap<String, InFlight>,
    offsets: OffsetTracker,
}

/// A filtered, redriving subscription of a Kafka topic.
///
/// The queue name doubles as the consumer group id, so several instances of
/// the service share one queue's load.
///
/// # Example
///
/// ```no_run
/// use product_audit_core::redrive::RedrivePolicy;
/// use product_audit_core::routing::FilterPolicy;
/// use product_audit_redpanda::RedpandaQueue;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedpandaQueue::builder()
///     .brokers("localhost:9092")
///     .topic("product-events")
///     .queue("product-failure-events")
///     .filter(FilterPolicy::failure_events())
///     .redrive(RedrivePolicy::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaQueue {
    name: String,
    consumer: StreamConsumer,
    producer: FutureProducer,
    filter: FilterPolicy,
    redrive: RedrivePolicy,
    redelivery_topic: String,
    timeout: Duration,
    state: Mutex<Settlement>,
}

impl RedpandaQueue {
    /// Builder with default consumer settings.
    #[must_use]
    pub fn builder() -> RedpandaQueueBuilder {
        RedpandaQueueBuilder::default()
    }

    /// Topic nacked messages are re-produced to.
    #[must_use]
    pub fn redelivery_topic(&self) -> &str {
        &self.redelivery_topic
    }

    /// Dead-letter topic for exhausted messages.
    #[must_use]
    pub fn dead_letter_topic(&self) -> &str {
        &self.redrive.dead_letter_queue
    }

    /// Number of deliveries not yet acked or nacked.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> MutexGuard<'_, Settlement> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn receive_batch(&self, max_messages: usize, wait: Duration) -> Result<Vec<Delivery>, TransportError> {
        let max_messages = max_messages.max(1);
        let deadline = Instant::now() + wait;
        let mut batch = Vec::new();

        while batch.len() < max_messages {
            let until = if batch.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + BATCH_LINGER)
            };

            let message = match tokio::time::timeout_at(until, self.consumer.recv()).await {
                Err(_elapsed) => break,
                Ok(Ok(message)) => message.detach(),
                // Redelivery topics appear on first nack.
                Ok(Err(KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition))) => {
                    tracing::debug!(queue = %self.name, "Subscribed topic not created yet");
                    tokio::time::sleep_until(until.min(Instant::now() + MISSING_TOPIC_BACKOFF)).await;
                    continue;
                }
                Ok(Err(e)) if batch.is_empty() => {
                    return Err(TransportError::ReceiveFailed {
                        queue: self.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(queue = %self.name, error = %e, "Receive failed mid-batch");
                    break;
                }
            };

            if let Some(delivery) = self.admit(&message) {
                batch.push(delivery);
            }
        }

        Ok(batch)
    }

    /// Apply the filter and register the record as in flight.
    fn admit(&self, message: &OwnedMessage) -> Option<Delivery> {
        let Inbound {
            message_id,
            previous_receives,
            envelope,
        } = headers::decode(message);
        let (topic, partition, offset) = (message.topic(), message.partition(), message.offset());

        let mut state = self.lock();
        state.offsets.track(topic, partition, offset);

        if !self.filter.matches(&envelope.attributes) {
            tracing::trace!(
                queue = %self.name,
                message_id = %message_id,
                event_type = envelope.event_type_attribute().unwrap_or_default(),
                "Record filtered out"
            );
            if let Err(e) = self.settle_offset(&mut state, topic, partition, offset) {
                tracing::warn!(queue = %self.name, error = %e, "Failed to commit past filtered record");
            }
            return None;
        }

        let receipt = format!("{topic}/{partition}/{offset}");
        let receive_count = previous_receives.saturating_add(1);
        let delivery = Delivery {
            message_id: message_id.clone(),
            receipt: ReceiptHandle::new(receipt.clone()),
            receive_count,
            envelope: envelope.clone(),
        };

        state.in_flight.insert(
            receipt,
            InFlight {
                topic: topic.to_string(),
                partition,
                offset,
                message_id,
                receive_count,
                envelope,
            },
        );
        Some(delivery)
    }

    fn take(&self, receipt: &ReceiptHandle) -> Result<InFlight, TransportError> {
        self.lock()
            .in_flight
            .remove(receipt.as_str())
            .ok_or_else(|| TransportError::UnknownReceipt(receipt.as_str().to_string()))
    }

    /// Mark a record settled and commit the partition's new watermark, if any.
    fn settle(&self, message: &InFlight) -> Result<(), TransportError> {
        let mut state = self.lock();
        self.settle_offset(&mut state, &message.topic, message.partition, message.offset)
    }

    /// Commits are issued under the state lock so positions reach the
    /// consumer in increasing order.
    fn settle_offset(
        &self,
        state: &mut Settlement,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError> {
        let Some(position) = state.offsets.settle(topic, partition, offset) else {
            return Ok(());
        };

        let settle_failed = |reason: String| TransportError::SettleFailed {
            queue: self.name.clone(),
            reason,
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(position))
            .map_err(|e| settle_failed(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| settle_failed(e.to_string()))
    }

    async fn redrive(&self, message: InFlight) -> Result<(), TransportError> {
        let exhausted = self.redrive.is_exhausted(message.receive_count);
        let destination = if exhausted {
            self.redrive.dead_letter_queue.as_str()
        } else {
            self.redelivery_topic.as_str()
        };

        let produced = send(
            &self.producer,
            destination,
            &message.envelope,
            &message.message_id,
            message.receive_count,
            self.timeout,
        )
        .await;

        if let Err(e) = produced {
            // Stays unsettled: the partition does not commit past it and the
            // record comes back after a restart.
            return Err(TransportError::SettleFailed {
                queue: self.name.clone(),
                reason: e.to_string(),
            });
        }

        if exhausted {
            tracing::warn!(
                queue = %self.name,
                message_id = %message.message_id,
                receive_count = message.receive_count,
                dead_letter_queue = %destination,
                "Message dead-lettered"
            );
        }

        self.settle(&message)
    }
}

impl MessageQueue for RedpandaQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, max_messages: usize, wait: Duration) -> TransportFuture<'_, Vec<Delivery>> {
        Box::pin(self.receive_batch(max_messages, wait))
    }

    fn ack<'a>(&'a self, receipt: &'a ReceiptHandle) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let message = self.take(receipt)?;
            self.settle(&message)
        })
    }

    fn nack<'a>(&'a self, receipt: &'a ReceiptHandle) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let message = self.take(receipt)?;
            self.redrive(message).await
        })
    }
}

/// Builder for [`RedpandaQueue`].
#[derive(Default)]
pub struct RedpandaQueueBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    queue: Option<String>,
    filter: Option<FilterPolicy>,
    redrive: Option<RedrivePolicy>,
    auto_offset_reset: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaQueueBuilder {
    /// Comma-separated bootstrap brokers (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Topic this queue subscribes to (required).
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Queue name, also used as consumer group id (required).
    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Subscription filter (required).
    #[must_use]
    pub fn filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Redelivery bound and dead-letter topic.
    ///
    /// Default: [`RedrivePolicy::default`]
    #[must_use]
    pub fn redrive(mut self, redrive: RedrivePolicy) -> Self {
        self.redrive = Some(redrive);
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so messages published before the first
    /// consumer started are still audited.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Send timeout for redelivery and dead-letter records.
    ///
    /// Default: [`DEFAULT_SEND_TIMEOUT`]
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the queue and subscribe to its topics.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if a required field is
    /// missing, or the consumer or producer cannot be created.
    pub fn build(self) -> Result<RedpandaQueue, TransportError> {
        let brokers = required(self.brokers, "brokers")?;
        let topic = required(self.topic, "topic")?;
        let name = required(self.queue, "queue")?;
        let filter = self
            .filter
            .ok_or_else(|| TransportError::ConnectionFailed("filter not configured".to_string()))?;
        let redrive = self.redrive.unwrap_or_default();
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("earliest");
        let redelivery_topic = format!("{name}{REDELIVERY_SUFFIX}");

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &name)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .set("allow.auto.create.topics", "true")
            .create()
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[topic.as_str(), redelivery_topic.as_str()])
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to subscribe: {e}")))?;

        let producer = create_producer(&brokers, "all", "none", timeout)?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            queue = %name,
            redelivery_topic = %redelivery_topic,
            dead_letter_queue = %redrive.dead_letter_queue,
            max_receive_count = redrive.max_receive_count,
            "RedpandaQueue subscribed"
        );

        Ok(RedpandaQueue {
            name,
            consumer,
            producer,
            filter,
            redrive,
            redelivery_topic,
            timeout,
            state: Mutex::new(Settlement::default()),
        })
    }
}
