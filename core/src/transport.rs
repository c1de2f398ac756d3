//! Publish/consume abstraction over the message transport.
//!
//! Two traits model the two halves of the bus:
//!
//! - [`Topic`]: the publishing side. Publishing returns the identifier the
//!   transport assigned to the message.
//! - [`MessageQueue`]: one filtered subscription of the topic. Consumers
//!   long-poll it, then acknowledge or release each delivery.
//!
//! ```text
//!  Publisher ──publish──▶ Topic ──filter──▶ MessageQueue ──receive──▶ Consumer
//!                                              ▲    │                    │
//!                                              │    └── redrive ─▶ DLQ   │
//!                                              └───── ack / nack ────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a delivery that is not acked is delivered again
//! - **Bounded**: after [`RedrivePolicy::max_receive_count`](crate::redrive::RedrivePolicy)
//!   deliveries the transport moves the message to the dead-letter queue
//! - **Unordered**: no ordering across messages, queues or retries
//!
//! # Implementations
//!
//! - `InMemoryTopic` / `InMemoryQueue` in `product-audit-testing`
//! - `RedpandaTopic` / `RedpandaQueue` in `product-audit-redpanda`

use crate::envelope::Envelope;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to receive from a queue
    #[error("Receive failed for queue '{queue}': {reason}")]
    ReceiveFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to acknowledge or release a delivery
    #[error("Settle failed for queue '{queue}': {reason}")]
    SettleFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// The receipt handle does not belong to an in-flight delivery
    #[error("Unknown receipt handle: {0}")]
    UnknownReceipt(String),
}

/// Transport-assigned message identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an identifier produced by the transport.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token used to settle one delivery of a message.
///
/// Each redelivery gets a fresh handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Wrap a transport receipt.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One delivery of a message from a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Identifier assigned when the message was published
    pub message_id: MessageId,
    /// Handle for ack/nack of this delivery
    pub receipt: ReceiptHandle,
    /// How many times the message has been received, including this time
    pub receive_count: u32,
    /// Message content
    pub envelope: Envelope,
}

/// Future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Publishing side of the bus.
pub trait Topic: Send + Sync {
    /// Topic name, for logging.
    fn name(&self) -> &str;

    /// Publish one envelope and return the transport-assigned message id.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if the broker is unavailable
    /// or rejects the message. No retry is attempted.
    fn publish<'a>(&'a self, envelope: &'a Envelope) -> TransportFuture<'a, MessageId>;
}

/// One filtered subscription of the topic.
pub trait MessageQueue: Send + Sync {
    /// Queue name, for logging.
    fn name(&self) -> &str;

    /// Wait up to `wait` for at least one message, returning at most `max_messages`.
    ///
    /// Returns an empty batch when nothing arrived in time. Received messages
    /// stay in flight until acked or released.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReceiveFailed`] if the broker is unreachable.
    fn receive(&self, max_messages: usize, wait: Duration) -> TransportFuture<'_, Vec<Delivery>>;

    /// Remove a delivered message permanently.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the receipt is stale or the broker fails.
    fn ack<'a>(&'a self, receipt: &'a ReceiptHandle) -> TransportFuture<'a, ()>;

    /// Give a delivered message back for redelivery.
    ///
    /// Transports that rely on a visibility timeout may treat this as a
    /// no-op; the message then reappears once the timeout lapses. Either way
    /// the queue's redrive policy decides whether it is delivered again or
    /// dead-lettered.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the receipt is stale or the broker fails.
    fn nack<'a>(&'a self, receipt: &'a ReceiptHandle) -> TransportFuture<'a, ()>;
}
