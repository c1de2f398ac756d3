//! # Product Audit Redpanda
//!
//! Kafka-compatible transport for the product event pipeline, built on
//! `rdkafka` and tested against Redpanda and Apache Kafka.
//!
//! - [`RedpandaTopic`] implements [`Topic`](product_audit_core::transport::Topic):
//!   envelope attributes become record headers, the body becomes the record
//!   payload, and each message gets a UUID message id.
//! - [`RedpandaQueue`] implements
//!   [`MessageQueue`](product_audit_core::transport::MessageQueue): a consumer
//!   group that applies a [`FilterPolicy`](product_audit_core::routing::FilterPolicy)
//!   client-side, commits offsets manually on ack, and redrives nacked messages
//!   through a redelivery topic until the
//!   [`RedrivePolicy`](product_audit_core::redrive::RedrivePolicy) sends them to
//!   the dead-letter topic.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a partition's offset is committed only up to its
//!   oldest record that is not yet settled
//! - **Bounded**: a message is delivered at most `max_receive_count` times
//! - **Unordered**: redelivered messages interleave with new ones
//!
//! # Example
//!
//! ```no_run
//! use product_audit_core::routing::FilterPolicy;
//! use product_audit_redpanda::{RedpandaQueue, RedpandaTopic};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let topic = RedpandaTopic::builder()
//!     .brokers("localhost:9092")
//!     .topic("product-events")
//!     .build()?;
//!
//! let queue = RedpandaQueue::builder()
//!     .brokers("localhost:9092")
//!     .topic("product-events")
//!     .queue("product-events")
//!     .filter(FilterPolicy::product_events())
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod headers;
mod offsets;
mod queue;
mod topic;

pub use queue::{BATCH_LINGER, REDELIVERY_SUFFIX, RedpandaQueue, RedpandaQueueBuilder};
pub use topic::{DEFAULT_SEND_TIMEOUT, RedpandaTopic, RedpandaTopicBuilder};
