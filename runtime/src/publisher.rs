//! Publishing product events to the shared topic.
//!
//! The publisher encodes a payload into an [`Envelope`] carrying the
//! `eventType`, `correlationId` and `traceId` attributes and hands it to the
//! [`Topic`]. It never retries: whether a failed publish fails the caller's
//! operation is decided by the caller.

use crate::metrics::PublisherMetrics;
use product_audit_core::context::RequestContext;
use product_audit_core::envelope::{EncodeError, Envelope};
use product_audit_core::event::{EventType, ProductEvent, ProductFailureEvent};
use product_audit_core::transport::{MessageId, Topic, TransportError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`EventPublisher`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The payload could not be serialized
    #[error("Failed to encode event: {0}")]
    Encode(#[from] EncodeError),

    /// The transport rejected or could not deliver the message
    #[error("Failed to publish event: {0}")]
    Transport(#[from] TransportError),

    /// A product event was published with the failure event type
    #[error("Event type {0} cannot carry a product payload")]
    InvalidEventType(EventType),
}

/// Publishes product and failure events with correlation attributes.
///
/// # Example
///
/// ```
/// use product_audit_core::context::{RequestContext, TraceId};
/// use product_audit_core::event::{EventType, ProductEvent};
/// use product_audit_runtime::publisher::EventPublisher;
/// use product_audit_testing::InMemoryBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// let publisher = EventPublisher::new(bus.topic.clone());
///
/// let ctx = RequestContext::new(Some("req-1".into()), TraceId::new("1-00000000-abc"));
/// let event = ProductEvent { id: "p1".into(), code: "ABC12".into(), price: 99.9 };
/// let message_id = publisher
///     .publish_product_event(&event, EventType::ProductCreated, &ctx)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EventPublisher {
    topic: Arc<dyn Topic>,
}

impl EventPublisher {
    /// Publisher writing to `topic`.
    #[must_use]
    pub fn new(topic: Arc<dyn Topic>) -> Self {
        Self { topic }
    }

    /// Encode `payload` as `event_type` and publish it.
    ///
    /// Returns the message id assigned by the transport.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Encode`] if the payload cannot be serialized
    /// - [`PublishError::Transport`] if the broker fails
    #[tracing::instrument(
        skip(self, payload, ctx),
        fields(
            topic = %self.topic.name(),
            event_type = %event_type,
            request_id = ctx.correlation_id().unwrap_or_default(),
            trace_id = %ctx.trace_id,
        )
    )]
    pub async fn publish<T: Serialize + Sync>(
        &self,
        event_type: EventType,
        payload: &T,
        ctx: &RequestContext,
    ) -> Result<MessageId, PublishError> {
        let envelope = Envelope::encode(event_type, payload, ctx)?;

        match self.topic.publish(&envelope).await {
            Ok(message_id) => {
                PublisherMetrics::record_publish(event_type);
                tracing::debug!(message_id = %message_id, "Event published");
                Ok(message_id)
            }
            Err(e) => {
                PublisherMetrics::record_publish_error(event_type);
                tracing::warn!(error = %e, "Event publish failed");
                Err(e.into())
            }
        }
    }

    /// Publish a created, updated or deleted product snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::InvalidEventType`] for
    /// [`EventType::ProductFailure`], otherwise as [`publish`](Self::publish).
    pub async fn publish_product_event(
        &self,
        event: &ProductEvent,
        event_type: EventType,
        ctx: &RequestContext,
    ) -> Result<MessageId, PublishError> {
        if !event_type.is_product_event() {
            return Err(PublishError::InvalidEventType(event_type));
        }
        self.publish(event_type, event, ctx).await
    }

    /// Publish a failed product operation.
    ///
    /// # Errors
    ///
    /// As [`publish`](Self::publish).
    pub async fn publish_failure(
        &self,
        event: &ProductFailureEvent,
        ctx: &RequestContext,
    ) -> Result<MessageId, PublishError> {
        self.publish(EventType::ProductFailure, event, ctx).await
    }
}
