//! Per-message parse and dispatch.
//!
//! [`Dispatcher::process`] takes one [`Delivery`] through
//! `RECEIVED → PARSED → DISPATCHED → ACKED | NACKED` and returns the
//! [`Disposition`] the consumer must report to the queue. Settling the
//! message is left to the consumer.

use product_audit_core::dispatch::{DispatchError, Disposition, MessageState};
use product_audit_core::envelope::DecodeError;
use product_audit_core::event::EventType;
use product_audit_core::transport::{Delivery, MessageId};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A decoded delivery, as seen by a handler.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEvent {
    /// Routing discriminator
    pub event_type: EventType,
    /// Transport message id
    pub message_id: MessageId,
    /// Request id, or the missing-attribute sentinel
    pub correlation_id: String,
    /// Trace id, or the missing-attribute sentinel
    pub trace_id: String,
    /// Delivery attempt, starting at 1
    pub receive_count: u32,
    /// Parsed JSON body
    pub body: serde_json::Value,
}

impl InboundEvent {
    /// Deserialize the body into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedBody`] if the body does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        T::deserialize(&self.body).map_err(|e| DecodeError::MalformedBody(e.to_string()))
    }
}

/// Future returned by [`MessageHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// Processes the events of one queue.
pub trait MessageHandler: Send + Sync {
    /// Whether this handler processes `event_type`.
    fn accepts(&self, event_type: EventType) -> bool;

    /// Process one event.
    ///
    /// Only called for accepted event types.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the payload is malformed or the write fails.
    fn handle<'a>(&'a self, event: &'a InboundEvent) -> HandlerFuture<'a>;
}

/// Routes decoded deliveries of one queue to its handler.
#[derive(Clone)]
pub struct Dispatcher {
    queue: String,
    handler: Arc<dyn MessageHandler>,
}

impl Dispatcher {
    /// Dispatcher for deliveries from `queue`.
    #[must_use]
    pub fn new(queue: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            queue: queue.into(),
            handler,
        }
    }

    /// Queue this dispatcher serves.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Decode `delivery` and check its event type against the handler.
    ///
    /// # Errors
    ///
    /// Returns a structural [`DispatchError`] for malformed or unexpected
    /// messages.
    pub fn parse(&self, delivery: &Delivery) -> Result<InboundEvent, DispatchError> {
        let decoded = delivery
            .envelope
            .decode()
            .map_err(|e| DispatchError::from_decode(&self.queue, e))?;

        if !self.handler.accepts(decoded.event_type) {
            return Err(DispatchError::unexpected(&self.queue, decoded.event_type));
        }

        Ok(InboundEvent {
            event_type: decoded.event_type,
            message_id: delivery.message_id.clone(),
            correlation_id: decoded.correlation_id,
            trace_id: decoded.trace_id,
            receive_count: delivery.receive_count,
            body: decoded.body,
        })
    }

    /// Run one delivery through parse and handler.
    ///
    /// # Errors
    ///
    /// Returns the structural or handler [`DispatchError`].
    #[tracing::instrument(
        skip(self, delivery),
        fields(
            queue = %self.queue,
            message_id = %delivery.message_id,
            receive_count = delivery.receive_count,
        )
    )]
    pub async fn dispatch(&self, delivery: &Delivery) -> Result<(), DispatchError> {
        tracing::trace!(state = MessageState::Received.as_str(), "Message received");

        let event = self.parse(delivery)?;
        tracing::trace!(
            state = MessageState::Parsed.as_str(),
            event_type = %event.event_type,
            request_id = %event.correlation_id,
            trace_id = %event.trace_id,
            "Message parsed"
        );

        let result = self.handler.handle(&event).await;
        tracing::trace!(state = MessageState::Dispatched.as_str(), "Message dispatched");
        result
    }

    /// Process one delivery and return what to tell the queue.
    pub async fn process(&self, delivery: &Delivery) -> Disposition {
        let result = self.dispatch(delivery).await;
        self.classify(delivery, &result)
    }

    /// Map a dispatch outcome to a [`Disposition`] and log it.
    #[must_use]
    pub fn classify(&self, delivery: &Delivery, result: &Result<(), DispatchError>) -> Disposition {
        let disposition = Disposition::for_result(result);
        let state = MessageState::from(disposition).as_str();

        match result {
            Ok(()) => {
                tracing::debug!(
                    queue = %self.queue,
                    message_id = %delivery.message_id,
                    state,
                    "Message processed"
                );
            }
            Err(e) if e.is_structural() => {
                tracing::error!(
                    queue = %self.queue,
                    message_id = %delivery.message_id,
                    receive_count = delivery.receive_count,
                    state,
                    reason = e.reason(),
                    error = %e,
                    "Rejected structurally invalid message"
                );
            }
            Err(e) => {
                tracing::warn!(
                    queue = %self.queue,
                    message_id = %delivery.message_id,
                    receive_count = delivery.receive_count,
                    state,
                    reason = e.reason(),
                    error = %e,
                    "Message processing failed, releasing for redelivery"
                );
            }
        }

        disposition
    }
}
