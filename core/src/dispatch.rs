//! Failure taxonomy and ack/nack classification for consumed messages.
//!
//! Every delivery moves through
//!
//! ```text
//! RECEIVED ─▶ PARSED ─▶ DISPATCHED ─▶ ACKED
//!    │           │           │
//!    └───────────┴───────────┴──────▶ NACKED
//! ```
//!
//! Handlers return `Result<(), DispatchError>`; [`Disposition::for_result`] maps
//! that to the ack/nack decision. Retrying is left to the queue's redrive
//! policy: the consumer never loops on a failed message itself.

use crate::audit::StoreError;
use crate::envelope::DecodeError;
use crate::event::EventType;
use thiserror::Error;

/// Why a delivery could not be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Malformed attributes or body; no handler was invoked
    #[error("Structural error: {0}")]
    Structural(String),

    /// The event type is unknown or not handled by this queue
    #[error("Unexpected event type '{event_type}' on queue '{queue}'")]
    UnknownEventType {
        /// Queue the message arrived on
        queue: String,
        /// Event type attribute as received
        event_type: String,
    },

    /// The audit store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Classify a decode failure for `queue`.
    #[must_use]
    pub fn from_decode(queue: &str, error: DecodeError) -> Self {
        match error {
            DecodeError::UnknownEventType(unknown) => Self::UnknownEventType {
                queue: queue.to_string(),
                event_type: unknown.0,
            },
            other => Self::Structural(other.to_string()),
        }
    }

    /// A known event type that this queue's handler does not accept.
    #[must_use]
    pub fn unexpected(queue: &str, event_type: EventType) -> Self {
        Self::UnknownEventType {
            queue: queue.to_string(),
            event_type: event_type.as_str().to_string(),
        }
    }

    /// True if redelivering the same message cannot succeed.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_) | Self::UnknownEventType { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Structural(_) => "structural",
            Self::UnknownEventType { .. } => "unknown_event_type",
            Self::Store(_) => "store",
        }
    }
}

/// What to tell the queue about a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Processed: remove the message
    Ack,
    /// Not processed: leave it for redelivery or dead-lettering
    Nack,
}

impl Disposition {
    /// Ack on success, nack on any failure.
    ///
    /// Structural failures are nacked too. The queue redelivers them up to
    /// its bound and then dead-letters them, which keeps poison messages
    /// available for inspection instead of silently dropping them.
    #[must_use]
    pub const fn for_result(result: &Result<(), DispatchError>) -> Self {
        match result {
            Ok(()) => Self::Ack,
            Err(_) => Self::Nack,
        }
    }
}

/// Processing stage of one delivery, for structured logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    /// Pulled from the queue
    Received,
    /// Attributes and body decoded
    Parsed,
    /// Handed to the handler
    Dispatched,
    /// Acknowledged
    Acked,
    /// Released for redelivery
    Nacked,
}

impl MessageState {
    /// Upper-case stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Parsed => "PARSED",
            Self::Dispatched => "DISPATCHED",
            Self::Acked => "ACKED",
            Self::Nacked => "NACKED",
        }
    }
}

impl From<Disposition> for MessageState {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Ack => Self::Acked,
            Disposition::Nack => Self::Nacked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::UnknownEventType;

    #[test]
    fn disposition_depends_only_on_result_kind() {
        assert_eq!(Disposition::for_result(&Ok(())), Disposition::Ack);
        assert_eq!(
            Disposition::for_result(&Err(DispatchError::Structural("bad".to_string()))),
            Disposition::Nack
        );
        assert_eq!(
            Disposition::for_result(&Err(DispatchError::Store(StoreError::Unavailable(
                "down".to_string()
            )))),
            Disposition::Nack
        );
    }

    #[test]
    fn decode_errors_are_classified_per_queue() {
        let unknown = DispatchError::from_decode(
            "product-events",
            DecodeError::UnknownEventType(UnknownEventType("X".to_string())),
        );
        assert_eq!(
            unknown,
            DispatchError::UnknownEventType {
                queue: "product-events".to_string(),
                event_type: "X".to_string(),
            }
        );
        assert!(unknown.is_structural());

        let missing = DispatchError::from_decode("q", DecodeError::MissingAttribute("eventType"));
        assert_eq!(missing.reason(), "structural");
    }

    #[test]
    fn store_errors_are_transient() {
        let error = DispatchError::from(StoreError::Rejected("throttled".to_string()));
        assert!(!error.is_structural());
        assert_eq!(error.reason(), "store");
    }
}
