//! Product event kinds and their JSON payloads.
//!
//! Every message on the product topic carries one of four event types as a
//! transport attribute. The type is the routing discriminator: it never
//! appears inside the JSON body.
//!
//! # Example
//!
//! ```
//! use product_audit_core::event::EventType;
//!
//! let event_type: EventType = "PRODUCT_CREATED".parse().unwrap();
//! assert_eq!(event_type, EventType::ProductCreated);
//! assert!(event_type.is_product_event());
//! assert_eq!(EventType::ProductFailure.as_str(), "PRODUCT_FAILURE");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The event type attribute carried a value outside the known set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

/// Kind of product event published on the shared topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A product was created.
    ProductCreated,
    /// A product was updated.
    ProductUpdated,
    /// A product was deleted.
    ProductDeleted,
    /// A product mutation failed.
    ProductFailure,
}

impl EventType {
    /// Wire representation used in transport attributes and partition keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProductCreated => "PRODUCT_CREATED",
            Self::ProductUpdated => "PRODUCT_UPDATED",
            Self::ProductDeleted => "PRODUCT_DELETED",
            Self::ProductFailure => "PRODUCT_FAILURE",
        }
    }

    /// True for the three success kinds (created, updated, deleted).
    #[must_use]
    pub const fn is_product_event(self) -> bool {
        !matches!(self, Self::ProductFailure)
    }

    /// All event types, in declaration order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::ProductCreated,
            Self::ProductUpdated,
            Self::ProductDeleted,
            Self::ProductFailure,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Body of a `PRODUCT_CREATED`, `PRODUCT_UPDATED` or `PRODUCT_DELETED` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductEvent {
    /// Product identifier
    pub id: String,
    /// Product code
    pub code: String,
    /// Product price
    pub price: f64,
}

/// Body of a `PRODUCT_FAILURE` event.
///
/// `id` is absent when the failure happened before a product could be
/// identified (for example a rejected create).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFailureEvent {
    /// Product identifier, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// HTTP-style status code of the failed operation
    pub status: u16,
    /// Error message
    pub error: String,
}
