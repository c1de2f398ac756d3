//! Product operation errors and their HTTP-style status codes.

use product_audit_core::event::ProductFailureEvent;
use product_audit_runtime::PublishError;
use thiserror::Error;

/// Why a product operation failed.
#[derive(Error, Debug)]
pub enum ProductError {
    /// No product with this id
    #[error("Product not found")]
    NotFound {
        /// The requested id
        id: String,
    },

    /// Another product already uses this code
    #[error("Product code {code} already exists")]
    DuplicateCode {
        /// Product being written, if it already had an id
        id: Option<String>,
        /// The conflicting code
        code: String,
    },

    /// The request is malformed
    #[error("Invalid product: {reason}")]
    Invalid {
        /// Product being written, if it already had an id
        id: Option<String>,
        /// What is wrong
        reason: String,
    },

    /// The product store failed
    #[error("Product repository error: {0}")]
    Repository(String),

    /// The mutation succeeded but its event could not be published
    #[error("Product {id} changed but its event was not published: {source}")]
    Publish {
        /// The mutated product
        id: String,
        /// Underlying publisher error
        #[source]
        source: PublishError,
    },
}

impl ProductError {
    /// Status code reported to the caller and carried by failure events.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::DuplicateCode { .. } => 412,
            Self::Invalid { .. } => 400,
            Self::Repository(_) => 500,
            Self::Publish { .. } => 502,
        }
    }

    /// Product the failure concerns, when known.
    #[must_use]
    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::NotFound { id } | Self::Publish { id, .. } => Some(id),
            Self::DuplicateCode { id, .. } | Self::Invalid { id, .. } => id.as_deref(),
            Self::Repository(_) => None,
        }
    }

    /// Failure event describing this error.
    #[must_use]
    pub fn failure_event(&self) -> ProductFailureEvent {
        ProductFailureEvent {
            id: self.product_id().map(str::to_string),
            status: self.status(),
            error: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ProductError::NotFound { id: "p1".into() }.status(), 404);
        assert_eq!(
            ProductError::DuplicateCode {
                id: None,
                code: "ABC12".into()
            }
            .status(),
            412
        );
        assert_eq!(
            ProductError::Invalid {
                id: None,
                reason: "x".into()
            }
            .status(),
            400
        );
        assert_eq!(ProductError::Repository("down".into()).status(), 500);
    }

    #[test]
    fn failure_event_omits_unknown_id() {
        let event = ProductError::DuplicateCode {
            id: None,
            code: "ABC12".into(),
        }
        .failure_event();

        assert_eq!(event.id, None);
        assert_eq!(event.status, 412);
        assert_eq!(event.error, "Product code ABC12 already exists");
    }

    #[test]
    fn failure_event_keeps_known_id() {
        let event = ProductError::NotFound { id: "p9".into() }.failure_event();
        assert_eq!(event.id.as_deref(), Some("p9"));
        assert_eq!(event.error, "Product not found");
    }
}
