//! Audit record model and the store abstraction.
//!
//! Each consumed event becomes one immutable [`AuditRecord`] under a composite key:
//!
//! - `pk = "#product_" + eventType` groups records by event kind
//! - `sk = createdAt` in epoch milliseconds, as a string, orders records in time
//!
//! Records are short-lived: `ttl` (epoch seconds) is set to five minutes after
//! `createdAt` and the store's expiry sweep removes them after that point.
//!
//! # Example
//!
//! ```
//! use product_audit_core::audit::{AuditRecord, Provenance};
//! use product_audit_core::event::{EventType, ProductEvent};
//!
//! let event = ProductEvent { id: "p1".into(), code: "ABC12".into(), price: 99.9 };
//! let provenance = Provenance::new("m-1", "req-1", "1-abc-def");
//! let record = AuditRecord::product(EventType::ProductCreated, &event, provenance, 1_735_689_600_123);
//!
//! assert_eq!(record.pk, "#product_PRODUCT_CREATED");
//! assert_eq!(record.sk, "1735689600123");
//! assert_eq!(record.ttl, 1_735_689_600 + 300);
//! ```

use crate::envelope::MISSING_ATTRIBUTE;
use crate::event::{EventType, ProductEvent, ProductFailureEvent};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Prefix of every audit partition key.
pub const PARTITION_PREFIX: &str = "#product_";

/// Retention window of an audit record, in seconds.
pub const AUDIT_TTL_SECS: i64 = 300;

/// Partition key for an event type.
#[must_use]
pub fn partition_key(event_type: EventType) -> String {
    format!("{PARTITION_PREFIX}{}", event_type.as_str())
}

/// Expiry (epoch seconds) of a record created at `created_at_ms`.
#[must_use]
pub const fn ttl_for(created_at_ms: i64) -> i64 {
    created_at_ms / 1000 + AUDIT_TTL_SECS
}

/// Errors raised by an [`AuditStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The storage backend could not be reached
    #[error("Audit store unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the write
    #[error("Audit write rejected: {0}")]
    Rejected(String),

    /// A record already exists under this key
    #[error("Audit record already exists: pk={pk} sk={sk}")]
    KeyConflict {
        /// Partition key
        pk: String,
        /// Sort key
        sk: String,
    },

    /// A record could not be converted to or from its stored form
    #[error("Audit record serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True if the write collided with an existing `(pk, sk)`.
    #[must_use]
    pub const fn is_key_conflict(&self) -> bool {
        matches!(self, Self::KeyConflict { .. })
    }
}

/// Transport identifiers copied into every audit record.
///
/// None of the fields is ever empty: absent values are replaced by
/// [`MISSING_ATTRIBUTE`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// Transport-assigned message id
    pub message_id: String,
    /// Caller request id
    pub request_id: String,
    /// Trace id
    pub trace_id: String,
}

impl Provenance {
    /// Build provenance, substituting the sentinel for empty values.
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        request_id: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        fn or_missing(value: String) -> String {
            if value.is_empty() {
                MISSING_ATTRIBUTE.to_string()
            } else {
                value
            }
        }

        Self {
            message_id: or_missing(message_id.into()),
            request_id: or_missing(request_id.into()),
            trace_id: or_missing(trace_id.into()),
        }
    }
}

/// Denormalised snapshot stored with a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditInfo {
    /// Snapshot of a created/updated/deleted product
    Product {
        /// Product id
        id: String,
        /// Product code
        code: String,
        /// Product price
        price: f64,
        /// Transport identifiers
        #[serde(flatten)]
        provenance: Provenance,
    },
    /// Snapshot of a failed product operation
    Failure {
        /// Product id, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Status code of the failed operation
        status: u16,
        /// Error message
        error: String,
        /// Transport identifiers
        #[serde(flatten)]
        provenance: Provenance,
    },
}

impl AuditInfo {
    /// Transport identifiers of the snapshot.
    #[must_use]
    pub const fn provenance(&self) -> &Provenance {
        match self {
            Self::Product { provenance, .. } | Self::Failure { provenance, .. } => provenance,
        }
    }

    /// Product id, if the snapshot has one.
    #[must_use]
    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::Product { id, .. } => Some(id),
            Self::Failure { id, .. } => id.as_deref(),
        }
    }
}

/// An immutable audit trail entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Partition key, `#product_<eventType>`
    pub pk: String,
    /// Sort key, `createdAt` as a decimal string
    pub sk: String,
    /// Write time, epoch milliseconds
    pub created_at: i64,
    /// Expiry, epoch seconds
    pub ttl: i64,
    /// Event snapshot
    pub info: AuditInfo,
}

impl AuditRecord {
    /// Build a record for `event_type` written at `created_at_ms`.
    #[must_use]
    pub fn new(event_type: EventType, info: AuditInfo, created_at_ms: i64) -> Self {
        Self {
            pk: partition_key(event_type),
            sk: created_at_ms.to_string(),
            created_at: created_at_ms,
            ttl: ttl_for(created_at_ms),
            info,
        }
    }

    /// Record for a created/updated/deleted product.
    #[must_use]
    pub fn product(
        event_type: EventType,
        event: &ProductEvent,
        provenance: Provenance,
        created_at_ms: i64,
    ) -> Self {
        let info = AuditInfo::Product {
            id: event.id.clone(),
            code: event.code.clone(),
            price: event.price,
            provenance,
        };
        Self::new(event_type, info, created_at_ms)
    }

    /// Record for a failed product operation.
    #[must_use]
    pub fn failure(event: &ProductFailureEvent, provenance: Provenance, created_at_ms: i64) -> Self {
        let info = AuditInfo::Failure {
            id: event.id.clone(),
            status: event.status,
            error: event.error.clone(),
            provenance,
        };
        Self::new(EventType::ProductFailure, info, created_at_ms)
    }

    /// Same record re-keyed at a different write time.
    ///
    /// `sk` and `ttl` are derived again from the new time so that the key
    /// invariants keep holding.
    #[must_use]
    pub fn rekeyed(mut self, created_at_ms: i64) -> Self {
        self.sk = created_at_ms.to_string();
        self.created_at = created_at_ms;
        self.ttl = ttl_for(created_at_ms);
        self
    }

    /// Whether the record's expiry has passed at `now_epoch_secs`.
    #[must_use]
    pub const fn is_expired(&self, now_epoch_secs: i64) -> bool {
        self.ttl <= now_epoch_secs
    }
}

/// Result ordering for [`AuditQuery`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first
    #[default]
    Ascending,
    /// Newest first
    Descending,
}

/// Time-ordered lookup within one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditQuery {
    /// Partition to read
    pub event_type: EventType,
    /// Inclusive lower bound on `createdAt`
    pub from_ms: Option<i64>,
    /// Inclusive upper bound on `createdAt`
    pub to_ms: Option<i64>,
    /// Result ordering
    pub order: SortOrder,
    /// Maximum number of records
    pub limit: usize,
}

impl AuditQuery {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 100;

    /// All records of one event type, oldest first.
    #[must_use]
    pub const fn for_type(event_type: EventType) -> Self {
        Self {
            event_type,
            from_ms: None,
            to_ms: None,
            order: SortOrder::Ascending,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    /// Restrict to records created within `[from_ms, to_ms]`.
    #[must_use]
    pub const fn between(mut self, from_ms: i64, to_ms: i64) -> Self {
        self.from_ms = Some(from_ms);
        self.to_ms = Some(to_ms);
        self
    }

    /// Newest first.
    #[must_use]
    pub const fn newest_first(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a record falls inside this query's partition and time range.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        record.pk == partition_key(self.event_type)
            && self.from_ms.is_none_or(|from| record.created_at >= from)
            && self.to_ms.is_none_or(|to| record.created_at <= to)
    }
}

/// Future returned by [`AuditStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence for audit records.
///
/// The store is shared by both consumer loops, so implementations must be
/// safe for concurrent use. There is no update or delete path other than
/// expiry.
///
/// The trait returns boxed futures so it can be used as `Arc<dyn AuditStore>`.
pub trait AuditStore: Send + Sync {
    /// Insert a record.
    ///
    /// Never overwrites: an existing `(pk, sk)` is reported as
    /// [`StoreError::KeyConflict`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend is unavailable, rejects the
    /// write, or the key already exists.
    fn put<'a>(&'a self, record: &'a AuditRecord) -> StoreFuture<'a, ()>;

    /// Read records of one event type in time order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend is unavailable or a stored row
    /// cannot be decoded.
    fn query<'a>(&'a self, query: &'a AuditQuery) -> StoreFuture<'a, Vec<AuditRecord>>;

    /// Delete every record whose `ttl` is at or before `now_epoch_secs`.
    ///
    /// Returns the number of records removed. Backends with native expiry
    /// may return `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend is unavailable.
    fn purge_expired(&self, now_epoch_secs: i64) -> StoreFuture<'_, u64>;
}
