//! # Product Audit Testing
//!
//! In-memory stand-ins for the product event pipeline's ports.
//!
//! This crate provides:
//! - [`InMemoryTopic`] / [`InMemoryQueue`]: filtered fan-out with visibility
//!   timeout, receive counts and dead-letter redrive
//! - [`InMemoryBus`]: the product topic wired to both queues and the shared DLQ
//! - [`InMemoryAuditStore`]: conditional-insert audit store with failure injection
//! - [`FixedClock`] / [`ManualClock`]: deterministic time
//!
//! ## Example
//!
//! ```
//! use product_audit_core::context::{RequestContext, TraceId};
//! use product_audit_core::envelope::Envelope;
//! use product_audit_core::event::{EventType, ProductEvent};
//! use product_audit_core::transport::Topic;
//! use product_audit_testing::InMemoryBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let event = ProductEvent { id: "p-1".into(), code: "ABC".into(), price: 9.5 };
//! let ctx = RequestContext::new(Some("req-1".into()), TraceId::new("t-1"));
//!
//! bus.topic
//!     .publish(&Envelope::encode(EventType::ProductCreated, &event, &ctx)?)
//!     .await?;
//!
//! assert_eq!(bus.product_events.len(), 1);
//! assert!(bus.failure_events.is_empty());
//! # Ok(())
//! # }
//! ```

mod audit_store;
mod queue;

pub use audit_store::InMemoryAuditStore;
pub use queue::{DEFAULT_VISIBILITY_TIMEOUT, InMemoryBus, InMemoryQueue, InMemoryTopic};

use chrono::{DateTime, Utc};
use product_audit_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use product_audit_testing::mocks::FixedClock;
    /// use product_audit_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Shared between a component under test and the test body, so the test
    /// can step time past a TTL or pin two writes to the same millisecond.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `delta`.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += delta;
        }

        /// Jump to `time`.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is a valid constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now_millis(), 1_735_689_600_000);
    }

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new(test_clock().now());
        let start = clock.now_millis();
        assert_eq!(clock.now_millis(), start);

        clock.advance(chrono::Duration::milliseconds(250));
        assert_eq!(clock.now_millis(), start + 250);

        clock.set(test_clock().now());
        assert_eq!(clock.now_millis(), start);
    }
}
