//! # Product Audit Core
//!
//! Core types for the product event pipeline.
//!
//! The Products service publishes an event after every product mutation (and
//! after every failed one). A topic fans those events out to two filtered
//! queues; the Audit service consumes both and writes a short-lived audit
//! record for each message.
//!
//! ```text
//! product mutation ─▶ publish ─▶ topic ─┬─▶ product-events ─────────┐
//!                                       └─▶ product-failure-events ─┤
//!                                                                   ▼
//!                                      consumer ─▶ dispatch ─▶ audit store
//!                                          │
//!                                          └─ nack ×3 ─▶ dead-letter queue
//! ```
//!
//! This crate holds everything that needs no I/O:
//!
//! - [`event`]: event kinds and payloads
//! - [`envelope`]: the transport envelope codec
//! - [`routing`]: subscription filter policies
//! - [`redrive`]: the retry bound and dead-letter destination
//! - [`audit`]: the audit record model and the [`audit::AuditStore`] port
//! - [`transport`]: the [`transport::Topic`] and [`transport::MessageQueue`] ports
//! - [`dispatch`]: failure taxonomy and ack/nack classification
//! - [`context`]: request and trace correlation

pub mod audit;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod event;
pub mod redrive;
pub mod routing;
pub mod transport;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - Dependency injection traits
///
/// External dependencies are abstracted behind traits and injected into the
/// publisher, the consumers and the audit recorder.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic audit keys
    /// let clock = FixedClock::new(time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current time in epoch milliseconds
        fn now_millis(&self) -> i64 {
            self.now().timestamp_millis()
        }
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_millis_match_now() {
        let clock = SystemClock;
        let before = clock.now().timestamp_millis();
        let millis = clock.now_millis();
        assert!(millis >= before);
    }
}
