//! Bounded redelivery before dead-lettering.
//!
//! A queue redelivers a message that was not acknowledged until it has been
//! received `max_receive_count` times. After that the message is moved to the
//! dead-letter queue shared by the product and failure queues. The bound
//! belongs to the queue, not to the consumer: consumers only ack or nack.

/// Default number of deliveries before a message is dead-lettered.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;

/// Default name of the shared dead-letter queue.
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "product-events-dlq";

/// Redelivery bound and dead-letter destination of a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedrivePolicy {
    /// Deliveries allowed before the message is dead-lettered
    pub max_receive_count: u32,
    /// Dead-letter queue name
    pub dead_letter_queue: String,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
        }
    }
}

impl RedrivePolicy {
    /// Policy with an explicit bound and destination.
    ///
    /// A bound of zero is raised to one: every message gets at least one delivery.
    #[must_use]
    pub fn new(max_receive_count: u32, dead_letter_queue: impl Into<String>) -> Self {
        Self {
            max_receive_count: max_receive_count.max(1),
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    /// True once a message received `receive_count` times must not be delivered again.
    #[must_use]
    pub const fn is_exhausted(&self, receive_count: u32) -> bool {
        receive_count >= self.max_receive_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_three_deliveries() {
        let policy = RedrivePolicy::default();
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert_eq!(policy.dead_letter_queue, "product-events-dlq");
    }

    #[test]
    fn zero_bound_still_delivers_once() {
        let policy = RedrivePolicy::new(0, "dlq");
        assert_eq!(policy.max_receive_count, 1);
        assert!(!policy.is_exhausted(0));
        assert!(policy.is_exhausted(1));
    }
}
