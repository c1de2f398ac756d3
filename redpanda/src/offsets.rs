//! Commit positions for out-of-order settlement.
//!
//! Deliveries from one partition can be acked or nacked in any order, but a
//! Kafka commit covers every offset below it. [`OffsetTracker`] only hands out
//! a commit position once every tracked offset below it is settled, so a
//! restart resumes at the oldest record still in flight.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    pending: BTreeSet<i64>,
    settled: BTreeSet<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    fn watermark(&self) -> Option<i64> {
        self.pending
            .first()
            .copied()
            .or_else(|| self.settled.last().map(|offset| offset + 1))
    }
}

/// Low watermark per topic partition.
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    /// Register a received record as unsettled.
    pub(crate) fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self.partitions.entry((topic.to_string(), partition)).or_default();
        // Nothing below the first record of a partition is ours to commit.
        if state.committed.is_none() {
            state.committed = Some(offset);
        }
        state.settled.remove(&offset);
        state.pending.insert(offset);
    }

    /// Mark a record settled.
    ///
    /// Returns the position to commit when the watermark advanced past the
    /// last one handed out.
    pub(crate) fn settle(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !state.pending.remove(&offset) {
            return None;
        }
        state.settled.insert(offset);

        let watermark = state.watermark()?;
        state.settled = state.settled.split_off(&watermark);

        if state.committed.is_some_and(|committed| committed >= watermark) {
            return None;
        }
        state.committed = Some(watermark);
        Some(watermark)
    }

    /// Last position handed out (or the first tracked offset) for a partition.
    #[cfg(test)]
    pub(crate) fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .and_then(|state| state.committed)
    }

    /// Records tracked but not yet settled, across all partitions.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.partitions.values().map(|state| state.pending.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "product-events";

    #[test]
    fn later_offset_settled_first_holds_the_watermark() {
        let mut tracker = OffsetTracker::default();
        tracker.track(TOPIC, 0, 4);
        tracker.track(TOPIC, 0, 5);

        assert_eq!(tracker.settle(TOPIC, 0, 5), None);
        assert_eq!(tracker.committed(TOPIC, 0), Some(4));

        assert_eq!(tracker.settle(TOPIC, 0, 4), Some(6));
        assert_eq!(tracker.committed(TOPIC, 0), Some(6));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn in_order_settlement_advances_one_by_one() {
        let mut tracker = OffsetTracker::default();
        for offset in 10..13 {
            tracker.track(TOPIC, 0, offset);
        }

        assert_eq!(tracker.settle(TOPIC, 0, 10), Some(11));
        assert_eq!(tracker.settle(TOPIC, 0, 11), Some(12));
        assert_eq!(tracker.settle(TOPIC, 0, 12), Some(13));
    }

    #[test]
    fn filtered_record_behind_an_unsettled_one_is_not_committed() {
        let mut tracker = OffsetTracker::default();
        tracker.track(TOPIC, 0, 7);
        tracker.track(TOPIC, 0, 8);

        // 8 filtered out immediately, 7 still being handled
        assert_eq!(tracker.settle(TOPIC, 0, 8), None);
        assert_eq!(tracker.committed(TOPIC, 0), Some(7));
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn partitions_are_independent() {
        let mut tracker = OffsetTracker::default();
        tracker.track(TOPIC, 0, 1);
        tracker.track(TOPIC, 1, 1);
        tracker.track("product-events-redelivery", 0, 1);

        assert_eq!(tracker.settle(TOPIC, 1, 1), Some(2));
        assert_eq!(tracker.committed(TOPIC, 0), Some(1));
        assert_eq!(tracker.committed("product-events-redelivery", 0), Some(1));
    }

    #[test]
    fn unknown_or_repeated_settlement_is_ignored() {
        let mut tracker = OffsetTracker::default();
        assert_eq!(tracker.settle(TOPIC, 0, 3), None);

        tracker.track(TOPIC, 0, 3);
        assert_eq!(tracker.settle(TOPIC, 0, 3), Some(4));
        assert_eq!(tracker.settle(TOPIC, 0, 3), None);
    }

    #[test]
    fn redelivered_record_after_rebalance_is_tracked_again() {
        let mut tracker = OffsetTracker::default();
        tracker.track(TOPIC, 0, 4);
        tracker.track(TOPIC, 0, 5);
        assert_eq!(tracker.settle(TOPIC, 0, 5), None);

        // Same records fetched again from the committed position
        tracker.track(TOPIC, 0, 4);
        tracker.track(TOPIC, 0, 5);
        assert_eq!(tracker.pending(), 2);
        assert_eq!(tracker.settle(TOPIC, 0, 4), Some(5));
        assert_eq!(tracker.settle(TOPIC, 0, 5), Some(6));
    }
}
