//! Offset bookkeeping for Kafka partitions.

use std::collections::BTreeMap;

/// Highest consumed offset per (topic, partition).
///
/// Offsets recorded here are the offsets of consumed messages; committing
/// them stores `offset + 1` as the next position to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionOffsets {
    offsets: BTreeMap<(String, i32), i64>,
}

impl PartitionOffsets {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a consumed offset, keeping the highest seen per partition.
    pub fn observe(&mut self, topic: &str, partition: i32, offset: i64) {
        self.offsets
            .entry((topic.to_string(), partition))
            .and_modify(|current| *current = (*current).max(offset))
            .or_insert(offset);
    }

    /// Fold another set into this one.
    pub fn merge(&mut self, other: &PartitionOffsets) {
        for ((topic, partition), offset) in other.iter() {
            self.observe(topic, partition, offset);
        }
    }

    /// Highest consumed offset for a partition.
    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets.get(&(topic.to_string(), partition)).copied()
    }

    /// Iterate as `((topic, partition), offset)`.
    pub fn iter(&self) -> impl Iterator<Item = ((&str, i32), i64)> {
        self.offsets
            .iter()
            .map(|((topic, partition), offset)| ((topic.as_str(), *partition), *offset))
    }

    /// Number of partitions tracked.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True if no offsets have been observed.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Forget every offset.
    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}

/// Tracks consumed vs. committed offsets to report uncommitted lag.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    first_consumed: BTreeMap<(String, i32), i64>,
    consumed: PartitionOffsets,
    committed: PartitionOffsets,
}

impl OffsetTracker {
    /// Create a new offset tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a consumed message position.
    pub fn update_consumed(&mut self, topic: &str, partition: i32, offset: i64) {
        self.first_consumed
            .entry((topic.to_string(), partition))
            .and_modify(|first| *first = (*first).min(offset))
            .or_insert(offset);
        self.consumed.observe(topic, partition, offset);
    }

    /// Record positions that were durably committed.
    pub fn mark_committed(&mut self, offsets: &PartitionOffsets) {
        self.committed.merge(offsets);
    }

    /// Last consumed offset for a partition.
    pub fn get_consumed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.consumed.get(topic, partition)
    }

    /// Last committed offset for a partition.
    pub fn get_committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.committed.get(topic, partition)
    }

    /// Messages consumed but not yet committed, summed across partitions.
    ///
    /// Before the first commit a partition counts from the first offset this
    /// process consumed, not from zero.
    pub fn uncommitted(&self) -> u64 {
        self.consumed
            .iter()
            .map(|((topic, partition), consumed)| {
                let behind = match self.committed.get(topic, partition) {
                    Some(committed) => consumed - committed,
                    None => {
                        let first = self
                            .first_consumed
                            .get(&(topic.to_string(), partition))
                            .copied()
                            .unwrap_or(consumed);
                        consumed - first + 1
                    }
                };
                behind.max(0) as u64
            })
            .sum()
    }

    /// Every committed position, for the final commit on close.
    pub fn committed(&self) -> &PartitionOffsets {
        &self.committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_keeps_highest_offset() {
        let mut offsets = PartitionOffsets::new();
        offsets.observe("vehicle_positions", 0, 10);
        offsets.observe("vehicle_positions", 0, 7);
        offsets.observe("vehicle_positions", 1, 3);

        assert_eq!(offsets.get("vehicle_positions", 0), Some(10));
        assert_eq!(offsets.get("vehicle_positions", 1), Some(3));
        assert_eq!(offsets.get("vehicle_positions", 2), None);
        assert_eq!(offsets.len(), 2);
    }

    #[test]
    fn test_merge() {
        let mut a = PartitionOffsets::new();
        a.observe("t", 0, 5);
        let mut b = PartitionOffsets::new();
        b.observe("t", 0, 9);
        b.observe("t", 1, 1);

        a.merge(&b);
        let collected: Vec<_> = a.iter().collect();
        assert_eq!(collected, vec![(("t", 0), 9), (("t", 1), 1)]);
    }

    #[test]
    fn test_offset_tracker_uncommitted() {
        let mut tracker = OffsetTracker::new();
        for offset in 0..=99 {
            tracker.update_consumed("t", 0, offset);
        }
        tracker.update_consumed("t", 1, 4);
        // Partition 1 was first read at offset 4
        assert_eq!(tracker.uncommitted(), 100 + 1);

        let mut committed = PartitionOffsets::new();
        committed.observe("t", 0, 89);
        committed.observe("t", 1, 4);
        tracker.mark_committed(&committed);

        assert_eq!(tracker.get_committed("t", 0), Some(89));
        assert_eq!(tracker.get_consumed("t", 0), Some(99));
        assert_eq!(tracker.uncommitted(), 10);
    }

    #[test]
    fn test_uncommitted_counts_from_first_consumed_offset() {
        let mut tracker = OffsetTracker::new();
        // Retention moved the low watermark to 1000
        for offset in 1000..1010 {
            tracker.update_consumed("vehicle_positions", 0, offset);
        }
        assert_eq!(tracker.uncommitted(), 10);

        let mut committed = PartitionOffsets::new();
        committed.observe("vehicle_positions", 0, 1004);
        tracker.mark_committed(&committed);
        assert_eq!(tracker.uncommitted(), 5);
    }
}
