use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Per-Partition Commit Watermarks
// ============================================================================
//
// Handlers run concurrently, so offsets of one partition may finish out of
// order. Committing offset N tells the group that everything up to N is done,
// so the committed position may only advance over a contiguous run of
// successes:
//
//   dispatched:  10 11 12 13
//   succeeded:   10    12 13      → commit 10
//   succeeded:   10 11 12 13      → commit 13
//
// A failed offset stays pending and holds the watermark of its partition.
// `failed` returns the lowest failed offset not yet dispatched again; the
// consumer rewinds the partition there so the fetch after it delivers the
// message again. Successes above it are re-handled on that pass.
//
// ============================================================================

#[derive(Debug, Default)]
struct PartitionState {
    /// Dispatched to a handler, not yet handled successfully
    pending: BTreeSet<i64>,
    /// Handled successfully, above the committed watermark
    completed: BTreeSet<i64>,
    /// Failed and waiting for redelivery
    failed: BTreeSet<i64>,
    last_committed: Option<i64>,
}

#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionState>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an offset was handed to a handler
    pub fn dispatched(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        state.pending.insert(offset);
        state.failed.remove(&offset);
    }

    /// Record a failed handling and return where the partition has to be
    /// rewound, if anywhere.
    pub fn failed(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;

        // Another delivery of the same offset already succeeded
        if state.completed.contains(&offset)
            || state.last_committed.is_some_and(|committed| offset <= committed)
        {
            return None;
        }

        state.pending.insert(offset);
        state.failed.insert(offset);
        state.failed.first().copied()
    }

    /// Record a successful handling and return the offset to commit, if the
    /// watermark moved.
    pub fn completed(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;

        state.pending.remove(&offset);
        state.failed.remove(&offset);
        if state.last_committed.is_some_and(|committed| offset <= committed) {
            return None;
        }
        state.completed.insert(offset);

        let watermark = match state.pending.first() {
            Some(&blocking) => state.completed.range(..blocking).next_back().copied(),
            None => state.completed.last().copied(),
        }?;

        state.completed = state.completed.split_off(&(watermark + 1));
        state.last_committed = Some(watermark);
        Some(watermark)
    }

    /// Successes held back by an earlier pending offset
    pub fn held(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |state| state.completed.len())
    }

    /// Offsets of a partition that were dispatched and are not yet handled
    pub fn pending(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |state| state.pending.len())
    }
}
