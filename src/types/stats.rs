//! Session statistics.

use std::collections::HashSet;

use serde::Serialize;

/// Cumulative counters for one client session.
///
/// Counters only grow between resets, and `unique_tags.len() <= total_reads`
/// always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    total_reads: u64,
    unique_tags: HashSet<String>,
}

impl SessionStats {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one tag read and returns the updated snapshot.
    pub fn record(&mut self, tag_id: &str) -> StatsSnapshot {
        self.total_reads += 1;
        if !self.unique_tags.contains(tag_id) {
            self.unique_tags.insert(tag_id.to_owned());
        }
        self.snapshot()
    }

    /// Clears both counters.
    pub fn reset(&mut self) {
        self.total_reads = 0;
        self.unique_tags.clear();
    }

    /// Total reads since the last reset.
    #[must_use]
    pub const fn total_reads(&self) -> u64 {
        self.total_reads
    }

    /// Distinct tag identifiers seen since the last reset.
    #[must_use]
    pub const fn unique_tags(&self) -> &HashSet<String> {
        &self.unique_tags
    }

    /// Returns the counters as a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total_reads,
            unique: self.unique_tags.len(),
        }
    }
}

/// Point-in-time copy of [`SessionStats`] carried by `stats` events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Total reads.
    pub total: u64,
    /// Distinct tags.
    pub unique: usize,
}
