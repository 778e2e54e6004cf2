use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the runner's lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCounts {
    pub submitted: u64,
    pub in_flight: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub aborted: u64,
    pub rejected: u64,
}

/// Snapshot of the aggregate cache's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reports served from memory.
    pub hits: u64,
    /// Full recomputations that completed.
    pub computations: u64,
    /// Recomputations that failed on a repository error.
    pub failures: u64,
    /// Number of `clear_cache` calls so far.
    pub epoch: u64,
    /// When the current epoch's report was computed, if it has been.
    pub last_computed_at: Option<DateTime<Utc>>,
}
