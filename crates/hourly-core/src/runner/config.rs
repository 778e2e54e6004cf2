//! Runner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool settings.
///
/// Missing fields fall back to `default_v1()`, so a partial JSON document is
/// a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of work items that may execute at the same time.
    /// Submissions beyond this wait in a FIFO queue.
    pub pool_size: usize,

    /// Default grace period for `shutdown` before workers are force-terminated.
    pub drain_timeout_ms: u64,
}

impl RunnerConfig {
    /// Defaults used by the desktop host: five workers, five second drain.
    pub fn default_v1() -> Self {
        Self {
            pool_size: 5,
            drain_timeout_ms: 5_000,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Pool size actually used; a zero-sized pool would never run anything.
    pub(crate) fn effective_pool_size(&self) -> usize {
        self.pool_size.max(1)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}
