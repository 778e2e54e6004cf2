//! Repository ports - レコードストアへの読み取り専用インターフェース
//!
//! Schema, connections and SQL live behind these traits. The aggregate cache
//! only reads through them.

use crate::domain::{DataAccessError, TaskId, TrackedTask};

/// Lists the tasks the report is built from.
pub trait TaskRepository: Send + Sync {
    fn list_all_tasks(&self) -> Result<Vec<TrackedTask>, DataAccessError>;
}

/// Sums logged time per task.
pub trait TimeLogRepository: Send + Sync {
    /// Total hours logged against `task`; zero when nothing was logged.
    fn total_hours_for_task(&self, task: TaskId) -> Result<f64, DataAccessError>;
}
