//! In-memory repositories for the demo host and tests.
//!
//! The real record store (SQL, connection pool) is out of scope; these keep
//! rows in maps guarded by `parking_lot::RwLock`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::{DataAccessError, TaskId, TrackedTask};
use crate::ports::{TaskRepository, TimeLogRepository};

/// Task rows keyed by id.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, TrackedTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = TrackedTask>) -> Self {
        let repo = Self::new();
        for task in tasks {
            repo.insert(task);
        }
        repo
    }

    /// Insert or replace a task row.
    pub fn insert(&self, task: TrackedTask) {
        self.tasks.write().insert(task.id, task);
    }

    pub fn remove(&self, id: TaskId) -> Option<TrackedTask> {
        self.tasks.write().remove(&id)
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn list_all_tasks(&self) -> Result<Vec<TrackedTask>, DataAccessError> {
        let mut tasks: Vec<TrackedTask> = self.tasks.read().values().copied().collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }
}

/// Time log entries, stored as a list of hours per task.
#[derive(Default)]
pub struct InMemoryTimeLogRepository {
    logs: RwLock<HashMap<TaskId, Vec<f64>>>,
}

impl InMemoryTimeLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one time log entry against `task`.
    ///
    /// Entries must be within (0, 24] hours, the same bound a time log row
    /// is validated against before it is stored.
    pub fn log_hours(&self, task: TaskId, hours: f64) -> Result<(), DataAccessError> {
        if !(hours > 0.0 && hours <= 24.0) {
            return Err(DataAccessError::new(format!(
                "invalid time log for {task}: {hours} hours"
            )));
        }
        self.logs.write().entry(task).or_default().push(hours);
        Ok(())
    }
}

impl TimeLogRepository for InMemoryTimeLogRepository {
    fn total_hours_for_task(&self, task: TaskId) -> Result<f64, DataAccessError> {
        Ok(self
            .logs
            .read()
            .get(&task)
            .map(|entries| entries.iter().sum())
            .unwrap_or(0.0))
    }
}
