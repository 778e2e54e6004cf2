//! Task rows as seen by the report computation.

use serde::{Deserialize, Serialize};

use super::ids::{ProjectId, TaskId};

/// A task known to the record store.
///
/// Only the fields the hours report needs; titles, assignees and status stay
/// in the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedTask {
    pub id: TaskId,
    pub project_id: ProjectId,
}

impl TrackedTask {
    pub fn new(id: i64, project_id: i64) -> Self {
        Self {
            id: TaskId(id),
            project_id: ProjectId(project_id),
        }
    }
}
