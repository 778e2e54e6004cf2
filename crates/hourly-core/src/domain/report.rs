//! ProjectHoursReport - プロジェクトごとの合計時間

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::ProjectId;

/// Total hours per project.
///
/// Built as a whole by the aggregate cache and handed out by value, so a
/// caller never sees a partially filled report. A project with no tasks has
/// no entry (absence, not zero).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectHoursReport {
    hours: BTreeMap<ProjectId, f64>,
}

impl ProjectHoursReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project: ProjectId) -> Option<f64> {
        self.hours.get(&project).copied()
    }

    pub fn len(&self) -> usize {
        self.hours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProjectId, f64)> + '_ {
        self.hours.iter().map(|(project, hours)| (*project, *hours))
    }

    pub fn projects(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.hours.keys().copied()
    }

    /// Sum over every project in the report.
    pub fn total_hours(&self) -> f64 {
        self.hours.values().sum()
    }
}

impl FromIterator<(ProjectId, f64)> for ProjectHoursReport {
    fn from_iter<I: IntoIterator<Item = (ProjectId, f64)>>(iter: I) -> Self {
        Self {
            hours: iter.into_iter().collect(),
        }
    }
}
