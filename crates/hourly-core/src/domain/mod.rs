//! Domain model (IDs, task rows, reports, errors).

pub mod errors;
pub mod ids;
pub mod report;
pub mod task;

pub use self::errors::{BoxError, DataAccessError, RunnerError, TaskError};
pub use self::ids::{Id, IdMarker, ProjectId, TaskHandle, TaskId};
pub use self::report::ProjectHoursReport;
pub use self::task::TrackedTask;
