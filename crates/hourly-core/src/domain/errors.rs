//! Errors - エラー型と分類
//!
//! - `DataAccessError`: repository failures, surfaced to whoever asked for a report.
//! - `TaskError`: what a runner error callback receives.
//! - `RunnerError`: synchronous rejection at submission time.

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a unit of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A repository collaborator failed.
#[derive(Debug, Error)]
#[error("data access failed: {message}")]
pub struct DataAccessError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl DataAccessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Terminal failure of one submission, delivered through `on_error`.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The work returned an error.
    #[error("task failed: {0}")]
    Execution(#[source] BoxError),

    /// The work panicked. The pool thread survives.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// No result was observed within the caller's deadline.
    #[error("task timed out after {after:?}")]
    Timeout { after: Duration },

    /// The runner was force-terminated before the work settled.
    #[error("task aborted by runner shutdown")]
    ShutDown,
}

impl TaskError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    /// Raised by the work itself (error or panic), as opposed to the runner.
    pub fn is_execution(&self) -> bool {
        matches!(self, TaskError::Execution(_) | TaskError::Panicked(_))
    }
}

/// Submission was refused; no callback will fire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("runner is shut down and no longer accepts work")]
    ShutDown,
}
