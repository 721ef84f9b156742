//! Engine error types.
//!
//! All synchronous, caller-facing failures of the engine facade surface
//! through [`EngineError`]. Failures that belong to a *task's* lifecycle
//! (the callable's own error, or a timeout) live in [`TaskError`] instead,
//! since they are stored in the task's Result Cell rather than returned
//! synchronously from an API call.

use crate::task::{Priority, TaskId};

/// Unified error type for the engine facade's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The referenced task does not exist in the registry (either it was
    /// never submitted, or it has been evicted under the retention bound).
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    /// The target priority queue is full and no delay was specified.
    #[error("queue full for priority {priority:?}")]
    QueueFull { priority: Priority },

    /// The engine is not `Running` (it has not been started, or `stop`
    /// has already been called).
    #[error("engine is not accepting submissions")]
    EngineStopped,

    /// A caller-level state transition was invalid (e.g. `start` called
    /// while the engine is stopping).
    #[error("illegal engine state transition: {reason}")]
    IllegalState { reason: String },

    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant. Prefer a typed variant whenever possible.
    #[error("internal engine error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Boxed error produced by a user-supplied task callable.
pub type BoxedTaskError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failure of a single task, stored in its Result Cell.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The callable returned or raised an error.
    #[error("task failed: {0}")]
    User(#[source] BoxedTaskError),

    /// Execution exceeded the task's configured timeout.
    #[error("task timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },
}

impl TaskError {
    /// Short machine-readable kind, useful for stats and logging without
    /// formatting the full error chain.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::User(_) => "user_error",
            TaskError::Timeout { .. } => "timeout",
        }
    }
}
