use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::activity::Direction;
use crate::domain::TaskId;

/// Error type returned by user operations and activity hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared form of [`BoxError`], so one failure can reach several waiters.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single task.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("{task} timed out after {after:?}")]
    Timeout { task: TaskId, after: Duration },

    #[error("{task} failed: {source}")]
    Failed {
        task: TaskId,
        #[source]
        source: SharedError,
    },

    #[error("{task} panicked")]
    Panicked { task: TaskId },

    #[error("{task} needs a tokio runtime to run a long-running operation")]
    NoRuntime { task: TaskId },
}

impl TaskError {
    pub(crate) fn failed(task: TaskId, source: BoxError) -> Self {
        Self::Failed {
            task,
            source: Arc::from(source),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Error surfaced by `TaskQueue::add` and `TaskQueue::wait`.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue `{queue}` stopped")]
    Stopped { queue: String },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("queue `{queue}` collected {count} task failure(s)", count = .failures.len())]
    Collected {
        queue: String,
        failures: Vec<TaskError>,
    },
}

impl QueueError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

/// Outcome of a rejected activation or deactivation request.
///
/// `Cancelled` and `Unlinked` mean the hook never ran for this request;
/// `Hook` means it ran and reported a problem.
#[derive(Debug, Clone, Error)]
pub enum TransitionError {
    #[error("activity is unlinked")]
    Unlinked,

    #[error("{direction} request cancelled by an opposite request")]
    Cancelled { direction: Direction },

    #[error("{direction} hook failed: {source}")]
    Hook {
        direction: Direction,
        #[source]
        source: SharedError,
    },

    #[error("{direction} request interrupted: transition queue stopped")]
    Interrupted { direction: Direction },
}

impl TransitionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_hook_failure(&self) -> bool {
        matches!(self, Self::Hook { .. })
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("an error sink is already installed")]
    ErrorSinkInstalled,

    #[error("no queue named `{0}`")]
    UnknownQueue(String),
}
