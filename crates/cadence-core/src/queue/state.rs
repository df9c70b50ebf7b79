//! Run state of a queue.

use serde::{Deserialize, Serialize};

/// Run state.
///
/// Transitions:
/// - Open <-> Paused
/// - Open | Paused -> Stopped (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepts and dispatches tasks.
    Open,

    /// Accepts tasks but does not dispatch them.
    Paused,

    /// Rejects all pending and future work.
    Stopped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Stopped)
    }

    /// Can a pass dispatch tasks in this state?
    pub fn can_dispatch(self) -> bool {
        matches!(self, RunState::Open)
    }
}
