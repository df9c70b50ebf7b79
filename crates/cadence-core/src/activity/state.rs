//! Activity phases and the transition table.
//!
//! The table is a pure function of the current slots so every rule can be
//! checked without running hooks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of an activity.
///
/// State transitions:
/// - Inactive -> Activating -> Active
/// - Active -> Deactivating -> Inactive
/// - any -> Unlinked (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPhase {
    Inactive,
    Activating,
    Active,
    Deactivating,
    Unlinked,
}

/// Direction of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Activate,
    Deactivate,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Activate => Direction::Deactivate,
            Direction::Deactivate => Direction::Activate,
        }
    }

    /// Steady phase reached once the transition completes.
    pub fn target(self) -> ActivityPhase {
        match self {
            Direction::Activate => ActivityPhase::Active,
            Direction::Deactivate => ActivityPhase::Inactive,
        }
    }

    /// Phase reported while the transition is queued or running.
    pub fn in_progress(self) -> ActivityPhase {
        match self {
            Direction::Activate => ActivityPhase::Activating,
            Direction::Deactivate => ActivityPhase::Deactivating,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Activate => f.write_str("activate"),
            Direction::Deactivate => f.write_str("deactivate"),
        }
    }
}

/// What the state machine currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slots {
    pub unlinked: bool,
    /// Active or Inactive.
    pub steady: ActivityPhase,
    pub running: Option<Direction>,
    pub pending: Option<Direction>,
}

impl Slots {
    pub fn phase(&self) -> ActivityPhase {
        if self.unlinked {
            return ActivityPhase::Unlinked;
        }
        match (self.running, self.pending) {
            (Some(running), _) => running.in_progress(),
            (None, Some(pending)) => pending.in_progress(),
            (None, None) => self.steady,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    RejectUnlinked,
    /// Already in the target steady state.
    Complete,
    JoinPending,
    JoinRunning,
    /// Create the pending request; `dispatch` when nothing is running.
    Enqueue { dispatch: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Plan {
    /// Cancel the opposite pending request before acting.
    pub cancel_pending: bool,
    pub action: Action,
}

/// Decide how a request toward `target` is handled.
pub(crate) fn plan(slots: Slots, target: Direction) -> Plan {
    if slots.unlinked {
        return Plan {
            cancel_pending: false,
            action: Action::RejectUnlinked,
        };
    }

    let cancel_pending = slots.pending == Some(target.opposite());
    let pending = if cancel_pending { None } else { slots.pending };

    let action = match (pending, slots.running) {
        (Some(_), _) => Action::JoinPending,
        (None, Some(running)) if running == target => Action::JoinRunning,
        (None, Some(_)) => Action::Enqueue { dispatch: false },
        (None, None) if slots.steady == target.target() => Action::Complete,
        (None, None) => Action::Enqueue { dispatch: true },
    };

    Plan {
        cancel_pending,
        action,
    }
}
