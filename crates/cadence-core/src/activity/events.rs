use serde::{Deserialize, Serialize};

/// Notification published by an activity.
///
/// `Active` and `Inactive` fire once per completed transition, no matter how
/// many callers were attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    Active,
    Inactive,
    Unlinked,
}
