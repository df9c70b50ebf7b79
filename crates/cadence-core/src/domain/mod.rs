//! Domain model: typed identifiers.

pub mod ids;

pub use ids::{ActivityId, Id, IdMarker, QueueId, TaskId};
