//! cadence-core
//!
//! Cooperative task scheduling and activity lifecycles.
//!
//! # Modules
//! - **scheduler**: registry of named queues and the global error sink
//! - **queue**: priority queues with parallelism, time-sliced passes, pause/stop, timeouts
//! - **activity**: activate/deactivate state machine with hooks and an active task queue
//! - **error**: error types for tasks, queues, transitions and the scheduler
//! - **observability**: queue snapshots and `tracing` setup
//! - **domain**: typed identifiers

pub mod activity;
pub mod domain;
pub mod error;
pub mod observability;
pub mod queue;
pub mod scheduler;
mod settle;

pub use activity::{Activity, ActivityEvent, ActivityHooks, ActivityPhase, Direction, NoopHooks};
pub use error::{BoxError, QueueError, SchedulerError, TaskError, TransitionError};
pub use queue::{Operation, QueueOptions, RunState, TaskHandle, TaskQueue};
pub use scheduler::{ErrorSink, Scheduler, TracingErrorSink};
pub use settle::Settlement;
