//! Scheduler: registry of named queues and the global error sink.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::error::{SchedulerError, TaskError};
use crate::queue::{QueueOptions, TaskQueue};

/// Receiver of task failures that no `catch_errors` queue collected.
pub trait ErrorSink: Send + Sync {
    fn report(&self, queue: &str, error: &TaskError);
}

/// Default sink: logs the failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, queue: &str, error: &TaskError) {
        error!(queue, error = %error, "uncaught task failure");
    }
}

/// Install-once slot shared by the scheduler and all of its queues.
#[derive(Default)]
pub(crate) struct SinkSlot {
    sink: OnceLock<Arc<dyn ErrorSink>>,
}

impl SinkSlot {
    fn install(&self, sink: Arc<dyn ErrorSink>) -> Result<(), SchedulerError> {
        self.sink
            .set(sink)
            .map_err(|_| SchedulerError::ErrorSinkInstalled)
    }

    pub(crate) fn report(&self, queue: &str, error: &TaskError) {
        match self.sink.get() {
            Some(sink) => sink.report(queue, error),
            None => TracingErrorSink.report(queue, error),
        }
    }
}

/// Registry of named queues (name -> queue).
///
/// Cheap to clone; every clone sees the same registry and error sink, so
/// the scheduler is passed explicitly to whatever needs to schedule work.
///
/// Creation, replacement and lookup happen under one lock, so two creations
/// for the same name never interleave.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    queues: Mutex<HashMap<String, Arc<TaskQueue>>>,
    sink: Arc<SinkSlot>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler whose uncaught failures go to `sink`.
    pub fn with_error_sink(sink: Arc<dyn ErrorSink>) -> Self {
        let scheduler = Self::new();
        // a fresh slot is always empty
        let _ = scheduler.inner.sink.install(sink);
        scheduler
    }

    /// Install the error sink. Only the first installation wins.
    pub fn set_error_sink(&self, sink: Arc<dyn ErrorSink>) -> Result<(), SchedulerError> {
        self.inner.sink.install(sink)
    }

    /// Look up or create the queue called `name`.
    ///
    /// With `allow_replace == false` an existing queue is returned unchanged
    /// (and `options` ignored). With `allow_replace == true` the existing
    /// queue is stopped and a fresh one takes its name.
    pub fn create_queue(
        &self,
        name: &str,
        allow_replace: bool,
        options: QueueOptions,
    ) -> Arc<TaskQueue> {
        let (queue, replaced) = {
            let mut queues = self.inner.queues.lock();
            if !allow_replace && let Some(existing) = queues.get(name) {
                return Arc::clone(existing);
            }
            let queue = TaskQueue::new(name, options, Arc::clone(&self.inner.sink));
            let replaced = queues.insert(name.to_string(), Arc::clone(&queue));
            (queue, replaced)
        };

        if let Some(old) = replaced {
            info!(queue = name, old = %old.id(), new = %queue.id(), "queue replaced");
            old.stop();
        } else {
            info!(queue = name, id = %queue.id(), "queue created");
        }
        queue
    }

    pub fn queue(&self, name: &str) -> Option<Arc<TaskQueue>> {
        self.inner.queues.lock().get(name).cloned()
    }

    /// Remove the named queue from the registry and stop it.
    pub fn remove_queue(&self, name: &str) -> Result<Arc<TaskQueue>, SchedulerError> {
        let queue = self
            .inner
            .queues
            .lock()
            .remove(name)
            .ok_or_else(|| SchedulerError::UnknownQueue(name.to_string()))?;
        queue.stop();
        info!(queue = name, "queue removed");
        Ok(queue)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// A queue that shares this scheduler's error sink but is not indexed
    /// by name.
    pub fn detached_queue(&self, name: impl Into<String>, options: QueueOptions) -> Arc<TaskQueue> {
        TaskQueue::new(name, options, Arc::clone(&self.inner.sink))
    }

    /// Route a failure to the installed error sink.
    pub fn report(&self, queue: &str, error: &TaskError) {
        self.inner.sink.report(queue, error);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queues", &self.queue_names())
            .finish()
    }
}
