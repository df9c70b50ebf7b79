//! Units of work and the handle passed to them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::domain::TaskId;
use crate::error::BoxError;

pub(crate) type OperationFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

type SyncFn = Box<dyn FnOnce(&TaskHandle) -> Result<(), BoxError> + Send>;
type FutureFn = Box<dyn FnOnce(TaskHandle) -> OperationFuture + Send>;

/// The work a task performs.
///
/// - `Sync` runs to completion inside `TaskQueue::run`.
/// - `Future` is started by `run` and completes later on the tokio runtime;
///   it occupies a parallel slot until it settles.
pub enum Operation {
    Sync(SyncFn),
    Future(FutureFn),
}

impl Operation {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce(&TaskHandle) -> Result<(), BoxError> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::Future(Box::new(move |handle| Box::pin(f(handle))))
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Operation::Sync"),
            Self::Future(_) => f.write_str("Operation::Future"),
        }
    }
}

/// Handle given to a running operation.
///
/// Cancellation is cooperative: stopping the queue (or a timeout) flips the
/// flag, and a long-running operation is expected to poll `is_cancelled()`
/// or await `cancelled()` and return early.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancel: Arc<CancelFlag>,
}

struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            cancel: Arc::new(CancelFlag {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the task is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // register before checking the flag so a concurrent cancel is not missed
            let notified = self.cancel.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancelled.store(true, Ordering::Release);
        self.cancel.notify.notify_waiters();
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_handle_is_not_cancelled() {
        let handle = TaskHandle::new(TaskId::generate());
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiting_operation() {
        let handle = TaskHandle::new(TaskId::generate());
        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.cancelled().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[test]
    fn constructors_pick_the_right_variant() {
        assert!(Operation::sync(|_| Ok(())).is_sync());
        assert!(!Operation::future(|_| async { Ok(()) }).is_sync());
    }
}
