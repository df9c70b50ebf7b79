//! Queue module: priority-ordered task queues with time-sliced passes.
//!
//! A queue holds pending tasks ordered by `(priority, insertion order)` and
//! dispatches them in passes. A pass (`TaskQueue::run`) runs synchronous
//! operations inline and starts long-running ones on the tokio runtime, up
//! to the parallelism limit, and yields once the synchronous budget is used
//! up. When a runtime is available, adding work or finishing a long-running
//! task schedules the next pass automatically.

mod operation;
mod options;
mod pending;
mod state;

pub use operation::{Operation, TaskHandle};
pub use options::QueueOptions;
pub use state::RunState;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use self::operation::OperationFuture;
use self::pending::{Inserted, PendingTask, PendingTasks};
use crate::domain::{QueueId, TaskId};
use crate::error::{QueueError, TaskError};
use crate::observability::QueueCounts;
use crate::scheduler::SinkSlot;
use crate::settle::{Settlement, Settler, settle};

/// Priority used by `add_default`.
pub const DEFAULT_PRIORITY: i32 = 0;

/// A named, independently scheduled queue of tasks.
///
/// Always handled through `Arc<TaskQueue>`; create one with
/// `Scheduler::create_queue` or `Scheduler::detached_queue`.
pub struct TaskQueue {
    id: QueueId,
    name: String,
    options: QueueOptions,
    sink: Arc<SinkSlot>,
    state: Mutex<QueueState>,
    this: Weak<TaskQueue>,
}

struct QueueState {
    run_state: RunState,
    pending: PendingTasks,
    /// Dispatched tasks that have not settled yet.
    running: HashMap<TaskId, TaskHandle>,
    errors: Vec<TaskError>,
    /// `errors[..reported]` were already delivered to a waiter.
    reported: usize,
    waiters: Vec<Waiter>,
    in_pass: bool,
    rerun: bool,
    pass_scheduled: bool,
    last_pass: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

struct Waiter {
    remaining: usize,
    settler: Settler<QueueError>,
}

type Delivery = (Settler<QueueError>, Result<(), QueueError>);

impl QueueState {
    fn new() -> Self {
        Self {
            run_state: RunState::Open,
            pending: PendingTasks::default(),
            running: HashMap::new(),
            errors: Vec::new(),
            reported: 0,
            waiters: Vec::new(),
            in_pass: false,
            rerun: false,
            pass_scheduled: false,
            last_pass: None,
            last_failure_at: None,
        }
    }

    fn count(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    fn has_ready_work(&self, parallel: usize) -> bool {
        self.run_state.can_dispatch() && !self.pending.is_empty() && self.running.len() < parallel
    }

    /// Result of the next settlement: collected failures are delivered once.
    fn settlement_result(&mut self, queue: &str, catch_errors: bool) -> Result<(), QueueError> {
        if catch_errors && self.reported < self.errors.len() {
            let failures = self.errors[self.reported..].to_vec();
            self.reported = self.errors.len();
            return Err(QueueError::Collected {
                queue: queue.to_string(),
                failures,
            });
        }
        Ok(())
    }

    fn take_satisfied(&mut self, queue: &str, catch_errors: bool) -> Vec<Delivery> {
        let count = self.count();
        let (ready, waiting): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| count <= w.remaining);
        self.waiters = waiting;
        if ready.is_empty() {
            return Vec::new();
        }

        let result = self.settlement_result(queue, catch_errors);
        ready
            .into_iter()
            .map(|w| (w.settler, result.clone()))
            .collect()
    }
}

impl TaskQueue {
    pub(crate) fn new(name: impl Into<String>, options: QueueOptions, sink: Arc<SinkSlot>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: QueueId::generate(),
            name: name.into(),
            options,
            sink,
            state: Mutex::new(QueueState::new()),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Pending plus running tasks.
    pub fn count(&self) -> usize {
        self.state.lock().count()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn running(&self) -> usize {
        self.state.lock().running.len()
    }

    /// Failures collected in `catch_errors` mode.
    pub fn errors(&self) -> Vec<TaskError> {
        self.state.lock().errors.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.state.lock().run_state
    }

    pub fn is_paused(&self) -> bool {
        self.run_state() == RunState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.run_state().is_terminal()
    }

    pub fn counts(&self) -> QueueCounts {
        let st = self.state.lock();
        QueueCounts {
            pending: st.pending.len(),
            running: st.running.len(),
            errors: st.errors.len(),
            paused: st.run_state == RunState::Paused,
            stopped: st.run_state.is_terminal(),
            last_failure_at: st.last_failure_at,
        }
    }

    /// Enqueue an operation. A stopped queue rejects it without running it.
    pub fn add(&self, operation: Operation, priority: i32) -> Result<TaskId, QueueError> {
        let id = {
            let mut st = self.state.lock();
            if st.run_state.is_terminal() {
                return Err(self.stopped());
            }
            st.pending.insert(operation, priority)
        };
        trace!(queue = %self.name, task = %id, priority, "task added");
        self.schedule_pass();
        Ok(id)
    }

    pub fn add_default(&self, operation: Operation) -> Result<TaskId, QueueError> {
        self.add(operation, DEFAULT_PRIORITY)
    }

    /// Replace the operation of the pending task registered under `key`, or
    /// add a new keyed task. A replaced task keeps its id, position and
    /// original priority.
    pub fn add_or_replace(
        &self,
        key: &str,
        operation: Operation,
        priority: i32,
    ) -> Result<TaskId, QueueError> {
        let inserted = {
            let mut st = self.state.lock();
            if st.run_state.is_terminal() {
                return Err(self.stopped());
            }
            st.pending.insert_or_replace(key, operation, priority)
        };

        match inserted {
            Inserted::New(id) => {
                trace!(queue = %self.name, task = %id, key, priority, "keyed task added");
                self.schedule_pass();
                Ok(id)
            }
            Inserted::Replaced(id, previous) => {
                drop(previous);
                trace!(queue = %self.name, task = %id, key, "pending task replaced");
                Ok(id)
            }
        }
    }

    /// One synchronous dispatch pass.
    ///
    /// Dispatches ready tasks until the queue is empty, paused, stopped, at
    /// its parallelism limit, or out of synchronous budget. The budget is
    /// checked after each task; a task is never interrupted.
    pub fn run(&self) {
        let started = Instant::now();
        {
            let mut st = self.state.lock();
            if st.in_pass {
                // re-entered (from an operation or a completion); the outer pass picks it up
                st.rerun = true;
                return;
            }
            st.in_pass = true;
            st.last_pass = Some(started);
        }

        let parallel = self.options.parallel_limit();
        let mut out_of_budget = false;
        let defer = loop {
            while let Some(task) = self.next_ready(parallel) {
                self.dispatch(task);
                if let Some(budget) = self.options.max_sync_time
                    && started.elapsed() >= budget
                {
                    out_of_budget = true;
                    break;
                }
            }

            let mut st = self.state.lock();
            if !out_of_budget && std::mem::take(&mut st.rerun) {
                continue;
            }
            st.in_pass = false;
            st.rerun = false;
            break out_of_budget && st.has_ready_work(parallel);
        };

        self.settle_waiters();
        if defer {
            debug!(
                queue = %self.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "sync budget exhausted, deferring remaining work"
            );
            self.schedule_pass();
        }
    }

    /// Stop dispatching new tasks. Running tasks are unaffected.
    pub fn pause(&self) {
        let mut st = self.state.lock();
        if st.run_state == RunState::Open {
            st.run_state = RunState::Paused;
            debug!(queue = %self.name, "queue paused");
        }
    }

    pub fn resume(&self) {
        let resumed = {
            let mut st = self.state.lock();
            let paused = st.run_state == RunState::Paused;
            if paused {
                st.run_state = RunState::Open;
            }
            paused
        };
        if resumed {
            debug!(queue = %self.name, "queue resumed");
            self.schedule_pass();
        }
    }

    /// Make the queue terminal.
    ///
    /// Pending tasks are discarded, outstanding waits reject with
    /// `QueueError::Stopped`, and running tasks see their handle cancelled.
    pub fn stop(&self) {
        let (discarded, in_flight, waiters) = {
            let mut st = self.state.lock();
            if st.run_state.is_terminal() {
                return;
            }
            st.run_state = RunState::Stopped;
            let in_flight: Vec<TaskHandle> = st.running.values().cloned().collect();
            (st.pending.drain(), in_flight, std::mem::take(&mut st.waiters))
        };

        info!(
            queue = %self.name,
            discarded = discarded.len(),
            in_flight = in_flight.len(),
            "queue stopped"
        );
        for task in &discarded {
            task.handle.cancel();
        }
        for handle in &in_flight {
            handle.cancel();
        }
        for waiter in waiters {
            settle(waiter.settler, Err(self.stopped()));
        }
    }

    /// Discard pending tasks without making the queue terminal.
    pub fn clear(&self) {
        let discarded = self.state.lock().pending.drain();
        for task in &discarded {
            task.handle.cancel();
        }
        debug!(queue = %self.name, discarded = discarded.len(), "queue cleared");
        drop(discarded);
        self.settle_waiters();
    }

    /// Wait until at most `remaining` tasks are pending or running.
    ///
    /// Rejects if the queue stops first or, outside `catch_errors` mode, if
    /// a task fails meanwhile. In `catch_errors` mode the first settlement
    /// after new failures rejects with `QueueError::Collected`.
    pub fn wait(&self, remaining: usize) -> Settlement<QueueError> {
        let mut st = self.state.lock();
        if st.run_state.is_terminal() {
            return Settlement::ready(Err(self.stopped()));
        }
        if st.count() <= remaining {
            return Settlement::ready(st.settlement_result(&self.name, self.options.catch_errors));
        }
        let (settler, settlement) = Settlement::channel(self.stopped());
        st.waiters.push(Waiter { remaining, settler });
        settlement
    }

    fn stopped(&self) -> QueueError {
        QueueError::Stopped {
            queue: self.name.clone(),
        }
    }

    fn next_ready(&self, parallel: usize) -> Option<PendingTask> {
        let mut st = self.state.lock();
        if !st.run_state.can_dispatch() || st.running.len() >= parallel {
            return None;
        }
        let task = st.pending.pop()?;
        st.running.insert(task.id(), task.handle.clone());
        Some(task)
    }

    fn dispatch(&self, task: PendingTask) {
        let PendingTask {
            handle, operation, ..
        } = task;
        let id = handle.id();

        match operation {
            Operation::Sync(f) => {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| f(&handle))) {
                    Ok(outcome) => outcome.map_err(|e| TaskError::failed(id, e)),
                    Err(_) => Err(TaskError::Panicked { task: id }),
                };
                self.finish(id, result);
            }
            Operation::Future(f) => {
                let (Ok(runtime), Some(queue)) = (Handle::try_current(), self.this.upgrade()) else {
                    self.finish(id, Err(TaskError::NoRuntime { task: id }));
                    return;
                };
                let timeout = self.options.task_timeout;
                let fut = f(handle.clone());
                runtime.spawn(async move {
                    let result = supervise(id, &handle, fut, timeout).await;
                    queue.finish(id, result);
                    queue.schedule_pass();
                });
            }
        }
    }

    /// Record the outcome of a dispatched task and release its slot.
    fn finish(&self, id: TaskId, result: Result<(), TaskError>) {
        let catch_errors = self.options.catch_errors;
        let mut uncaught = None;
        {
            let mut st = self.state.lock();
            if st.running.remove(&id).is_none() {
                return;
            }
            if let Err(err) = result {
                if st.run_state.is_terminal() {
                    debug!(queue = %self.name, task = %id, error = %err, "ignoring failure after stop");
                } else if catch_errors {
                    warn!(queue = %self.name, task = %id, error = %err, "task failed");
                    st.errors.push(err);
                    st.last_failure_at = Some(Utc::now());
                } else {
                    st.last_failure_at = Some(Utc::now());
                    uncaught = Some((err, std::mem::take(&mut st.waiters)));
                }
            }
        }

        if let Some((err, waiters)) = uncaught {
            for waiter in waiters {
                settle(waiter.settler, Err(QueueError::Task(err.clone())));
            }
            self.sink.report(&self.name, &err);
        }
        self.settle_waiters();
    }

    fn settle_waiters(&self) {
        let deliveries = self
            .state
            .lock()
            .take_satisfied(&self.name, self.options.catch_errors);
        for (settler, result) in deliveries {
            settle(settler, result);
        }
    }

    /// Schedule a pass on the ambient runtime, honouring `throttle_delay`
    /// measured from the start of the previous pass (automatic or explicit).
    /// Without a runtime the caller drives `run()` itself.
    fn schedule_pass(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let Some(queue) = self.this.upgrade() else {
            return;
        };

        let delay = {
            let mut st = self.state.lock();
            if st.pass_scheduled || !st.has_ready_work(self.options.parallel_limit()) {
                return;
            }
            st.pass_scheduled = true;
            self.throttle_remaining(st.last_pass)
        };

        runtime.spawn(async move {
            let mut delay = delay;
            loop {
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
                // an explicit run() may have happened while this pass slept
                delay = {
                    let mut st = queue.state.lock();
                    let remaining = queue.throttle_remaining(st.last_pass);
                    if remaining.is_zero() {
                        st.pass_scheduled = false;
                    }
                    remaining
                };
                if delay.is_zero() {
                    break;
                }
            }
            queue.run();
        });
    }

    /// Time left before the next automatic pass may start.
    fn throttle_remaining(&self, last_pass: Option<Instant>) -> Duration {
        match (self.options.throttle_delay, last_pass) {
            (Some(throttle), Some(last)) => throttle.saturating_sub(last.elapsed()),
            _ => Duration::ZERO,
        }
    }
}

/// Run a long-running operation to completion, racing `timeout`.
///
/// On timeout the operation keeps running detached with its handle
/// cancelled; whatever it returns later is ignored.
async fn supervise(
    id: TaskId,
    handle: &TaskHandle,
    fut: OperationFuture,
    timeout: Option<Duration>,
) -> Result<(), TaskError> {
    let mut join = tokio::spawn(fut);
    let joined = match timeout {
        None => join.await,
        Some(after) => match tokio::time::timeout(after, &mut join).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.cancel();
                return Err(TaskError::Timeout { task: id, after });
            }
        },
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TaskError::failed(id, e)),
        Err(_) => Err(TaskError::Panicked { task: id }),
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::error::BoxError;
    use crate::scheduler::{ErrorSink, Scheduler};

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, label: &'static str) -> Operation {
        let log = Arc::clone(log);
        Operation::sync(move |_| {
            log.lock().push(label);
            Ok(())
        })
    }

    fn failing(message: &'static str) -> Operation {
        Operation::sync(move |_| Err(BoxError::from(message)))
    }

    #[derive(Default)]
    struct CountingSink {
        reports: AtomicUsize,
    }

    impl ErrorSink for CountingSink {
        fn report(&self, _queue: &str, _error: &TaskError) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue(options: QueueOptions) -> Arc<TaskQueue> {
        Scheduler::new().create_queue("test", false, options)
    }

    #[test]
    fn lower_priority_value_runs_first() {
        let q = queue(QueueOptions::default());
        let log = Log::default();

        q.add(record(&log, "fn"), 10).unwrap();
        q.add(record(&log, "fn2"), 1).unwrap();
        q.run();

        assert_eq!(*log.lock(), vec!["fn2", "fn"]);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn equal_priority_runs_in_insertion_order() {
        let q = queue(QueueOptions::default());
        let log = Log::default();

        q.add(record(&log, "a"), 5).unwrap();
        q.add(record(&log, "b"), 5).unwrap();
        q.add(record(&log, "c"), 1).unwrap();
        q.add(record(&log, "d"), 5).unwrap();
        q.run();

        assert_eq!(*log.lock(), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn sync_budget_yields_between_tasks() {
        let q = queue(QueueOptions::default().with_max_sync_time(Duration::from_millis(2)));
        for _ in 0..3 {
            q.add_default(Operation::sync(|_| {
                std::thread::sleep(Duration::from_millis(5));
                Ok(())
            }))
            .unwrap();
        }

        q.run();
        assert_eq!(q.count(), 2);
        q.run();
        assert_eq!(q.count(), 1);
        q.run();
        assert_eq!(q.count(), 0);
    }

    #[tokio::test]
    async fn parallel_limit_caps_in_flight_tasks() {
        let q = queue(QueueOptions::default().with_parallel(5));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            q.add_default(Operation::future(move |_| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        q.run();
        assert_eq!(q.running(), 5);
        assert_eq!(q.pending(), 5);

        q.wait(0).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert_eq!(q.count(), 0);
    }

    #[tokio::test]
    async fn stop_rejects_waiters_and_discards_pending() {
        let q = queue(QueueOptions::default());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        q.add_default(Operation::sync(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        let waiter = q.wait(0);
        q.stop();

        let err = waiter.await.unwrap_err();
        assert!(err.to_string().contains("stopped"));
        assert_eq!(q.count(), 0);

        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(q.wait(0).await.unwrap_err().is_stopped());
    }

    #[test]
    fn stopped_queue_rejects_new_work() {
        let q = queue(QueueOptions::default());
        q.stop();
        let err = q.add_default(Operation::sync(|_| Ok(()))).unwrap_err();
        assert!(err.is_stopped());
        assert_eq!(q.count(), 0);
    }

    #[tokio::test]
    async fn stop_cancels_running_operation() {
        let q = queue(QueueOptions::default());
        let (exited_tx, exited_rx) = tokio::sync::oneshot::channel();
        q.add_default(Operation::future(move |handle| async move {
            handle.cancelled().await;
            let _ = exited_tx.send(handle.is_cancelled());
            Ok(())
        }))
        .unwrap();

        q.run();
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.stop();

        let observed = tokio::time::timeout(Duration::from_secs(1), exited_rx)
            .await
            .expect("operation should exit after stop")
            .unwrap();
        assert!(observed);
    }

    #[test]
    fn add_or_replace_runs_only_latest_operation() {
        let q = queue(QueueOptions::default());
        let log = Log::default();

        let first = q.add_or_replace("key", record(&log, "op1"), 0).unwrap();
        assert_eq!(q.count(), 1);
        let second = q.add_or_replace("key", record(&log, "op2"), 0).unwrap();
        assert_eq!(q.count(), 1);
        assert_eq!(first, second);

        q.run();
        assert_eq!(*log.lock(), vec!["op2"]);
    }

    #[test]
    fn replaced_task_keeps_its_position() {
        let q = queue(QueueOptions::default());
        let log = Log::default();

        q.add_or_replace("paint", record(&log, "paint-v1"), 1).unwrap();
        q.add(record(&log, "update"), 2).unwrap();
        q.add_or_replace("paint", record(&log, "paint-v2"), 50).unwrap();
        q.run();

        assert_eq!(*log.lock(), vec!["paint-v2", "update"]);
    }

    #[test]
    fn uncaught_failure_reaches_error_sink() {
        let sink = Arc::new(CountingSink::default());
        let scheduler = Scheduler::with_error_sink(sink.clone());
        let q = scheduler.create_queue("faulty", false, QueueOptions::default());
        let log = Log::default();

        q.add_default(failing("x")).unwrap();
        q.run();

        assert_eq!(sink.reports.load(Ordering::SeqCst), 1);
        assert_eq!(q.count(), 0);
        assert!(q.errors().is_empty());

        // the queue keeps going after a failure
        q.add_default(record(&log, "after")).unwrap();
        q.run();
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn uncaught_failure_rejects_outstanding_wait() {
        let q = queue(QueueOptions::default());
        q.add_default(Operation::future(|_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(BoxError::from("late failure"))
        }))
        .unwrap();

        let waiter = q.wait(0);
        q.run();

        match waiter.await {
            Err(QueueError::Task(TaskError::Failed { source, .. })) => {
                assert_eq!(source.to_string(), "late failure");
            }
            other => panic!("unexpected wait result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn caught_failures_fail_the_next_wait_only() {
        let sink = Arc::new(CountingSink::default());
        let scheduler = Scheduler::with_error_sink(sink.clone());
        let q = scheduler.create_queue(
            "caught",
            false,
            QueueOptions::default().with_catch_errors(true),
        );
        let log = Log::default();

        q.add_default(failing("boom")).unwrap();
        q.add_default(record(&log, "ok")).unwrap();
        q.run();

        assert_eq!(q.errors().len(), 1);
        assert_eq!(*log.lock(), vec!["ok"]);
        assert_eq!(sink.reports.load(Ordering::SeqCst), 0);

        match q.wait(0).await {
            Err(QueueError::Collected { failures, .. }) => assert_eq!(failures.len(), 1),
            other => panic!("unexpected wait result: {other:?}"),
        }
        q.wait(0).await.unwrap();
        assert_eq!(q.errors().len(), 1);
    }

    #[tokio::test]
    async fn timeout_fails_task_and_cancels_it() {
        let q = queue(
            QueueOptions::default()
                .with_catch_errors(true)
                .with_task_timeout(Duration::from_millis(20)),
        );
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed_cancel);

        q.add_default(Operation::future(move |handle| async move {
            tokio::select! {
                _ = handle.cancelled() => flag.store(true, Ordering::SeqCst),
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
            Ok(())
        }))
        .unwrap();

        q.run();
        match q.wait(0).await {
            Err(QueueError::Collected { failures, .. }) => {
                assert!(failures[0].is_timeout());
                assert!(failures[0].to_string().contains("timed out"));
            }
            other => panic!("unexpected wait result: {other:?}"),
        }
        assert_eq!(q.running(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(observed_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn paused_queue_holds_tasks_until_resumed() {
        let q = queue(QueueOptions::default());
        let log = Log::default();
        q.pause();

        q.add_default(record(&log, "held")).unwrap();
        q.run();
        assert!(log.lock().is_empty());
        assert_eq!(q.count(), 1);

        q.resume();
        q.run();
        assert_eq!(*log.lock(), vec!["held"]);
    }

    #[tokio::test]
    async fn added_work_runs_without_explicit_pass() {
        let q = queue(QueueOptions::default().with_throttle_delay(Duration::from_millis(1)));
        let log = Log::default();

        q.add_default(record(&log, "auto")).unwrap();
        tokio::time::timeout(Duration::from_secs(1), q.wait(0))
            .await
            .expect("scheduled pass should drain the queue")
            .unwrap();
        assert_eq!(*log.lock(), vec!["auto"]);
    }

    #[tokio::test]
    async fn wait_resolves_at_remaining_threshold() {
        let q = queue(QueueOptions::default());
        for _ in 0..3 {
            q.add_default(Operation::future(|_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            }))
            .unwrap();
        }

        q.run();
        q.wait(2).await.unwrap();
        assert!(q.count() <= 2);
        q.wait(0).await.unwrap();
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn future_without_runtime_fails_with_no_runtime() {
        let sink = Arc::new(CountingSink::default());
        let scheduler = Scheduler::with_error_sink(sink.clone());
        let q = scheduler.create_queue("no-rt", false, QueueOptions::default());

        q.add_default(Operation::future(|_| async { Ok(()) })).unwrap();
        q.run();

        assert_eq!(sink.reports.load(Ordering::SeqCst), 1);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn panicking_operation_does_not_wedge_the_queue() {
        let sink = Arc::new(CountingSink::default());
        let scheduler = Scheduler::with_error_sink(sink.clone());
        let q = scheduler.create_queue("panicky", false, QueueOptions::default());
        let log = Log::default();

        q.add_default(Operation::sync(|_| -> Result<(), BoxError> {
            panic!("operation blew up")
        }))
        .unwrap();
        q.add_default(record(&log, "after")).unwrap();
        q.run();

        assert_eq!(*log.lock(), vec!["after"]);
        assert_eq!(q.running(), 0);
        assert_eq!(q.count(), 0);
        assert_eq!(sink.reports.load(Ordering::SeqCst), 1);

        q.add_default(record(&log, "later")).unwrap();
        q.run();
        assert_eq!(*log.lock(), vec!["after", "later"]);
    }

    #[test]
    fn caught_panic_is_collected_as_panicked() {
        let q = queue(QueueOptions::default().with_catch_errors(true));
        q.add_default(Operation::sync(|_| -> Result<(), BoxError> {
            panic!("operation blew up")
        }))
        .unwrap();
        q.run();

        let errors = q.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], TaskError::Panicked { .. }));
    }

    fn stamp(stamps: &Arc<Mutex<Vec<Instant>>>) -> Operation {
        let stamps = Arc::clone(stamps);
        Operation::sync(move |_| {
            stamps.lock().push(Instant::now());
            Ok(())
        })
    }

    #[tokio::test]
    async fn scheduled_pass_waits_out_throttle_after_explicit_run() {
        let throttle = Duration::from_millis(50);
        let margin = Duration::from_millis(5);
        let q = queue(QueueOptions::default().with_throttle_delay(throttle));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        q.add_default(stamp(&stamps)).unwrap();
        q.run();
        q.add_default(stamp(&stamps)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), q.wait(0))
            .await
            .expect("throttled pass should still run")
            .unwrap();

        // automatic passes only
        q.add_default(stamp(&stamps)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), q.wait(0))
            .await
            .expect("throttled pass should still run")
            .unwrap();

        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 3);
        assert!(stamps[1] - stamps[0] >= throttle - margin);
        assert!(stamps[2] - stamps[1] >= throttle - margin);
    }

    #[test]
    fn operation_can_enqueue_into_its_own_queue() {
        let q = queue(QueueOptions::default());
        let log = Log::default();

        let inner_q = Arc::clone(&q);
        let inner_log = Arc::clone(&log);
        q.add_default(Operation::sync(move |_| {
            inner_log.lock().push("outer");
            inner_q.add_default(record(&inner_log, "inner"))?;
            inner_q.run();
            Ok(())
        }))
        .unwrap();

        q.run();
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn clear_discards_pending_without_stopping() {
        let q = queue(QueueOptions::default());
        let log = Log::default();
        q.pause();
        q.add_default(record(&log, "dropped")).unwrap();
        q.add_default(record(&log, "dropped")).unwrap();

        q.clear();
        assert_eq!(q.count(), 0);
        assert!(!q.is_stopped());

        q.resume();
        q.add_default(record(&log, "kept")).unwrap();
        q.run();
        assert_eq!(*log.lock(), vec!["kept"]);
    }

    #[test]
    fn counts_reflect_queue_state() {
        let q = queue(QueueOptions::default().with_catch_errors(true));
        q.add_default(failing("boom")).unwrap();
        q.run();
        q.pause();
        q.add_default(Operation::sync(|_| Ok(()))).unwrap();

        let counts = q.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.running, 0);
        assert_eq!(counts.errors, 1);
        assert!(counts.paused);
        assert!(!counts.stopped);
        assert!(counts.last_failure_at.is_some());
    }
}
