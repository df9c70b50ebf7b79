//! Activity: a two-state (active/inactive) lifecycle with queued transitions.
//!
//! Requests are registered synchronously and resolved through the table in
//! [`state`]: same-direction requests collapse into one outcome, a queued
//! opposite request is cancelled, and a request made while the opposite hook
//! runs waits behind it. Hooks run one at a time on a private task queue of
//! the scheduler, so an activity needs a tokio runtime to make progress.

mod events;
mod hooks;
mod state;

pub use events::ActivityEvent;
pub use hooks::{ActivityHooks, NoopHooks};
pub use state::{ActivityPhase, Direction};

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use self::state::{Action, Slots};
use crate::domain::ActivityId;
use crate::error::{BoxError, TransitionError};
use crate::queue::{Operation, QueueOptions, TaskQueue};
use crate::scheduler::Scheduler;
use crate::settle::{Settlement, Settler, settle};

const EVENT_CAPACITY: usize = 64;
const TRANSITION_KEY: &str = "transition";

/// A stateful object whose activation and deactivation are serialized.
pub struct Activity {
    id: ActivityId,
    name: String,
    scheduler: Scheduler,
    hooks: Arc<dyn ActivityHooks>,
    transitions: Arc<TaskQueue>,
    state: Mutex<ActivityState>,
    events: broadcast::Sender<ActivityEvent>,
    this: Weak<Activity>,
}

struct ActivityState {
    unlinked: bool,
    steady: ActivityPhase,
    running: Option<Request>,
    pending: Option<Request>,
    active_queue: Option<Arc<TaskQueue>>,
}

/// One transition request and the callers attached to it.
struct Request {
    direction: Direction,
    waiters: Vec<Settler<TransitionError>>,
}

impl Request {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            waiters: Vec::new(),
        }
    }

    fn join(&mut self) -> Settlement<TransitionError> {
        let (settler, settlement) = Settlement::channel(TransitionError::Interrupted {
            direction: self.direction,
        });
        self.waiters.push(settler);
        settlement
    }

    fn settle_all(self, result: Result<(), TransitionError>) {
        for waiter in self.waiters {
            settle(waiter, result.clone());
        }
    }
}

impl ActivityState {
    fn slots(&self) -> Slots {
        Slots {
            unlinked: self.unlinked,
            steady: self.steady,
            running: self.running.as_ref().map(|r| r.direction),
            pending: self.pending.as_ref().map(|r| r.direction),
        }
    }

    /// The active task queue may dispatch only in the steady Active phase.
    fn queue_may_run(&self) -> bool {
        !self.unlinked && self.slots().phase() == ActivityPhase::Active
    }
}

impl Activity {
    /// Create an inactive activity whose hooks run on `scheduler`.
    pub fn new(
        scheduler: &Scheduler,
        name: impl Into<String>,
        hooks: Arc<dyn ActivityHooks>,
    ) -> Arc<Self> {
        let name = name.into();
        let transitions = scheduler.detached_queue(
            format!("{name}:transitions"),
            QueueOptions::default().with_parallel(1),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new_cyclic(|this| Self {
            id: ActivityId::generate(),
            name,
            scheduler: scheduler.clone(),
            hooks,
            transitions,
            state: Mutex::new(ActivityState {
                unlinked: false,
                steady: ActivityPhase::Inactive,
                running: None,
                pending: None,
                active_queue: None,
            }),
            events,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> ActivityPhase {
        self.state.lock().slots().phase()
    }

    pub fn is_active(&self) -> bool {
        self.phase() == ActivityPhase::Active
    }

    pub fn is_activating(&self) -> bool {
        self.phase() == ActivityPhase::Activating
    }

    pub fn is_deactivating(&self) -> bool {
        self.phase() == ActivityPhase::Deactivating
    }

    pub fn is_unlinked(&self) -> bool {
        self.phase() == ActivityPhase::Unlinked
    }

    /// Receive `Active`/`Inactive`/`Unlinked` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.events.subscribe()
    }

    /// Request activation. The request is registered before this returns.
    pub fn activate(&self) -> Settlement<TransitionError> {
        self.request(Direction::Activate)
    }

    /// Request deactivation. The request is registered before this returns.
    pub fn deactivate(&self) -> Settlement<TransitionError> {
        self.request(Direction::Deactivate)
    }

    /// Create a task queue bound to this activity's lifecycle.
    ///
    /// The queue dispatches only while the activity is active, is paused
    /// when deactivation starts, and is stopped on unlink. A previously
    /// created active queue is stopped and replaced.
    pub fn create_active_task_queue(&self, options: QueueOptions) -> Arc<TaskQueue> {
        let queue = self
            .scheduler
            .detached_queue(format!("{}:active", self.name), options);

        let (previous, unlinked) = {
            let mut st = self.state.lock();
            if st.unlinked {
                (None, true)
            } else {
                if !st.queue_may_run() {
                    queue.pause();
                }
                (st.active_queue.replace(Arc::clone(&queue)), false)
            }
        };

        if unlinked {
            queue.stop();
        }
        if let Some(previous) = previous {
            previous.stop();
        }
        queue
    }

    /// Tear the activity down.
    ///
    /// A queued request is rejected with `Unlinked`; a running hook settles
    /// normally. Every later request fails with `Unlinked`.
    pub fn unlink(&self) {
        let (pending, in_flight) = {
            let mut st = self.state.lock();
            if st.unlinked {
                return;
            }
            st.unlinked = true;
            (st.pending.take(), st.running.is_some())
        };

        info!(activity = %self.name, in_flight, "activity unlinked");
        if let Some(pending) = pending {
            pending.settle_all(Err(TransitionError::Unlinked));
        }
        let _ = self.events.send(ActivityEvent::Unlinked);
        if !in_flight {
            self.teardown();
        }
    }

    fn request(&self, direction: Direction) -> Settlement<TransitionError> {
        let mut cancelled = None;
        let mut dispatch = false;

        let settlement = {
            let mut st = self.state.lock();
            let plan = state::plan(st.slots(), direction);
            if plan.cancel_pending {
                cancelled = st.pending.take();
            }

            match plan.action {
                Action::RejectUnlinked => Settlement::ready(Err(TransitionError::Unlinked)),
                Action::Complete => Settlement::ready(Ok(())),
                Action::JoinPending => st
                    .pending
                    .get_or_insert_with(|| Request::new(direction))
                    .join(),
                Action::JoinRunning => match st.running.as_mut() {
                    Some(running) => running.join(),
                    None => Settlement::ready(Ok(())),
                },
                Action::Enqueue { dispatch: now } => {
                    dispatch = now;
                    st.pending.insert(Request::new(direction)).join()
                }
            }
        };

        if let Some(cancelled) = cancelled {
            let superseded = cancelled.direction;
            debug!(activity = %self.name, cancelled = %superseded, by = %direction, "pending transition cancelled");
            cancelled.settle_all(Err(TransitionError::Cancelled {
                direction: superseded,
            }));
        }
        if dispatch {
            self.dispatch_next();
        }
        settlement
    }

    /// Put a "start the pending request" task on the transition queue.
    fn dispatch_next(&self) {
        let Some(activity) = self.this.upgrade() else {
            return;
        };
        let op = Operation::future(move |_| async move {
            activity.run_pending().await;
            Ok::<(), BoxError>(())
        });

        if self.transitions.add_or_replace(TRANSITION_KEY, op, 0).is_err() {
            let pending = self.state.lock().pending.take();
            if let Some(pending) = pending {
                let direction = pending.direction;
                pending.settle_all(Err(TransitionError::Interrupted { direction }));
            }
        }
    }

    async fn run_pending(&self) {
        let (direction, pause) = {
            let mut st = self.state.lock();
            if st.running.is_some() {
                return;
            }
            let Some(request) = st.pending.take() else {
                // cancelled before it started
                return;
            };
            let direction = request.direction;
            st.running = Some(request);
            let pause = match direction {
                Direction::Deactivate => st.active_queue.clone(),
                Direction::Activate => None,
            };
            (direction, pause)
        };

        if let Some(queue) = pause {
            queue.pause();
        }
        debug!(activity = %self.name, %direction, "transition hook started");

        // the hook runs as its own task so a panic settles the transition
        let hooks = Arc::clone(&self.hooks);
        let hook = tokio::spawn(async move {
            match direction {
                Direction::Activate => hooks.before_active().await,
                Direction::Deactivate => hooks.before_inactive().await,
            }
        });
        let outcome = match hook.await {
            Ok(outcome) => outcome,
            Err(join) => Err(BoxError::from(format!("{direction} hook panicked: {join}"))),
        };
        self.complete(direction, outcome);
    }

    /// Commit the transition, notify, and settle the attached callers.
    ///
    /// A failed or panicking hook still commits; its callers receive
    /// `TransitionError::Hook`.
    fn complete(&self, direction: Direction, outcome: Result<(), BoxError>) {
        let (request, resume, dispatch_more, unlinked) = {
            let mut st = self.state.lock();
            st.steady = direction.target();
            let request = st.running.take();
            let resume = if st.queue_may_run() {
                st.active_queue.clone()
            } else {
                None
            };
            (request, resume, st.pending.is_some(), st.unlinked)
        };

        // after unlink, `Unlinked` is the last event subscribers see
        if !unlinked {
            let event = match direction {
                Direction::Activate => ActivityEvent::Active,
                Direction::Deactivate => ActivityEvent::Inactive,
            };
            let _ = self.events.send(event);
        }
        if let Some(queue) = resume {
            queue.resume();
        }

        let result = outcome.map_err(|e| TransitionError::Hook {
            direction,
            source: Arc::from(e),
        });
        match &result {
            Ok(()) => debug!(activity = %self.name, %direction, "transition completed"),
            Err(err) => warn!(activity = %self.name, %direction, error = %err, "transition hook failed"),
        }
        if let Some(request) = request {
            request.settle_all(result);
        }

        if unlinked {
            self.teardown();
        } else if dispatch_more {
            self.dispatch_next();
        }
    }

    fn teardown(&self) {
        let active_queue = self.state.lock().active_queue.take();
        if let Some(queue) = active_queue {
            queue.stop();
        }
        self.transitions.stop();
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
