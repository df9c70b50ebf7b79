//! Pending tasks ordered by `(priority, insertion sequence)`.

use std::collections::{BTreeMap, HashMap};

use super::{Operation, TaskHandle};
use crate::domain::TaskId;

/// Ordering key of a pending task.
///
/// Lower priority values dispatch first; ties keep insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyKey {
    priority: i32,
    seq: u64,
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

/// A task waiting to be dispatched.
#[derive(Debug)]
pub(crate) struct PendingTask {
    pub handle: TaskHandle,
    pub priority: i32,
    pub key: Option<String>,
    pub operation: Operation,
}

impl PendingTask {
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }
}

/// Outcome of `PendingTasks::insert_or_replace`.
pub(crate) enum Inserted {
    New(TaskId),
    /// The operation of an existing task was swapped; the old one is returned
    /// so the caller can drop it outside any lock.
    Replaced(TaskId, Operation),
}

#[derive(Debug, Default)]
pub(crate) struct PendingTasks {
    ordered: BTreeMap<ReadyKey, PendingTask>,
    by_key: HashMap<String, ReadyKey>,
    next_seq: u64,
}

impl PendingTasks {
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn insert(&mut self, operation: Operation, priority: i32) -> TaskId {
        self.push(operation, priority, None)
    }

    /// Replace the operation of the pending task registered under `key`,
    /// keeping its id and position, or insert a new keyed task.
    pub fn insert_or_replace(&mut self, key: &str, operation: Operation, priority: i32) -> Inserted {
        if let Some(slot) = self.by_key.get(key)
            && let Some(task) = self.ordered.get_mut(slot)
        {
            let previous = std::mem::replace(&mut task.operation, operation);
            return Inserted::Replaced(task.id(), previous);
        }
        Inserted::New(self.push(operation, priority, Some(key.to_string())))
    }

    /// Remove the next task to dispatch.
    pub fn pop(&mut self) -> Option<PendingTask> {
        let (_, task) = self.ordered.pop_first()?;
        if let Some(key) = &task.key {
            self.by_key.remove(key);
        }
        Some(task)
    }

    /// Remove every pending task, in dispatch order.
    pub fn drain(&mut self) -> Vec<PendingTask> {
        self.by_key.clear();
        std::mem::take(&mut self.ordered).into_values().collect()
    }

    fn push(&mut self, operation: Operation, priority: i32, key: Option<String>) -> TaskId {
        let id = TaskId::generate();
        let slot = ReadyKey {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if let Some(key) = &key {
            self.by_key.insert(key.clone(), slot);
        }
        self.ordered.insert(
            slot,
            PendingTask {
                handle: TaskHandle::new(id),
                priority,
                key,
                operation,
            },
        );
        id
    }
}
