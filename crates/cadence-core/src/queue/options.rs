//! Queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration recognised when a queue is created.
///
/// Every field is optional in serialized form; durations are whole
/// milliseconds (`{"parallel": 4, "maxSyncTime": 8}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueOptions {
    /// Maximum number of tasks in flight at once. Values below 1 act as 1.
    pub parallel: usize,

    /// Wall-clock budget of one synchronous pass. Checked after each task.
    #[serde(with = "millis")]
    pub max_sync_time: Option<Duration>,

    /// Minimum gap between automatically scheduled passes.
    #[serde(with = "millis")]
    pub throttle_delay: Option<Duration>,

    /// Collect failures into `errors()` instead of reporting them to the
    /// scheduler's error sink.
    pub catch_errors: bool,

    /// Time limit for long-running operations.
    #[serde(with = "millis")]
    pub task_timeout: Option<Duration>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            max_sync_time: None,
            throttle_delay: None,
            catch_errors: false,
            task_timeout: None,
        }
    }
}

impl QueueOptions {
    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_sync_time(mut self, budget: Duration) -> Self {
        self.max_sync_time = Some(budget);
        self
    }

    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = Some(delay);
        self
    }

    pub fn with_catch_errors(mut self, catch_errors: bool) -> Self {
        self.catch_errors = catch_errors;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Parallelism actually enforced (never below 1).
    pub fn parallel_limit(&self) -> usize {
        self.parallel.max(1)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
