use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use cadence_core::{BoxError, QueueOptions};
use serde::{Deserialize, Serialize};

/// CLI configuration: queue options keyed by queue name.
///
/// ```json
/// { "queues": { "render": { "parallel": 1, "maxSyncTime": 8 } } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub queues: BTreeMap<String, QueueOptions>,
}

impl CadenceConfig {
    pub fn load(path: &Path) -> Result<Self, BoxError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read {}: {e}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .map_err(|e| format!("parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Built-in queues used when no config file is given.
    pub fn demo() -> Self {
        let mut queues = BTreeMap::new();
        queues.insert(
            "render".to_string(),
            QueueOptions::default()
                .with_max_sync_time(Duration::from_millis(8))
                .with_throttle_delay(Duration::from_millis(4)),
        );
        queues.insert(
            "io".to_string(),
            QueueOptions::default()
                .with_parallel(4)
                .with_catch_errors(true)
                .with_task_timeout(Duration::from_millis(200)),
        );
        Self { queues }
    }

    /// Options for `name`, or the defaults when the config omits it.
    pub fn queue(&self, name: &str) -> QueueOptions {
        self.queues.get(name).cloned().unwrap_or_default()
    }
}
