use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Key/value watcher timing
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct KvConfig {
    /// Period of the watch-request job while keys are unresolved (ms)
    #[serde(default = "default_watcher_retry_ms")]
    pub watcher_retry_ms: u64,

    /// Delay of the publish job (ms)
    #[serde(default)]
    pub publish_delay_ms: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            watcher_retry_ms: default_watcher_retry_ms(),
            publish_delay_ms: 0,
        }
    }
}

impl KvConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watcher_retry_ms == 0 {
            return Err(Error::InvalidConfig("watcher_retry_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn watcher_retry(&self) -> Duration {
        Duration::from_millis(self.watcher_retry_ms)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }
}

fn default_watcher_retry_ms() -> u64 {
    3000
}
