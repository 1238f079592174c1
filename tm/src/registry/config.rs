//! Worker registry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How often the staleness sweep runs
    #[serde(rename = "sweep-interval-secs", default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Workers not seen for this long (and not marked active) are evicted
    #[serde(rename = "stale-after-secs", default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_stale_after_secs() -> u64 {
    5 * 60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// How often an attached in-process worker reports liveness
    pub fn heartbeat_interval(&self) -> Duration {
        self.stale_after() / 3
    }
}
