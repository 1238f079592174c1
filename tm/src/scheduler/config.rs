//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::catalog::SecurityLevel;
use crate::domain::Priority;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max tasks RUNNING at once
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Scheduling tick period in seconds
    #[serde(rename = "tick-interval-secs", default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// A dispatch attempt with no completion after this long counts as failed
    #[serde(rename = "dispatch-timeout-secs", default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Retry bound for tasks created without an explicit one
    #[serde(rename = "default-max-retries", default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Default priority for new tasks
    #[serde(rename = "default-priority", default)]
    pub default_priority: Priority,

    /// Minimum security level required of a worker
    #[serde(rename = "min-security", default)]
    pub min_security: SecurityLevel,

    /// Terminal tasks kept for lookup; the oldest are evicted beyond this
    #[serde(rename = "retain-terminal", default = "default_retain_terminal")]
    pub retain_terminal: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_dispatch_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

fn default_retain_terminal() -> usize {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_interval_secs: default_tick_interval_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            default_max_retries: default_max_retries(),
            default_priority: Priority::Medium,
            min_security: SecurityLevel::Low,
            retain_terminal: default_retain_terminal(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_concurrent == 0 {
            eyre::bail!("scheduler.max-concurrent must be at least 1");
        }
        if self.tick_interval_secs == 0 {
            eyre::bail!("scheduler.tick-interval-secs must be at least 1");
        }
        if self.dispatch_timeout_secs == 0 {
            eyre::bail!("scheduler.dispatch-timeout-secs must be at least 1");
        }
        Ok(())
    }
}
