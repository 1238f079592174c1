//! TaskMesh configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyzer::AnalyzerConfig;
use crate::bus::BusConfig;
use crate::catalog::{CatalogConfig, SecurityLevel};
use crate::correlator::CorrelatorConfig;
use crate::registry::RegistryConfig;
use crate::scheduler::SchedulerConfig;
use crate::worker::{Behavior, WorkerSpec};

/// Main TaskMesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Event bus
    pub bus: BusConfig,

    /// Worker registry
    pub registry: RegistryConfig,

    /// Capability catalog and scoring
    pub catalog: CatalogConfig,

    /// Task scheduler
    pub scheduler: SchedulerConfig,

    /// Request correlator
    pub correlator: CorrelatorConfig,

    /// Request analyzer rules
    pub analyzer: AnalyzerConfig,

    /// Demo workers attached by `tm demo`
    pub workers: Vec<WorkerSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            bus: BusConfig::default(),
            registry: RegistryConfig::default(),
            catalog: CatalogConfig::default(),
            scheduler: SchedulerConfig::default(),
            correlator: CorrelatorConfig::default(),
            analyzer: AnalyzerConfig::default(),
            workers: default_workers(),
        }
    }
}

fn default_workers() -> Vec<WorkerSpec> {
    let mut vault = WorkerSpec::new("vault-1", Behavior::Flaky, &["transfer"]);
    vault.security_level = SecurityLevel::High;
    vault.failures = 1;
    vec![
        WorkerSpec::new("echo-1", Behavior::Echo, &["echo", "balance"]),
        vault,
        WorkerSpec::new("report-1", Behavior::Silent, &["report"]),
    ]
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        self.catalog.validate()?;
        self.scheduler.validate()?;
        if self.correlator.default_timeout_ms == 0 {
            eyre::bail!("correlator.default-timeout-ms must be at least 1");
        }
        if self.registry.sweep_interval_secs == 0 {
            eyre::bail!("registry.sweep-interval-secs must be at least 1");
        }
        if self.registry.stale_after_secs == 0 {
            eyre::bail!("registry.stale-after-secs must be at least 1");
        }
        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.id.trim().is_empty() {
                eyre::bail!("workers: worker id must not be empty");
            }
            if !seen.insert(worker.id.as_str()) {
                eyre::bail!("workers: duplicate worker id '{}'", worker.id);
            }
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: ./taskmesh.yml
        let local_config = PathBuf::from("taskmesh.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/taskmesh/taskmesh.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskmesh").join("taskmesh.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
