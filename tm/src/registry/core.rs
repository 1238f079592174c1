//! Worker Registry - live workers, their capabilities and liveness

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, topics};
use crate::domain::Message;

use super::config::RegistryConfig;

/// Errors from registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Worker id must not be empty")]
    EmptyWorkerId,

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),
}

/// Snapshot of one registered worker
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub worker_id: String,
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Exempt from staleness eviction
    pub active: bool,
}

#[derive(Debug)]
struct WorkerEntry {
    info: WorkerInfo,
    last_seen: Instant,
}

impl WorkerEntry {
    fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.info.last_seen_at = Utc::now();
    }
}

/// Why a worker left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Unregistered,
    Stale,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Stale => "stale",
        }
    }
}

/// Tracks which workers are live
pub struct WorkerRegistry {
    config: RegistryConfig,
    bus: Arc<EventBus>,
    workers: RwLock<HashMap<String, WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new(config: RegistryConfig, bus: Arc<EventBus>) -> Self {
        debug!(?config, "WorkerRegistry::new: called");
        Self {
            config,
            bus,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Record a worker as live, replacing any previous declaration
    pub async fn register(&self, worker_id: &str, capabilities: Vec<String>) -> Result<(), RegistryError> {
        debug!(%worker_id, ?capabilities, "WorkerRegistry::register: called");
        if worker_id.trim().is_empty() {
            return Err(RegistryError::EmptyWorkerId);
        }

        let now = Utc::now();
        let mut workers = self.workers.write().await;
        let (registered_at, active) = workers
            .get(worker_id)
            .map_or((now, false), |e| (e.info.registered_at, e.info.active));
        workers.insert(
            worker_id.to_string(),
            WorkerEntry {
                info: WorkerInfo {
                    worker_id: worker_id.to_string(),
                    capabilities: capabilities.clone(),
                    registered_at,
                    last_seen_at: now,
                    active,
                },
                last_seen: Instant::now(),
            },
        );
        drop(workers);

        info!(%worker_id, "Worker registered");
        self.announce(
            Message::from_json(
                topics::WORKER_REGISTERED,
                json!({ "workerId": worker_id, "capabilities": capabilities }),
            )
            .with_sender(worker_id),
        );
        Ok(())
    }

    /// Remove a worker; returns false if it was not registered
    pub async fn unregister(&self, worker_id: &str) -> bool {
        debug!(%worker_id, "WorkerRegistry::unregister: called");
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            info!(%worker_id, "Worker unregistered");
            self.announce_removed(worker_id, RemovalReason::Unregistered);
        } else {
            debug!(%worker_id, "WorkerRegistry::unregister: not registered");
        }
        removed
    }

    /// Update a worker's last-seen time
    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), RegistryError> {
        debug!(%worker_id, "WorkerRegistry::heartbeat: called");
        let mut workers = self.workers.write().await;
        let entry = workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;
        entry.touch();
        Ok(())
    }

    /// Mark a worker explicitly active (never evicted as stale) or not
    pub async fn set_active(&self, worker_id: &str, active: bool) -> Result<(), RegistryError> {
        debug!(%worker_id, active, "WorkerRegistry::set_active: called");
        let mut workers = self.workers.write().await;
        let entry = workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker(worker_id.to_string()))?;
        entry.info.active = active;
        Ok(())
    }

    /// All live workers declaring `capability`
    pub async fn list_by_capability(&self, capability: &str) -> Vec<WorkerInfo> {
        debug!(%capability, "WorkerRegistry::list_by_capability: called");
        let workers = self.workers.read().await;
        let mut matches: Vec<_> = workers
            .values()
            .filter(|e| e.info.capabilities.iter().any(|c| c == capability))
            .map(|e| e.info.clone())
            .collect();
        matches.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        matches
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker_id).map(|e| e.info.clone())
    }

    pub async fn is_live(&self, worker_id: &str) -> bool {
        self.workers.read().await.contains_key(worker_id)
    }

    /// Run `f` only if `worker_id` is not registered, holding off registration meanwhile
    ///
    /// Returns `None` when the worker is live.
    pub async fn unless_live<R>(&self, worker_id: &str, f: impl FnOnce() -> R) -> Option<R> {
        let workers = self.workers.read().await;
        if workers.contains_key(worker_id) {
            debug!(%worker_id, "WorkerRegistry::unless_live: worker is live");
            return None;
        }
        Some(f())
    }

    pub async fn list(&self) -> Vec<WorkerInfo> {
        let mut all: Vec<_> = self.workers.read().await.values().map(|e| e.info.clone()).collect();
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Evict workers past the staleness threshold that are not marked active
    ///
    /// Returns the evicted worker ids. Each eviction publishes `worker_removed`.
    pub async fn sweep(&self) -> Vec<String> {
        debug!("WorkerRegistry::sweep: called");
        let stale_after = self.config.stale_after();
        let now = Instant::now();

        let mut workers = self.workers.write().await;
        let stale: Vec<String> = workers
            .iter()
            .filter(|(_, e)| !e.info.active && now.duration_since(e.last_seen) > stale_after)
            .map(|(id, _)| id.clone())
            .collect();
        for worker_id in &stale {
            workers.remove(worker_id);
        }
        drop(workers);

        for worker_id in &stale {
            warn!(%worker_id, "Evicting stale worker");
            self.announce_removed(worker_id, RemovalReason::Stale);
        }
        stale
    }

    /// Run the periodic sweep until `shutdown_rx` fires or its sender is dropped
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> JoinHandle<()> {
        let period = self.config.sweep_interval();
        debug!(?period, "WorkerRegistry::spawn_sweeper: called");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = self.sweep().await;
                        if !evicted.is_empty() {
                            info!(count = evicted.len(), "Registry sweep evicted workers");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("WorkerRegistry sweeper: shutdown");
                        break;
                    }
                }
            }
        })
    }

    fn announce_removed(&self, worker_id: &str, reason: RemovalReason) {
        self.announce(
            Message::from_json(
                topics::WORKER_REMOVED,
                json!({ "workerId": worker_id, "reason": reason.as_str() }),
            )
            .with_sender("registry"),
        );
    }

    fn announce(&self, message: Message) {
        if let Err(e) = self.bus.emit(message) {
            warn!(error = %e, "WorkerRegistry: failed to publish announcement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusConfig;
    use std::time::Duration;

    fn registry(stale_after_secs: u64) -> (Arc<EventBus>, WorkerRegistry) {
        let bus = Arc::new(EventBus::new(&BusConfig::default()));
        let config = RegistryConfig {
            sweep_interval_secs: 1,
            stale_after_secs,
        };
        (bus.clone(), WorkerRegistry::new(config, bus))
    }

    #[tokio::test]
    async fn test_register_and_list_by_capability() {
        let (_bus, registry) = registry(300);
        registry
            .register("w1", vec!["transfer".into(), "balance".into()])
            .await
            .unwrap();
        registry.register("w2", vec!["balance".into()]).await.unwrap();

        let balance: Vec<_> = registry
            .list_by_capability("balance")
            .await
            .into_iter()
            .map(|w| w.worker_id)
            .collect();
        assert_eq!(balance, vec!["w1", "w2"]);
        assert_eq!(registry.list_by_capability("transfer").await.len(), 1);
        assert!(registry.list_by_capability("swap").await.is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let (_bus, registry) = registry(300);
        assert_eq!(
            registry.register(" ", vec![]).await.unwrap_err(),
            RegistryError::EmptyWorkerId
        );
    }

    #[tokio::test]
    async fn test_reregister_keeps_registration_time_and_active_flag() {
        let (_bus, registry) = registry(300);
        registry.register("w1", vec!["a".into()]).await.unwrap();
        registry.set_active("w1", true).await.unwrap();
        let first = registry.get("w1").await.unwrap();

        registry.register("w1", vec!["b".into()]).await.unwrap();
        let second = registry.get("w1").await.unwrap();
        assert_eq!(first.registered_at, second.registered_at);
        assert!(second.active);
        assert_eq!(second.capabilities, vec!["b"]);
    }

    #[tokio::test]
    async fn test_unless_live_skips_registered_worker() {
        let (_bus, registry) = registry(300);
        assert_eq!(registry.unless_live("w1", || 7).await, Some(7));

        registry.register("w1", vec![]).await.unwrap();
        assert_eq!(registry.unless_live("w1", || 7).await, None);

        registry.unregister("w1").await;
        assert_eq!(registry.unless_live("w1", || 7).await, Some(7));
    }

    #[tokio::test]
    async fn test_unregister_publishes_worker_removed() {
        let (bus, registry) = registry(300);
        let (_id, mut rx) = bus.subscribe_channel(topics::WORKER_REMOVED).unwrap();
        registry.register("w1", vec![]).await.unwrap();

        assert!(registry.unregister("w1").await);
        assert!(!registry.unregister("w1").await);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.str_field("workerId"), Some("w1"));
        assert_eq!(msg.str_field("reason"), Some("unregistered"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_worker() {
        let (_bus, registry) = registry(300);
        assert_eq!(
            registry.heartbeat("ghost").await.unwrap_err(),
            RegistryError::UnknownWorker("ghost".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_stale_workers_only() {
        let (bus, registry) = registry(300);
        let (_id, mut rx) = bus.subscribe_channel(topics::WORKER_REMOVED).unwrap();
        registry.register("stale", vec![]).await.unwrap();
        registry.register("fresh", vec![]).await.unwrap();
        registry.register("pinned", vec![]).await.unwrap();
        registry.set_active("pinned", true).await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        registry.heartbeat("fresh").await.unwrap();
        tokio::time::advance(Duration::from_secs(150)).await;

        let evicted = registry.sweep().await;
        assert_eq!(evicted, vec!["stale"]);
        assert!(registry.is_live("fresh").await);
        assert!(registry.is_live("pinned").await);
        assert!(!registry.is_live("stale").await);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.str_field("workerId"), Some("stale"));
        assert_eq!(msg.str_field("reason"), Some("stale"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_periodically() {
        let (_bus, registry) = registry(5);
        let registry = Arc::new(registry);
        registry.register("w1", vec![]).await.unwrap();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = registry.clone().spawn_sweeper(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(registry.is_empty().await);

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
