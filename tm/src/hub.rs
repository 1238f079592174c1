//! Hub - the composition root
//!
//! Builds every component explicitly, wires their bus subscriptions, runs the
//! background loops, and exposes the single caller-facing entry point,
//! [`Hub::submit_request`].

use std::sync::Arc;
use std::time::Duration;

use eyre::Context;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analyzer::{Analysis, RequestAnalyzer, RuleAnalyzer};
use crate::bus::{BusJournal, EventBus, SubscriptionId, handler_fn, topics};
use crate::catalog::CapabilityCatalog;
use crate::config::Config;
use crate::correlator::{CallOutcome, CallRequest, RequestCorrelator};
use crate::domain::{Payload, Task};
use crate::registry::{RegistryError, WorkerRegistry};
use crate::scheduler::{CompletionReport, Scheduler};
use crate::worker::{DemoWorker, WorkerHandle, attach_worker};

/// The structured result every caller receives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOutcome {
    pub success: bool,
    pub task_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub response: Value,
}

impl RequestOutcome {
    fn failed(task_id: Option<String>, task_created: bool, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            task_created,
            task_id,
            response: Value::String(reason.into()),
        }
    }

    fn from_call(outcome: CallOutcome, task_created: bool) -> Self {
        Self {
            success: outcome.success,
            task_created,
            task_id: outcome.task_id,
            response: outcome.response,
        }
    }
}

struct Running {
    subscriptions: Vec<SubscriptionId>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the bus, registry, catalog, scheduler and correlator
pub struct Hub {
    config: Config,
    bus: Arc<EventBus>,
    registry: Arc<WorkerRegistry>,
    catalog: Arc<CapabilityCatalog>,
    scheduler: Arc<Scheduler>,
    correlator: Arc<RequestCorrelator>,
    analyzer: Arc<dyn RequestAnalyzer>,
    running: Mutex<Option<Running>>,
}

impl Hub {
    /// Build a hub using the rule analyzer from `config.analyzer`
    pub fn new(config: Config) -> eyre::Result<Self> {
        let analyzer = RuleAnalyzer::new(&config.analyzer).context("Failed to build request analyzer")?;
        Self::with_analyzer(config, Arc::new(analyzer))
    }

    pub fn with_analyzer(config: Config, analyzer: Arc<dyn RequestAnalyzer>) -> eyre::Result<Self> {
        debug!("Hub::with_analyzer: called");
        config.validate().context("Invalid configuration")?;

        let bus = Arc::new(EventBus::new(&config.bus));
        let registry = Arc::new(WorkerRegistry::new(config.registry.clone(), bus.clone()));
        let catalog = Arc::new(CapabilityCatalog::new(config.catalog.clone()));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), bus.clone(), catalog.clone()));
        let correlator = Arc::new(RequestCorrelator::new(config.correlator.clone(), bus.clone()));

        Ok(Self {
            config,
            bus,
            registry,
            catalog,
            scheduler,
            correlator,
            analyzer,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    /// Wire bus subscriptions and spawn the scheduler loop and registry sweeper
    ///
    /// Calling `start` on a running hub is a no-op.
    pub async fn start(&self) -> eyre::Result<()> {
        debug!("Hub::start: called");
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Hub::start: already running");
            return Ok(());
        }

        let mut subscriptions = Vec::new();
        if let Some(path) = &self.config.bus.journal_path {
            let journal = BusJournal::open(path)?;
            subscriptions.push(journal.attach(&self.bus)?);
            info!(?path, "Bus journal enabled");
        }
        subscriptions.extend(self.correlator.attach()?);
        subscriptions.push(self.subscribe_results()?);
        subscriptions.push(self.subscribe_removals()?);
        subscriptions.push(self.subscribe_heartbeats()?);

        let (scheduler_tx, scheduler_rx) = mpsc::channel(1);
        let (sweeper_tx, sweeper_rx) = mpsc::channel(1);
        let handles = vec![
            tokio::spawn(self.scheduler.clone().run(scheduler_rx)),
            self.registry.clone().spawn_sweeper(sweeper_rx),
        ];

        *running = Some(Running {
            subscriptions,
            shutdown_txs: vec![scheduler_tx, sweeper_tx],
            handles,
        });
        info!("Hub started");
        Ok(())
    }

    /// Stop the background loops and drop the hub's bus subscriptions
    pub async fn shutdown(&self) {
        debug!("Hub::shutdown: called");
        let Some(running) = self.running.lock().await.take() else {
            debug!("Hub::shutdown: not running");
            return;
        };
        for tx in &running.shutdown_txs {
            let _ = tx.send(()).await;
        }
        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
        for id in running.subscriptions {
            self.bus.unsubscribe(id);
        }
        info!("Hub stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Attach every worker defined in `config.workers` as a [`DemoWorker`]
    pub async fn attach_configured_workers(&self) -> eyre::Result<Vec<WorkerHandle>> {
        debug!(count = self.config.workers.len(), "Hub::attach_configured_workers: called");
        let mut handles = Vec::new();
        for spec in &self.config.workers {
            let worker = Arc::new(DemoWorker::new(spec.clone()));
            let handle = attach_worker(self, worker)
                .await
                .context(format!("Failed to attach worker {}", spec.id))?;
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Send `message` on behalf of `owner_id` and wait for its single outcome
    ///
    /// Never fails: analysis errors fall back to a direct request, and every
    /// other failure becomes an unsuccessful [`RequestOutcome`].
    pub async fn submit_request(&self, owner_id: &str, message: &str, timeout: Option<Duration>) -> RequestOutcome {
        debug!(%owner_id, ?timeout, "Hub::submit_request: called");
        let analysis = match self.analyzer.analyze(owner_id, message).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(%owner_id, error = %e, "Request analysis failed, sending as direct request");
                None
            }
        };

        match analysis {
            Some(analysis) => self.submit_task(owner_id, message, analysis, timeout).await,
            None => self.submit_direct(owner_id, message, timeout).await,
        }
    }

    async fn submit_direct(&self, owner_id: &str, message: &str, timeout: Option<Duration>) -> RequestOutcome {
        debug!(%owner_id, "Hub::submit_direct: called");
        let mut request = CallRequest::new(owner_id, message_payload(message));
        request.timeout = timeout;
        match self.correlator.call(request).await {
            Ok(outcome) => RequestOutcome::from_call(outcome, false),
            Err(e) => {
                warn!(%owner_id, error = %e, "Direct request could not be published");
                RequestOutcome::failed(None, false, e.to_string())
            }
        }
    }

    async fn submit_task(
        &self,
        owner_id: &str,
        message: &str,
        analysis: Analysis,
        timeout: Option<Duration>,
    ) -> RequestOutcome {
        debug!(%owner_id, category = %analysis.category, "Hub::submit_task: called");
        let defaults = &self.config.scheduler;
        let task = Task::new(owner_id, analysis.category, analysis.parameters)
            .with_priority(analysis.priority.unwrap_or(defaults.default_priority))
            .with_max_retries(analysis.max_retries.unwrap_or(defaults.default_max_retries));
        let task_id = task.id.clone();

        // The call is bound before the task exists
        let mut payload = message_payload(message);
        payload.insert("category".to_string(), json!(task.category));
        let mut request = CallRequest::new(owner_id, payload).for_task(task_id.clone());
        request.timeout = timeout;
        let call = match self.correlator.begin(request) {
            Ok(call) => call,
            Err(e) => {
                warn!(%owner_id, error = %e, "Request could not be published");
                return RequestOutcome::failed(None, false, e.to_string());
            }
        };

        if let Err(e) = self.scheduler.submit(task).await {
            info!(%task_id, error = %e, "Task not accepted");
            call.cancel();
            return RequestOutcome::failed(Some(task_id), false, e.to_string());
        }

        RequestOutcome::from_call(call.wait().await, true)
    }

    fn subscribe_results(&self) -> eyre::Result<SubscriptionId> {
        let scheduler = self.scheduler.clone();
        let id = self.bus.subscribe(
            topics::TASK_RESULT,
            handler_fn(move |message| {
                let scheduler = scheduler.clone();
                async move {
                    match CompletionReport::from_message(&message) {
                        Some(report) => {
                            scheduler.on_completion(report).await;
                        }
                        None => warn!(message_id = %message.id, "task_result without taskId ignored"),
                    }
                    Ok(())
                }
            }),
        )?;
        Ok(id)
    }

    /// Clear catalog entries and RUNNING tasks of a removed worker
    ///
    /// Skipped when the worker has registered again since the removal.
    fn subscribe_removals(&self) -> eyre::Result<SubscriptionId> {
        let registry = self.registry.clone();
        let catalog = self.catalog.clone();
        let scheduler = self.scheduler.clone();
        let id = self.bus.subscribe(
            topics::WORKER_REMOVED,
            handler_fn(move |message| {
                let registry = registry.clone();
                let catalog = catalog.clone();
                let scheduler = scheduler.clone();
                async move {
                    let Some(worker_id) = message.str_field("workerId") else {
                        return Ok(());
                    };
                    match registry.unless_live(worker_id, || catalog.remove_worker(worker_id)).await {
                        Some(removed) => {
                            let failed = scheduler.on_worker_removed(worker_id).await;
                            debug!(%worker_id, removed, failed, "Worker removal applied");
                        }
                        None => debug!(%worker_id, "Worker registered again, removal skipped"),
                    }
                    Ok(())
                }
            }),
        )?;
        Ok(id)
    }

    fn subscribe_heartbeats(&self) -> eyre::Result<SubscriptionId> {
        let registry = self.registry.clone();
        let id = self.bus.subscribe(
            topics::WORKER_HEARTBEAT,
            handler_fn(move |message| {
                let registry = registry.clone();
                async move {
                    let Some(worker_id) = message.sender_id.as_deref() else {
                        return Ok(());
                    };
                    match registry.heartbeat(worker_id).await {
                        Ok(()) => {}
                        Err(RegistryError::UnknownWorker(id)) => debug!(worker_id = %id, "Heartbeat from unknown worker"),
                        Err(e) => warn!(error = %e, "Heartbeat rejected"),
                    }
                    Ok(())
                }
            }),
        )?;
        Ok(id)
    }
}

fn message_payload(message: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("message".to_string(), json!(message));
    payload
}
