//! Worker collaborator adapter
//!
//! A worker consumes `task_dispatch:<id>` assignments, performs its domain
//! work, and reports on `task_result`. What the work *is* lives entirely in
//! the [`Worker`] implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Handler, SubscriptionId, handler_fn, topics};
use crate::catalog::{SecurityLevel, WorkerCapability};
use crate::domain::{Message, Payload};
use crate::hub::Hub;
use crate::scheduler::CompletionReport;

/// A dispatched unit of work as a worker sees it
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task_id: String,
    pub category: String,
    pub owner_id: String,
    pub parameters: Payload,
    pub attempt: Option<u32>,
}

impl Assignment {
    /// Parse a `task_dispatch` message; `None` when `taskId` is missing
    pub fn from_message(message: &Message) -> Option<Self> {
        Some(Self {
            task_id: message.str_field("taskId")?.to_string(),
            category: message.str_field("category").unwrap_or_default().to_string(),
            owner_id: message.str_field("ownerId").unwrap_or_default().to_string(),
            parameters: message
                .payload
                .get("parameters")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            attempt: message
                .payload
                .get("attempt")
                .and_then(Value::as_u64)
                .and_then(|a| u32::try_from(a).ok()),
        })
    }
}

/// An external collaborator that performs work for one or more categories
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn capabilities(&self) -> Vec<WorkerCapability>;

    /// `Ok(Some(_))` reports success, `Err(_)` reports failure, and
    /// `Ok(None)` sends no report at all.
    async fn perform(&self, assignment: &Assignment) -> eyre::Result<Option<Value>>;
}

/// A worker wired into a hub
///
/// The worker keeps heartbeating and consuming assignments until
/// [`detach`](Self::detach); dropping the handle does not stop it.
#[derive(Debug)]
pub struct WorkerHandle {
    pub worker_id: String,
    pub subscription: SubscriptionId,
    heartbeat: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop heartbeating and consuming assignments, then unregister
    ///
    /// Catalog entries and RUNNING tasks bound to the worker are cleared
    /// before `worker_removed` is published.
    pub async fn detach(self, hub: &Hub) -> bool {
        debug!(worker_id = %self.worker_id, "WorkerHandle::detach: called");
        self.heartbeat.abort();
        hub.bus().unsubscribe(self.subscription);
        hub.catalog().remove_worker(&self.worker_id);
        hub.scheduler().on_worker_removed(&self.worker_id).await;
        hub.registry().unregister(&self.worker_id).await
    }
}

/// Register `worker` with the hub and start consuming its assignments
pub async fn attach_worker(hub: &Hub, worker: Arc<dyn Worker>) -> eyre::Result<WorkerHandle> {
    let worker_id = worker.id().to_string();
    let capabilities = worker.capabilities();
    debug!(%worker_id, count = capabilities.len(), "attach_worker: called");

    let names = capabilities.iter().map(|c| c.capability_name.clone()).collect();
    hub.registry().register(&worker_id, names).await?;
    for capability in &capabilities {
        if let Err(e) = hub.catalog().register(capability.clone()) {
            hub.catalog().remove_worker(&worker_id);
            hub.registry().unregister(&worker_id).await;
            return Err(e.into());
        }
    }

    let bus = hub.bus().clone();
    let subscription = hub
        .bus()
        .subscribe(&topics::dispatch_topic_for(&worker_id), assignment_handler(worker, bus))?;
    let heartbeat = spawn_heartbeat(
        hub.bus().clone(),
        worker_id.clone(),
        hub.config().registry.heartbeat_interval(),
    );

    info!(%worker_id, "Worker attached");
    Ok(WorkerHandle {
        worker_id,
        subscription,
        heartbeat,
    })
}

/// Report liveness every `period` so an idle worker is never swept as stale
fn spawn_heartbeat(bus: Arc<EventBus>, worker_id: String, period: Duration) -> JoinHandle<()> {
    debug!(%worker_id, ?period, "spawn_heartbeat: called");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            if let Err(e) = bus.emit(heartbeat(&worker_id)) {
                warn!(%worker_id, error = %e, "Failed to publish heartbeat");
            }
        }
    })
}

fn heartbeat(worker_id: &str) -> Message {
    Message::new(topics::WORKER_HEARTBEAT, Payload::new()).with_sender(worker_id)
}

fn assignment_handler(worker: Arc<dyn Worker>, bus: Arc<EventBus>) -> Arc<dyn Handler> {
    handler_fn(move |message| handle_assignment(worker.clone(), bus.clone(), message))
}

async fn handle_assignment(worker: Arc<dyn Worker>, bus: Arc<EventBus>, message: Arc<Message>) -> eyre::Result<()> {
    let Some(assignment) = Assignment::from_message(&message) else {
        warn!(worker_id = %worker.id(), message_id = %message.id, "Assignment without taskId ignored");
        return Ok(());
    };
    bus.emit(heartbeat(worker.id()))?;

    let mut report = match worker.perform(&assignment).await {
        Ok(Some(result)) => CompletionReport::success(&assignment.task_id, result),
        Ok(None) => {
            debug!(worker_id = %worker.id(), task_id = %assignment.task_id, "Worker stayed silent");
            return Ok(());
        }
        Err(e) => CompletionReport::failure(&assignment.task_id, e.to_string()),
    };
    report.attempt = assignment.attempt;
    report.worker_id = Some(worker.id().to_string());
    bus.emit(report.to_message())?;
    Ok(())
}

/// Built-in behaviours for demo and test workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Succeeds, returning `text`, `message`, or the parameters
    Echo,
    /// Always fails
    Fail,
    /// Fails the first `failures` attempts of each task, then succeeds
    Flaky,
    /// Never reports
    Silent,
}

/// A configured demo worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,

    pub behavior: Behavior,

    pub capabilities: Vec<String>,

    #[serde(rename = "security-level", default)]
    pub security_level: SecurityLevel,

    #[serde(default)]
    pub cost: f64,

    #[serde(rename = "latency-ms", default = "default_latency_ms")]
    pub latency_ms: f64,

    /// Attempts a flaky worker fails before succeeding
    #[serde(default = "default_failures")]
    pub failures: u32,

    /// Artificial work time per assignment
    #[serde(rename = "delay-ms", default)]
    pub delay_ms: u64,
}

fn default_latency_ms() -> f64 {
    250.0
}

fn default_failures() -> u32 {
    2
}

impl WorkerSpec {
    pub fn new(id: impl Into<String>, behavior: Behavior, capabilities: &[&str]) -> Self {
        Self {
            id: id.into(),
            behavior,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            security_level: SecurityLevel::Medium,
            cost: 0.0,
            latency_ms: default_latency_ms(),
            failures: default_failures(),
            delay_ms: 0,
        }
    }
}

/// Worker driven by a [`WorkerSpec`]
#[derive(Debug, Clone)]
pub struct DemoWorker {
    spec: WorkerSpec,
}

impl DemoWorker {
    pub fn new(spec: WorkerSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Worker for DemoWorker {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn capabilities(&self) -> Vec<WorkerCapability> {
        self.spec
            .capabilities
            .iter()
            .map(|name| {
                WorkerCapability::new(self.spec.id.clone(), name.clone())
                    .with_description(format!("{:?} worker", self.spec.behavior).to_lowercase())
                    .with_security(self.spec.security_level)
                    .with_cost(self.spec.cost)
                    .with_latency_ms(self.spec.latency_ms)
            })
            .collect()
    }

    async fn perform(&self, assignment: &Assignment) -> eyre::Result<Option<Value>> {
        debug!(worker_id = %self.spec.id, task_id = %assignment.task_id, behavior = ?self.spec.behavior, "DemoWorker::perform: called");
        if self.spec.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.delay_ms)).await;
        }
        match self.spec.behavior {
            Behavior::Echo => Ok(Some(echo(assignment))),
            Behavior::Fail => eyre::bail!("{} cannot complete {}", self.spec.id, assignment.category),
            Behavior::Flaky => {
                let attempt = assignment.attempt.unwrap_or(1);
                if attempt <= self.spec.failures {
                    eyre::bail!("{} failed attempt {}", self.spec.id, attempt);
                }
                Ok(Some(echo(assignment)))
            }
            Behavior::Silent => Ok(None),
        }
    }
}

fn echo(assignment: &Assignment) -> Value {
    ["text", "message"]
        .iter()
        .find_map(|key| assignment.parameters.get(*key).cloned())
        .unwrap_or_else(|| json!(assignment.parameters))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(attempt: u32) -> Assignment {
        let mut parameters = Payload::new();
        parameters.insert("message".into(), json!("hi"));
        Assignment {
            task_id: "task-1".into(),
            category: "echo".into(),
            owner_id: "user-1".into(),
            parameters,
            attempt: Some(attempt),
        }
    }

    #[test]
    fn test_assignment_from_dispatch_message() {
        let msg = Message::from_json(
            topics::TASK_DISPATCH,
            json!({
                "taskId": "task-1",
                "category": "transfer",
                "ownerId": "user-1",
                "parameters": {"amount": "5"},
                "attempt": 2,
            }),
        );
        let a = Assignment::from_message(&msg).unwrap();
        assert_eq!(a.task_id, "task-1");
        assert_eq!(a.category, "transfer");
        assert_eq!(a.parameters["amount"], "5");
        assert_eq!(a.attempt, Some(2));

        let missing = Message::from_json(topics::TASK_DISPATCH, json!({"category": "x"}));
        assert!(Assignment::from_message(&missing).is_none());
    }

    #[tokio::test]
    async fn test_demo_behaviours() {
        let echo = DemoWorker::new(WorkerSpec::new("e", Behavior::Echo, &["echo"]));
        assert_eq!(echo.perform(&assignment(1)).await.unwrap(), Some(json!("hi")));

        let fail = DemoWorker::new(WorkerSpec::new("f", Behavior::Fail, &["echo"]));
        assert!(fail.perform(&assignment(1)).await.is_err());

        let silent = DemoWorker::new(WorkerSpec::new("s", Behavior::Silent, &["echo"]));
        assert_eq!(silent.perform(&assignment(1)).await.unwrap(), None);

        let flaky = DemoWorker::new(WorkerSpec::new("k", Behavior::Flaky, &["echo"]));
        assert!(flaky.perform(&assignment(1)).await.is_err());
        assert!(flaky.perform(&assignment(2)).await.is_err());
        assert_eq!(flaky.perform(&assignment(3)).await.unwrap(), Some(json!("hi")));
    }

    #[test]
    fn test_capabilities_from_worker_spec() {
        let mut spec = WorkerSpec::new("w1", Behavior::Echo, &["a", "b"]);
        spec.cost = 0.4;
        let caps = DemoWorker::new(spec).capabilities();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0].worker_id, "w1");
        assert_eq!(caps[1].capability_name, "b");
        assert_eq!(caps[0].security_level, SecurityLevel::Medium);
        assert!((caps[0].cost - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_worker_spec_yaml() {
        let yaml = r#"
id: flaky-1
behavior: flaky
capabilities: [transfer]
failures: 1
delay-ms: 10
"#;
        let spec: WorkerSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.behavior, Behavior::Flaky);
        assert_eq!(spec.failures, 1);
        assert_eq!(spec.delay_ms, 10);
        assert_eq!(spec.security_level, SecurityLevel::Low);
    }
}
