//! Scheduler implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, topics};
use crate::catalog::{CapabilityCatalog, MetricsUpdate, Requirement};
use crate::domain::{Message, Priority, Task, TaskState};

use super::config::SchedulerConfig;
use super::queue::{PriorityTiers, QueueEntry, QueueEntryStatus, QueueState, SchedulerStats};
use super::state::{TaskEvent, TransitionError, transition};

/// Errors from scheduler operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Task already submitted: {0}")]
    Duplicate(String),

    #[error("No capable worker for category '{0}'")]
    NoCapableWorker(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// A worker's report on one dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub task_id: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Dispatch attempt the report answers; stale attempts are ignored
    pub attempt: Option<u32>,
    pub worker_id: Option<String>,
    /// Worker-reported load gauge in `[0, 1]`
    pub load: Option<f64>,
}

impl CompletionReport {
    pub fn success(task_id: impl Into<String>, result: Value) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            result: Some(result),
            error: None,
            attempt: None,
            worker_id: None,
            load: None,
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            attempt: None,
            worker_id: None,
            load: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Parse a `task_result` message; `None` when `taskId` is missing
    ///
    /// A missing `success` flag counts as failure.
    pub fn from_message(message: &Message) -> Option<Self> {
        let task_id = message.str_field("taskId")?.to_string();
        Some(Self {
            task_id,
            success: message.bool_field("success").unwrap_or(false),
            result: message.payload.get("result").cloned().filter(|v| !v.is_null()),
            error: message.str_field("error").map(String::from),
            attempt: message
                .payload
                .get("attempt")
                .and_then(Value::as_u64)
                .and_then(|a| u32::try_from(a).ok()),
            worker_id: message.sender_id.clone(),
            load: message.payload.get("load").and_then(Value::as_f64),
        })
    }

    /// The `task_result` message a worker publishes for this report
    pub fn to_message(&self) -> Message {
        let mut payload = json!({
            "taskId": self.task_id,
            "success": self.success,
        });
        if let Some(result) = &self.result {
            payload["result"] = result.clone();
        }
        if let Some(error) = &self.error {
            payload["error"] = json!(error);
        }
        if let Some(attempt) = self.attempt {
            payload["attempt"] = json!(attempt);
        }
        if let Some(load) = self.load {
            payload["load"] = json!(load);
        }
        let message = Message::from_json(topics::TASK_RESULT, payload);
        match &self.worker_id {
            Some(worker_id) => message.with_sender(worker_id.clone()),
            None => message,
        }
    }
}

/// Bookkeeping for the current dispatch attempt of a RUNNING task
#[derive(Debug, Clone)]
struct Attempt {
    worker_id: String,
    started: Instant,
}

/// Internal state protected by mutex
struct SchedulerInner {
    tasks: HashMap<String, Task>,
    tiers: PriorityTiers,
    running: HashMap<String, Attempt>,
    /// When each task entered the queue, for introspection
    queued_since: HashMap<String, Instant>,
    /// Terminal task ids, oldest first
    retired: VecDeque<String>,
    stats: SchedulerStats,
}

/// Owns every task, its queue tier and its lifecycle
///
/// The only component that dispatches task payloads to workers.
pub struct Scheduler {
    config: SchedulerConfig,
    bus: Arc<EventBus>,
    catalog: Arc<CapabilityCatalog>,
    inner: Mutex<SchedulerInner>,
    notify: Notify,
}

impl Scheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig, bus: Arc<EventBus>, catalog: Arc<CapabilityCatalog>) -> Self {
        debug!(?config, "Scheduler::new: called");
        Self {
            config,
            bus,
            catalog,
            inner: Mutex::new(SchedulerInner {
                tasks: HashMap::new(),
                tiers: PriorityTiers::new(),
                running: HashMap::new(),
                queued_since: HashMap::new(),
                retired: VecDeque::new(),
                stats: SchedulerStats::default(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Validate, check feasibility, and queue `task`
    ///
    /// A task no worker can serve is recorded as FAILED and rejected with
    /// [`SchedulerError::NoCapableWorker`]; it is never retried.
    pub async fn submit(&self, mut task: Task) -> Result<String, SchedulerError> {
        debug!(task_id = %task.id, category = %task.category, priority = %task.priority, "Scheduler::submit: called");
        if task.id.trim().is_empty() {
            return Err(SchedulerError::Invalid("empty task id".to_string()));
        }
        if task.category.trim().is_empty() {
            return Err(SchedulerError::Invalid("empty category".to_string()));
        }
        if task.state != TaskState::New {
            return Err(SchedulerError::Invalid(format!("task must be new, was {}", task.state)));
        }

        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(&task.id) {
            debug!(task_id = %task.id, "Scheduler::submit: duplicate, rejecting");
            return Err(SchedulerError::Duplicate(task.id));
        }
        inner.stats.total_submitted += 1;

        apply(&mut task, TaskEvent::BeginAnalysis)?;
        let task_id = task.id.clone();

        if self.catalog.find_candidates(&self.requirement_for(&task)).is_empty() {
            debug!(%task_id, "Scheduler::submit: no capable worker, rejecting");
            apply(&mut task, TaskEvent::Reject)?;
            let category = task.category.clone();
            task.error = Some(format!("No capable worker for category '{}'", category));
            task.completed_at = Some(Utc::now());
            inner.stats.total_rejected += 1;
            inner.stats.total_failed += 1;
            self.announce(failed_message(&task));
            inner.tasks.insert(task_id.clone(), task);
            self.retire(&mut inner, &task_id);
            warn!(%category, "Task rejected: no capable worker");
            return Err(SchedulerError::NoCapableWorker(category));
        }

        apply(&mut task, TaskEvent::Accept)?;
        self.announce(Message::from_json(
            topics::TASK_QUEUED,
            json!({
                "taskId": task.id,
                "ownerId": task.owner_id,
                "category": task.category,
                "priority": task.priority,
            }),
        ));
        inner.tiers.push_back(task.priority, task_id.clone());
        inner.queued_since.insert(task_id.clone(), Instant::now());
        inner.tasks.insert(task_id.clone(), task);
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.tiers.len());
        drop(inner);

        info!(%task_id, "Task queued");
        self.notify.notify_one();
        Ok(task_id)
    }

    /// Run one scheduling pass; returns the ids dispatched, in order
    ///
    /// Expired dispatch attempts are failed first, then the highest
    /// non-empty tier is drained while RUNNING is below the cap.
    pub async fn tick(&self) -> Vec<String> {
        debug!("Scheduler::tick: called");
        let mut inner = self.inner.lock().await;

        self.expire_attempts(&mut inner);

        let mut dispatched = Vec::new();
        while inner.running.len() < self.config.max_concurrent {
            let Some((_, task_id)) = inner.tiers.pop_next() else {
                debug!("Scheduler::tick: queue empty");
                break;
            };
            inner.queued_since.remove(&task_id);
            if self.dispatch(&mut inner, &task_id) {
                dispatched.push(task_id);
            }
        }

        if !dispatched.is_empty() {
            debug!(count = dispatched.len(), running = inner.running.len(), "Scheduler::tick: dispatched");
        }
        dispatched
    }

    /// Apply a worker's completion report
    ///
    /// Returns false when the report was ignored: unknown task, terminal
    /// task, task not running, or a stale attempt.
    pub async fn on_completion(&self, report: CompletionReport) -> bool {
        debug!(task_id = %report.task_id, success = report.success, "Scheduler::on_completion: called");
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(task) = inner.tasks.get(&report.task_id) else {
            warn!(task_id = %report.task_id, "Completion for unknown task ignored");
            return false;
        };
        if task.is_terminal() {
            debug!(task_id = %report.task_id, state = %task.state, "Scheduler::on_completion: task already terminal, ignoring");
            return false;
        }
        if task.state != TaskState::Running {
            debug!(task_id = %report.task_id, state = %task.state, "Scheduler::on_completion: task not running, ignoring");
            return false;
        }
        if let Some(attempt) = report.attempt
            && attempt != task.attempts
        {
            debug!(task_id = %report.task_id, attempt, current = task.attempts, "Scheduler::on_completion: stale attempt, ignoring");
            return false;
        }
        if let Some(worker_id) = report.worker_id.as_deref()
            && task.worker_id.as_deref() != Some(worker_id)
        {
            debug!(task_id = %report.task_id, %worker_id, "Scheduler::on_completion: report from unassigned worker, ignoring");
            return false;
        }

        let category = task.category.clone();
        let task_id = report.task_id.clone();
        let attempt = inner.running.remove(&task_id);

        if let Some(attempt) = &attempt {
            let load = report.load.unwrap_or_else(|| self.worker_share(inner, &attempt.worker_id));
            let latency_ms = attempt.started.elapsed().as_secs_f64() * 1000.0;
            let update = MetricsUpdate {
                success: report.success,
                latency_ms: Some(latency_ms),
                load: Some(load),
            };
            if let Err(e) = self.catalog.update_metrics(&attempt.worker_id, &category, update) {
                debug!(error = %e, "Scheduler::on_completion: metrics feedback skipped");
            }
        }

        if report.success {
            self.complete(inner, &task_id, report.result);
        } else {
            let error = report.error.unwrap_or_else(|| "Worker reported failure".to_string());
            self.fail_attempt(inner, &task_id, error);
        }
        drop(guard);

        self.notify.notify_one();
        true
    }

    /// Treat every RUNNING task bound to `worker_id` as a failed attempt
    pub async fn on_worker_removed(&self, worker_id: &str) -> usize {
        debug!(%worker_id, "Scheduler::on_worker_removed: called");
        let mut inner = self.inner.lock().await;
        let mut bound: Vec<String> = inner
            .running
            .iter()
            .filter(|(_, a)| a.worker_id == worker_id)
            .map(|(id, _)| id.clone())
            .collect();
        bound.sort();

        for task_id in &bound {
            inner.running.remove(task_id);
            self.fail_attempt(&mut inner, task_id, format!("Worker {} removed", worker_id));
        }
        drop(inner);

        if !bound.is_empty() {
            warn!(%worker_id, count = bound.len(), "Failed tasks bound to removed worker");
            self.notify.notify_one();
        }
        bound.len()
    }

    /// Cancel a task in any non-terminal state
    pub async fn cancel(&self, task_id: &str) -> Result<(), SchedulerError> {
        debug!(%task_id, "Scheduler::cancel: called");
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        apply(task, TaskEvent::Cancel)?;
        task.completed_at = Some(Utc::now());
        inner.tiers.remove(task_id);
        inner.queued_since.remove(task_id);
        let was_running = inner.running.remove(task_id).is_some();
        inner.stats.total_cancelled += 1;

        self.announce(Message::from_json(
            topics::TASK_CANCELLED,
            json!({ "taskId": task_id, "ownerId": task.owner_id }),
        ));
        self.retire(inner, task_id);
        info!(%task_id, was_running, "Task cancelled");
        if was_running {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Snapshot of one task
    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    /// Every retained task, oldest first
    pub async fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<_> = self.inner.lock().await.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Number of tasks currently RUNNING
    pub async fn running(&self) -> usize {
        self.inner.lock().await.running.len()
    }

    /// Get current queue state
    pub async fn queue_state(&self) -> QueueState {
        debug!("Scheduler::queue_state: called");
        let inner = self.inner.lock().await;
        QueueState {
            running: inner.running.len(),
            queued: inner.tiers.len(),
            queued_high: inner.tiers.len_of(Priority::High),
            queued_medium: inner.tiers.len_of(Priority::Medium),
            queued_low: inner.tiers.len_of(Priority::Low),
            stats: inner.stats.clone(),
        }
    }

    /// Running tasks first, then queued tasks in dispatch order
    pub async fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.inner.lock().await;
        let now = Instant::now();

        let mut running: Vec<QueueEntry> = inner
            .running
            .iter()
            .filter_map(|(id, attempt)| {
                inner.tasks.get(id).map(|task| QueueEntry {
                    task_id: id.clone(),
                    priority: task.priority,
                    status: QueueEntryStatus::Running,
                    worker_id: Some(attempt.worker_id.clone()),
                    wait_time: now - attempt.started,
                })
            })
            .collect();
        running.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| b.wait_time.cmp(&a.wait_time)));

        let queued = inner.tiers.iter().map(|(priority, id)| QueueEntry {
            task_id: id.to_string(),
            priority,
            status: QueueEntryStatus::Queued,
            worker_id: None,
            wait_time: inner.queued_since.get(id).map(|t| now - *t).unwrap_or_default(),
        });

        running.extend(queued);
        running
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        self.inner.lock().await.stats.clone()
    }

    /// Scheduling loop: ticks on the interval and whenever work or capacity appears
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = self.config.tick_interval();
        info!(?period, max_concurrent = self.config.max_concurrent, "Scheduler loop started");
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = self.notify.notified() => {
                    debug!("Scheduler::run: woken");
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler loop stopped");
                    break;
                }
            }
        }
    }

    fn requirement_for(&self, task: &Task) -> Requirement {
        Requirement::new(task.category.clone())
            .with_min_security(self.config.min_security)
            .with_context(task.parameters.clone())
    }

    /// Assign a popped task to the best worker and publish the dispatch
    fn dispatch(&self, inner: &mut SchedulerInner, task_id: &str) -> bool {
        let Some(task) = inner.tasks.get(task_id) else {
            warn!(%task_id, "Scheduler::dispatch: queued id has no task");
            return false;
        };
        if task.state != TaskState::Queued {
            debug!(%task_id, state = %task.state, "Scheduler::dispatch: not queued, skipping");
            return false;
        }

        let requirement = self.requirement_for(task);
        let Some(candidate) = self.catalog.best(&requirement) else {
            warn!(%task_id, category = %task.category, "No capable worker at dispatch time");
            if let Some(task) = inner.tasks.get_mut(task_id)
                && apply(task, TaskEvent::Reject).is_ok()
            {
                task.error = Some(format!("No capable worker for category '{}'", task.category));
                task.completed_at = Some(Utc::now());
                inner.stats.total_rejected += 1;
                inner.stats.total_failed += 1;
                self.announce(failed_message(task));
                self.retire(inner, task_id);
            }
            return false;
        };

        let Some(task) = inner.tasks.get_mut(task_id) else {
            return false;
        };
        if let Err(e) = apply(task, TaskEvent::Dispatch) {
            warn!(%task_id, error = %e, "Scheduler::dispatch: transition failed");
            return false;
        }
        task.attempts += 1;
        task.worker_id = Some(candidate.worker_id.clone());
        task.started_at = Some(Utc::now());

        let message = Message::from_json(
            topics::TASK_DISPATCH,
            json!({
                "taskId": task.id,
                "category": task.category,
                "parameters": task.parameters,
                "ownerId": task.owner_id,
                "priority": task.priority,
                "attempt": task.attempts,
            }),
        )
        .with_sender("scheduler")
        .with_target(candidate.worker_id.clone());
        let attempts = task.attempts;

        inner.running.insert(
            task_id.to_string(),
            Attempt {
                worker_id: candidate.worker_id.clone(),
                started: Instant::now(),
            },
        );
        inner.stats.total_dispatched += 1;
        inner.stats.peak_concurrent = inner.stats.peak_concurrent.max(inner.running.len());

        let share = self.worker_share(inner, &candidate.worker_id);
        if let Err(e) = self.catalog.set_load(&candidate.worker_id, share) {
            debug!(error = %e, "Scheduler::dispatch: load update skipped");
        }

        info!(%task_id, worker_id = %candidate.worker_id, attempt = attempts, score = candidate.score, "Task dispatched");
        self.announce(message);
        true
    }

    fn complete(&self, inner: &mut SchedulerInner, task_id: &str, result: Option<Value>) {
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        if let Err(e) = apply(task, TaskEvent::Succeed) {
            warn!(%task_id, error = %e, "Scheduler::complete: transition failed");
            return;
        }
        task.result = result;
        task.error = None;
        task.completed_at = Some(Utc::now());
        inner.stats.total_completed += 1;

        self.announce(Message::from_json(
            topics::TASK_COMPLETED,
            json!({
                "taskId": task.id,
                "ownerId": task.owner_id,
                "category": task.category,
                "workerId": task.worker_id,
                "result": task.result,
                "attempts": task.attempts,
                "retryCount": task.retry_count,
            }),
        ));
        info!(%task_id, attempts = task.attempts, "Task completed");
        self.retire(inner, task_id);
    }

    /// Retry at the tail of the task's tier, or fail terminally once the bound is hit
    fn fail_attempt(&self, inner: &mut SchedulerInner, task_id: &str, error: String) {
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return;
        };
        let next = match transition(task.state, TaskEvent::Fail, task.retry_count, task.max_retries) {
            Ok(next) => next,
            Err(e) => {
                warn!(%task_id, error = %e, "Scheduler::fail_attempt: transition failed");
                return;
            }
        };
        task.state = next;
        task.updated_at = Utc::now();
        task.error = Some(error.clone());

        if next == TaskState::Queued {
            task.retry_count += 1;
            task.worker_id = None;
            let priority = task.priority;
            self.announce(Message::from_json(
                topics::TASK_RETRY,
                json!({
                    "taskId": task.id,
                    "retryCount": task.retry_count,
                    "maxRetries": task.max_retries,
                    "error": error,
                }),
            ));
            warn!(%task_id, retry_count = task.retry_count, max_retries = task.max_retries, %error, "Task attempt failed, retrying");
            inner.tiers.push_back(priority, task_id.to_string());
            inner.queued_since.insert(task_id.to_string(), Instant::now());
            inner.stats.total_retried += 1;
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.tiers.len());
        } else {
            task.completed_at = Some(Utc::now());
            self.announce(failed_message(task));
            warn!(%task_id, attempts = task.attempts, %error, "Task failed");
            inner.stats.total_failed += 1;
            self.retire(inner, task_id);
        }
    }

    /// Record `task_id` as terminal and evict the oldest terminal tasks past the bound
    fn retire(&self, inner: &mut SchedulerInner, task_id: &str) {
        inner.retired.push_back(task_id.to_string());
        while inner.retired.len() > self.config.retain_terminal {
            if let Some(evicted) = inner.retired.pop_front() {
                inner.tasks.remove(&evicted);
                debug!(task_id = %evicted, "Scheduler: evicted terminal task");
            }
        }
    }

    fn expire_attempts(&self, inner: &mut SchedulerInner) {
        let timeout = self.config.dispatch_timeout();
        let mut expired: Vec<String> = inner
            .running
            .iter()
            .filter(|(_, a)| a.started.elapsed() >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();

        for task_id in expired {
            if let Some(attempt) = inner.running.remove(&task_id) {
                warn!(%task_id, worker_id = %attempt.worker_id, "Dispatch attempt timed out");
                inner.stats.total_timed_out += 1;
                self.fail_attempt(inner, &task_id, format!("Dispatch to {} timed out", attempt.worker_id));
            }
        }
    }

    /// Fraction of the concurrency cap currently held by `worker_id`
    fn worker_share(&self, inner: &SchedulerInner, worker_id: &str) -> f64 {
        let held = inner.running.values().filter(|a| a.worker_id == worker_id).count();
        held as f64 / self.config.max_concurrent as f64
    }

    fn announce(&self, message: Message) {
        if let Err(e) = self.bus.emit(message) {
            warn!(error = %e, "Scheduler: failed to publish notification");
        }
    }
}

/// Move `task` along `event`, stamping `updated_at`
fn apply(task: &mut Task, event: TaskEvent) -> Result<(), TransitionError> {
    let next = transition(task.state, event, task.retry_count, task.max_retries)?;
    debug!(task_id = %task.id, from = %task.state, to = %next, %event, "task transition");
    task.state = next;
    task.updated_at = Utc::now();
    Ok(())
}

fn failed_message(task: &Task) -> Message {
    Message::from_json(
        topics::TASK_FAILED,
        json!({
            "taskId": task.id,
            "ownerId": task.owner_id,
            "category": task.category,
            "error": task.error,
            "attempts": task.attempts,
            "retryCount": task.retry_count,
        }),
    )
}
