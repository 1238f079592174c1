//! Pending-call table and the caller's side of a correlated call
//!
//! Every resolution path (response event, task event, timeout, cancel) goes
//! through [`PendingTable::take`], which removes the entry under one lock.
//! Whoever takes the entry resolves the call; everyone after is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What settled a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Response,
    TaskCompleted,
    TaskFailed,
    Timeout,
    Cancelled,
}

/// The single result a caller receives
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    pub correlation_id: String,
    pub source: ResolutionSource,
    pub success: bool,
    pub response: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl CallOutcome {
    pub fn is_timeout(&self) -> bool {
        self.source == ResolutionSource::Timeout
    }
}

/// Snapshot of correlator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatorMetrics {
    pub pending: usize,
    pub resolved: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    /// Settling events that matched no pending call (late or unrelated)
    pub late_events: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub resolved: AtomicU64,
    pub timeouts: AtomicU64,
    pub cancelled: AtomicU64,
    pub late_events: AtomicU64,
}

pub(crate) struct Pending {
    pub tx: oneshot::Sender<CallOutcome>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    by_correlation: HashMap<String, Pending>,
    by_task: HashMap<String, String>,
}

/// Pending calls keyed by correlation id, with a task id index
#[derive(Default)]
pub(crate) struct PendingTable {
    tables: Mutex<Tables>,
    pub counters: Counters,
}

impl PendingTable {
    pub fn insert(&self, correlation_id: &str, pending: Pending) {
        let mut tables = self.lock();
        if let Some(task_id) = &pending.task_id {
            tables.by_task.insert(task_id.clone(), correlation_id.to_string());
        }
        tables.by_correlation.insert(correlation_id.to_string(), pending);
    }

    /// Remove and return the entry; `None` once it has been settled
    pub fn take(&self, correlation_id: &str) -> Option<Pending> {
        let mut tables = self.lock();
        let pending = tables.by_correlation.remove(correlation_id)?;
        if let Some(task_id) = &pending.task_id {
            tables.by_task.remove(task_id);
        }
        Some(pending)
    }

    pub fn correlation_for_task(&self, task_id: &str) -> Option<String> {
        self.lock().by_task.get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_correlation.len()
    }

    /// Settle `correlation_id` with `outcome` if nobody has yet
    pub fn resolve(&self, correlation_id: &str, outcome: CallOutcome) -> bool {
        match self.take(correlation_id) {
            Some(pending) => {
                let age = Utc::now() - pending.created_at;
                debug!(
                    %correlation_id,
                    source = ?outcome.source,
                    age_ms = age.num_milliseconds(),
                    timeout_at = %pending.timeout_at,
                    "PendingTable::resolve: settled"
                );
                self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                if pending.tx.send(outcome).is_err() {
                    debug!(%correlation_id, "PendingTable::resolve: caller already gone");
                }
                true
            }
            None => {
                debug!(%correlation_id, "PendingTable::resolve: already settled, ignoring");
                self.counters.late_events.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The caller's handle on one in-flight call
///
/// Dropping it before resolution deregisters the call.
pub struct PendingCall {
    correlation_id: String,
    task_id: Option<String>,
    timeout: Duration,
    fallback: Value,
    rx: oneshot::Receiver<CallOutcome>,
    table: Arc<PendingTable>,
}

impl PendingCall {
    pub(crate) fn new(
        correlation_id: String,
        task_id: Option<String>,
        timeout: Duration,
        fallback: Value,
        rx: oneshot::Receiver<CallOutcome>,
        table: Arc<PendingTable>,
    ) -> Self {
        Self {
            correlation_id,
            task_id,
            timeout,
            fallback,
            rx,
            table,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Wait for the first of {response, task event, deadline}
    ///
    /// Never errors: an expired deadline yields the fallback outcome.
    pub async fn wait(mut self) -> CallOutcome {
        debug!(correlation_id = %self.correlation_id, timeout = ?self.timeout, "PendingCall::wait: called");
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                debug!(correlation_id = %self.correlation_id, "PendingCall::wait: settled without outcome");
                self.outcome(ResolutionSource::Cancelled)
            }
            Err(_) => {
                if self.table.take(&self.correlation_id).is_some() {
                    warn!(correlation_id = %self.correlation_id, task_id = ?self.task_id, "Call timed out, returning fallback");
                    self.table.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    return self.outcome(ResolutionSource::Timeout);
                }
                // Settled by an event in the same instant; the sender has already sent
                match (&mut self.rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => self.outcome(ResolutionSource::Cancelled),
                }
            }
        }
    }

    /// Abandon the call; a later event for it becomes a late event
    pub fn cancel(self) -> bool {
        self.deregister()
    }

    fn deregister(&self) -> bool {
        let removed = self.table.take(&self.correlation_id).is_some();
        if removed {
            debug!(correlation_id = %self.correlation_id, "PendingCall: deregistered");
            self.table.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    fn outcome(&self, source: ResolutionSource) -> CallOutcome {
        CallOutcome {
            correlation_id: self.correlation_id.clone(),
            source,
            success: false,
            response: self.fallback.clone(),
            task_id: self.task_id.clone(),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.deregister();
    }
}
