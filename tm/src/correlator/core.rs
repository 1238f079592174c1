//! Request Correlator - bridges "send input, get output" onto the bus

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::bus::{BusError, EventBus, SubscriptionId, handler_fn, topics};
use crate::domain::{Message, Payload, new_id};

use super::config::CorrelatorConfig;
use super::pending::{CallOutcome, CorrelatorMetrics, Pending, PendingCall, PendingTable, ResolutionSource};

/// A caller's request
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub owner_id: String,
    pub payload: Payload,
    /// Task whose completion also settles the call
    pub task_id: Option<String>,
    /// Deadline; the configured default when `None`
    pub timeout: Option<Duration>,
}

impl CallRequest {
    pub fn new(owner_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            owner_id: owner_id.into(),
            payload,
            task_id: None,
            timeout: None,
        }
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Correlates asynchronous completion events back to waiting callers
pub struct RequestCorrelator {
    config: CorrelatorConfig,
    bus: Arc<EventBus>,
    table: Arc<PendingTable>,
}

impl RequestCorrelator {
    pub fn new(config: CorrelatorConfig, bus: Arc<EventBus>) -> Self {
        debug!(?config, "RequestCorrelator::new: called");
        Self {
            config,
            bus,
            table: Arc::new(PendingTable::default()),
        }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Register a pending call and publish its `request` event
    ///
    /// The call is registered before the event goes out, so a responder can
    /// never answer ahead of the registration.
    pub fn begin(&self, request: CallRequest) -> Result<PendingCall, BusError> {
        let correlation_id = new_id("corr");
        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        debug!(%correlation_id, task_id = ?request.task_id, ?timeout, "RequestCorrelator::begin: called");

        let (tx, rx) = oneshot::channel();
        let created_at = Utc::now();
        let timeout_at = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| created_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.table.insert(
            &correlation_id,
            Pending {
                tx,
                task_id: request.task_id.clone(),
                created_at,
                timeout_at,
            },
        );
        let call = PendingCall::new(
            correlation_id.clone(),
            request.task_id.clone(),
            timeout,
            Value::String(self.config.fallback_response.clone()),
            rx,
            self.table.clone(),
        );

        let mut payload = request.payload;
        payload.insert("correlationId".to_string(), json!(correlation_id));
        payload.insert("ownerId".to_string(), json!(request.owner_id));
        if let Some(task_id) = &request.task_id {
            payload.insert("taskId".to_string(), json!(task_id));
        }
        self.bus
            .publish(topics::REQUEST, Message::new(topics::REQUEST, payload).with_sender("correlator"))?;

        Ok(call)
    }

    /// Issue a request and wait for its single outcome
    pub async fn call(&self, request: CallRequest) -> Result<CallOutcome, BusError> {
        Ok(self.begin(request)?.wait().await)
    }

    /// Settle the call named by a `response` message's `correlationId`
    ///
    /// `success` defaults to true; the response value is the payload's
    /// `response` field, or the whole payload when absent.
    pub fn on_response(&self, message: &Message) -> bool {
        let Some(correlation_id) = message.str_field("correlationId") else {
            debug!(message_id = %message.id, "RequestCorrelator::on_response: no correlationId, ignoring");
            return false;
        };
        let response = message
            .payload
            .get("response")
            .cloned()
            .unwrap_or_else(|| Value::Object(message.payload.clone()));
        let outcome = CallOutcome {
            correlation_id: correlation_id.to_string(),
            source: ResolutionSource::Response,
            success: message.bool_field("success").unwrap_or(true),
            response,
            task_id: message.str_field("taskId").map(String::from),
        };
        self.table.resolve(correlation_id, outcome)
    }

    /// Settle the call bound to a `task_completed` / `task_failed` message's task
    pub fn on_task_event(&self, message: &Message) -> bool {
        let Some(task_id) = message.str_field("taskId") else {
            return false;
        };
        let Some(correlation_id) = self.table.correlation_for_task(task_id) else {
            debug!(%task_id, "RequestCorrelator::on_task_event: no pending call for task");
            self.table.counters.late_events.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let (source, success, response) = if message.r#type == topics::TASK_COMPLETED {
            let result = message.payload.get("result").cloned().unwrap_or(Value::Null);
            (ResolutionSource::TaskCompleted, true, result)
        } else {
            let error = message.str_field("error").unwrap_or("Task failed").to_string();
            (ResolutionSource::TaskFailed, false, Value::String(error))
        };

        let outcome = CallOutcome {
            correlation_id: correlation_id.clone(),
            source,
            success,
            response,
            task_id: Some(task_id.to_string()),
        };
        self.table.resolve(&correlation_id, outcome)
    }

    /// Subscribe to every topic that can settle a call
    pub fn attach(self: &Arc<Self>) -> Result<Vec<SubscriptionId>, BusError> {
        debug!("RequestCorrelator::attach: called");
        let mut ids = Vec::new();

        let correlator = self.clone();
        ids.push(self.bus.subscribe(
            topics::RESPONSE,
            handler_fn(move |message| {
                let correlator = correlator.clone();
                async move {
                    correlator.on_response(&message);
                    Ok(())
                }
            }),
        )?);

        for topic in [topics::TASK_COMPLETED, topics::TASK_FAILED] {
            let correlator = self.clone();
            ids.push(self.bus.subscribe(
                topic,
                handler_fn(move |message| {
                    let correlator = correlator.clone();
                    async move {
                        correlator.on_task_event(&message);
                        Ok(())
                    }
                }),
            )?);
        }

        info!(subscriptions = ids.len(), "Correlator attached to bus");
        Ok(ids)
    }

    pub fn pending(&self) -> usize {
        self.table.len()
    }

    pub fn metrics(&self) -> CorrelatorMetrics {
        let counters = &self.table.counters;
        CorrelatorMetrics {
            pending: self.table.len(),
            resolved: counters.resolved.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            late_events: counters.late_events.load(Ordering::Relaxed),
        }
    }
}
