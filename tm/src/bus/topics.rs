//! Well-known topic names

/// Caller request emitted by the correlator
pub const REQUEST: &str = "request";
/// Direct response to a request, matched by `correlationId`
pub const RESPONSE: &str = "response";

/// Scheduler -> worker assignment (targeted at the worker id)
pub const TASK_DISPATCH: &str = "task_dispatch";
/// Worker -> scheduler completion report
pub const TASK_RESULT: &str = "task_result";

pub const TASK_QUEUED: &str = "task_queued";
pub const TASK_RETRY: &str = "task_retry";
pub const TASK_COMPLETED: &str = "task_completed";
pub const TASK_FAILED: &str = "task_failed";
pub const TASK_CANCELLED: &str = "task_cancelled";

pub const WORKER_REGISTERED: &str = "worker_registered";
pub const WORKER_REMOVED: &str = "worker_removed";
pub const WORKER_HEARTBEAT: &str = "worker_heartbeat";

/// Topic a worker listens on for its own assignments
pub fn dispatch_topic_for(worker_id: &str) -> String {
    targeted(TASK_DISPATCH, worker_id)
}

/// `topic:targetId` form used for unicast delivery
pub fn targeted(topic: &str, target_id: &str) -> String {
    format!("{}:{}", topic, target_id)
}
