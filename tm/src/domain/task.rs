//! Task - a schedulable unit of work and its lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::new_id;
use super::message::Payload;
use super::priority::Priority;

/// Lifecycle state of a Task
///
/// ```text
/// NEW -> ANALYZING -> QUEUED -> RUNNING -> COMPLETED
///                       ^          |
///                       +--retry---+----> FAILED
/// CANCELLED is reachable from any non-terminal state.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    New,
    Analyzing,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Analyzing => "analyzing",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A unit of schedulable work, owned by the scheduler for its lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    /// The caller/user who requested it
    pub owner_id: String,

    /// Maps to a worker capability
    pub category: String,

    #[serde(default)]
    pub parameters: Payload,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub state: TaskState,

    /// Failed attempts that were re-queued
    #[serde(default)]
    pub retry_count: u32,

    pub max_retries: u32,

    /// Dispatch attempts so far (always `retry_count` or `retry_count + 1`)
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a new task in the `New` state
    pub fn new(owner_id: impl Into<String>, category: impl Into<String>, parameters: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("task"),
            owner_id: owner_id.into(),
            category: category.into(),
            parameters,
            priority: Priority::default(),
            state: TaskState::New,
            retry_count: 0,
            max_retries: 0,
            attempts: 0,
            worker_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("user-1", "transfer", Payload::new());
        assert!(task.id.starts_with("task-"));
        assert_eq!(task.state, TaskState::New);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.attempts, 0);
        assert!(task.worker_id.is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::New.is_terminal());
        assert!(!TaskState::Analyzing.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_task_serialization_uses_camel_case() {
        let task = Task::new("user-1", "transfer", Payload::new())
            .with_priority(Priority::High)
            .with_max_retries(3);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["ownerId"], "user-1");
        assert_eq!(json["maxRetries"], 3);
        assert_eq!(json["priority"], "high");
        assert_eq!(json["state"], "new");
    }
}
