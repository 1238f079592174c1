//! Task state machine
//!
//! Every lifecycle edge is listed in [`transition`], so the full set of
//! reachable states can be checked without a bus or a worker.

use thiserror::Error;

use crate::domain::TaskState;

/// Something that happens to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    /// Intake started the feasibility check
    BeginAnalysis,
    /// A capable worker exists; the task may be queued
    Accept,
    /// No capable worker; retrying cannot help
    Reject,
    /// Assigned to a worker
    Dispatch,
    /// Worker reported success
    Succeed,
    /// Worker reported failure, timed out, or went away
    Fail,
    /// Explicit cancellation
    Cancel,
}

impl std::fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BeginAnalysis => "begin-analysis",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Dispatch => "dispatch",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        };
        write!(f, "{}", s)
    }
}

/// An event that has no edge from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No transition from {from} on {event}")]
pub struct TransitionError {
    pub from: TaskState,
    pub event: TaskEvent,
}

/// Next state for `state` on `event`
///
/// `retry_count` is the number of retries already taken; a failure while
/// `retry_count < max_retries` re-queues, otherwise it is terminal.
pub fn transition(
    state: TaskState,
    event: TaskEvent,
    retry_count: u32,
    max_retries: u32,
) -> Result<TaskState, TransitionError> {
    use TaskEvent::*;
    use TaskState::*;

    let next = match (state, event) {
        (New, BeginAnalysis) => Analyzing,
        (Analyzing, Accept) => Queued,
        (Analyzing | Queued, Reject) => Failed,
        (Queued, Dispatch) => Running,
        (Running, Succeed) => Completed,
        (Running, Fail) if retry_count < max_retries => Queued,
        (Running, Fail) => Failed,
        (s, Cancel) if !s.is_terminal() => Cancelled,
        (from, event) => return Err(TransitionError { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskEvent::*;
    use TaskState::*;

    const STATES: [TaskState; 7] = [New, Analyzing, Queued, Running, Completed, Failed, Cancelled];
    const EVENTS: [TaskEvent; 7] = [BeginAnalysis, Accept, Reject, Dispatch, Succeed, Fail, Cancel];

    #[test]
    fn test_happy_path() {
        let mut state = New;
        for event in [BeginAnalysis, Accept, Dispatch, Succeed] {
            state = transition(state, event, 0, 0).unwrap();
        }
        assert_eq!(state, Completed);
    }

    #[test]
    fn test_fail_retries_until_bound() {
        assert_eq!(transition(Running, Fail, 0, 2).unwrap(), Queued);
        assert_eq!(transition(Running, Fail, 1, 2).unwrap(), Queued);
        assert_eq!(transition(Running, Fail, 2, 2).unwrap(), Failed);
        assert_eq!(transition(Running, Fail, 0, 0).unwrap(), Failed);
    }

    #[test]
    fn test_reject_is_terminal_without_retry() {
        assert_eq!(transition(Analyzing, Reject, 0, 5).unwrap(), Failed);
        assert_eq!(transition(Queued, Reject, 0, 5).unwrap(), Failed);
    }

    #[test]
    fn test_cancel_from_every_non_terminal_state() {
        for state in [New, Analyzing, Queued, Running] {
            assert_eq!(transition(state, Cancel, 0, 0).unwrap(), Cancelled);
        }
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for state in [Completed, Failed, Cancelled] {
            for event in EVENTS {
                let err = transition(state, event, 0, 3).unwrap_err();
                assert_eq!(err.from, state);
                assert_eq!(err.event, event);
            }
        }
    }

    #[test]
    fn test_edge_table_is_exact() {
        let mut edges = Vec::new();
        for state in STATES {
            for event in EVENTS {
                if let Ok(next) = transition(state, event, 0, 1) {
                    edges.push((state, event, next));
                }
            }
        }
        assert_eq!(
            edges,
            vec![
                (New, BeginAnalysis, Analyzing),
                (New, Cancel, Cancelled),
                (Analyzing, Accept, Queued),
                (Analyzing, Reject, Failed),
                (Analyzing, Cancel, Cancelled),
                (Queued, Reject, Failed),
                (Queued, Dispatch, Running),
                (Queued, Cancel, Cancelled),
                (Running, Succeed, Completed),
                (Running, Fail, Queued),
                (Running, Cancel, Cancelled),
            ]
        );
    }

    #[test]
    fn test_transition_error_message() {
        let err = transition(Completed, Dispatch, 0, 0).unwrap_err();
        assert_eq!(err.to_string(), "No transition from completed on dispatch");
    }
}
