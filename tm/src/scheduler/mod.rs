//! Task Scheduler
//!
//! Owns every Task for its lifetime: a three-tier priority queue, a
//! concurrency cap, the per-task state machine, and the retry policy.
//!
//! ```text
//! submit -> [high | medium | low] --tick--> dispatch (task_dispatch:<worker>)
//!                  ^                              |
//!                  +---- retry (tail) <-- task_result: failure
//!                                                 |
//!                               task_completed / task_failed
//! ```

mod config;
mod core;
mod queue;
mod state;

pub use config::SchedulerConfig;
pub use core::{CompletionReport, Scheduler, SchedulerError};
pub use queue::{PriorityTiers, QueueEntry, QueueEntryStatus, QueueState, SchedulerStats};
pub use state::{TaskEvent, TransitionError, transition};
