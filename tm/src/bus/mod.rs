//! Event Bus - in-process publish/subscribe transport
//!
//! No other component functions without it: the scheduler dispatches through
//! it, workers report through it, and the correlator resolves callers from it.
//!
//! # Architecture
//!
//! ```text
//!                 publish(topic, msg)
//!                        |
//!          +-------------+--------------+------------------+
//!          v             v              v                  v
//!     [topic subs]  [topic:target]  [wildcard taps]   [history ring]
//!          |             |              |
//!      per-subscriber unbounded queue + task (FIFO, fault-isolated)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskmesh::bus::{EventBus, handler_fn, topics};
//!
//! let bus = Arc::new(EventBus::default());
//! bus.subscribe(topics::TASK_COMPLETED, handler_fn(|msg| async move {
//!     tracing::info!(task_id = ?msg.str_field("taskId"), "done");
//!     Ok(())
//! }))?;
//! bus.emit(Message::from_json(topics::TASK_COMPLETED, json!({"taskId": "task-1"})))?;
//! ```

mod config;
mod core;
mod handler;
mod history;
mod journal;
pub mod topics;

pub use config::{BusConfig, DEFAULT_HISTORY_CAPACITY};
pub use core::{BusError, BusMetrics, EventBus, SubscriptionId, Tapped};
pub use handler::{Handler, handler_fn};
pub use history::HistoryEntry;
pub use journal::{BusJournal, JournalEntry, read_journal};
