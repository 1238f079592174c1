//! Request Correlator
//!
//! Turns the asynchronous bus into a request/response call for one caller.
//! A call is settled exactly once, by whichever comes first:
//!
//! - a `response` event carrying its `correlationId`
//! - a `task_completed` / `task_failed` event for its bound task
//! - its deadline, which yields the configured fallback response

mod config;
mod core;
mod pending;

pub use config::{CorrelatorConfig, DEFAULT_FALLBACK_RESPONSE};
pub use core::{CallRequest, RequestCorrelator};
pub use pending::{CallOutcome, CorrelatorMetrics, PendingCall, ResolutionSource};
