//! TaskMesh - capability-routed task coordination
//!
//! Accepts units of work, decides which workers can perform them, queues them
//! under a priority policy, dispatches them over an in-process event bus, and
//! correlates each completion back to the caller that asked for it.
//!
//! # Modules
//!
//! - [`bus`] - publish/subscribe transport, history and journal
//! - [`registry`] - live workers and their declared capabilities
//! - [`catalog`] - scored capabilities and best-fit worker selection
//! - [`scheduler`] - priority tiers, concurrency cap, task lifecycle, retries
//! - [`correlator`] - request/response over the bus with timeout fallback
//! - [`hub`] - composition root and the caller-facing `submit_request`
//! - [`analyzer`] - maps caller messages onto task categories
//! - [`worker`] - worker trait, bus adapter and demo workers

pub mod analyzer;
pub mod bus;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod domain;
pub mod hub;
pub mod registry;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use analyzer::{Analysis, AnalyzerConfig, AnalyzerRule, RequestAnalyzer, RuleAnalyzer};
pub use bus::{BusConfig, BusError, EventBus, Handler, SubscriptionId, handler_fn};
pub use catalog::{CapabilityCatalog, CatalogConfig, Candidate, Requirement, SecurityLevel, WorkerCapability};
pub use config::Config;
pub use correlator::{CallOutcome, CallRequest, CorrelatorConfig, PendingCall, RequestCorrelator};
pub use domain::{Message, Payload, Priority, Task, TaskState};
pub use hub::{Hub, RequestOutcome};
pub use registry::{RegistryConfig, WorkerInfo, WorkerRegistry};
pub use scheduler::{CompletionReport, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats};
pub use worker::{Assignment, Behavior, DemoWorker, Worker, WorkerHandle, WorkerSpec, attach_worker};
