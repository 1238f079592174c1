//! Capability Catalog
//!
//! Keeps a scored description of every worker capability (cost, latency,
//! load, success rate, security level) and picks the best-fit workers for a
//! requirement. Observed outcomes flow back in through `update_metrics`.

mod config;
mod core;
mod deps;
mod score;
mod types;

pub use config::{CatalogConfig, ScoreWeights};
pub use core::{CapabilityCatalog, CatalogError};
pub use score::score;
pub use types::{Candidate, MetricsUpdate, Requirement, SecurityLevel, WorkerCapability};
