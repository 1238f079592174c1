//! Worker Registry
//!
//! Tracks which workers are live, the capability names they declare, and
//! when they were last seen. A periodic sweep evicts workers that stopped
//! heartbeating so dead workers do not accumulate.

mod config;
mod core;

pub use config::RegistryConfig;
pub use core::{RegistryError, RemovalReason, WorkerInfo, WorkerRegistry};
