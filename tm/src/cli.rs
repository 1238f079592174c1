//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::catalog::SecurityLevel;

/// TaskMesh - capability-routed task coordination
#[derive(Parser)]
#[command(
    name = "tm",
    about = "Capability-routed task coordination over an in-process event bus",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the effective configuration as YAML
    Config,

    /// Start a hub with the configured demo workers and submit messages to it
    Demo {
        /// Caller id the requests are sent as
        #[arg(short, long, default_value = "cli")]
        owner: String,

        /// Per-request timeout; the correlator default when omitted
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Messages to submit, one request each
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Rank the configured workers for a capability
    Score {
        /// Required capability name
        #[arg(short = 'n', long)]
        capability: String,

        /// Minimum security level (low, medium, high)
        #[arg(short = 's', long, default_value = "low")]
        min_security: SecurityLevel,

        /// Exclude workers slower than this
        #[arg(long)]
        max_latency_ms: Option<f64>,
    },

    /// Print the messages recorded in a bus journal
    Journal {
        /// Journal file; `bus.journal-path` when omitted
        path: Option<PathBuf>,

        /// Only show messages of this type
        #[arg(short, long)]
        topic: Option<String>,
    },
}

/// Path of the log file written by `tm`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskmesh")
        .join("logs")
        .join("taskmesh.log")
}
