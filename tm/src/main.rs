//! TaskMesh - capability-routed task coordination
//!
//! CLI entry point for inspecting configuration and driving a demo hub.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use taskmesh::catalog::{CapabilityCatalog, Requirement, SecurityLevel};
use taskmesh::cli::{Cli, Command, get_log_path};
use taskmesh::config::Config;
use taskmesh::hub::{Hub, RequestOutcome};
use taskmesh::worker::{DemoWorker, Worker};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Config) => cmd_config(&config),
        Some(Command::Demo {
            owner,
            timeout_ms,
            messages,
        }) => cmd_demo(config, &owner, timeout_ms, &messages).await,
        Some(Command::Score {
            capability,
            min_security,
            max_latency_ms,
        }) => cmd_score(&config, &capability, min_security, max_latency_ms),
        Some(Command::Journal { path, topic }) => cmd_journal(&config, path, topic.as_deref()),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

async fn cmd_demo(config: Config, owner: &str, timeout_ms: Option<u64>, messages: &[String]) -> Result<()> {
    debug!(%owner, ?timeout_ms, count = messages.len(), "cmd_demo: called");
    let hub = Hub::new(config)?;
    hub.start().await?;
    let workers = hub.attach_configured_workers().await?;
    println!(
        "{} {} worker(s): {}",
        "Attached".green().bold(),
        workers.len(),
        workers.iter().map(|w| w.worker_id.as_str()).collect::<Vec<_>>().join(", ")
    );

    let timeout = timeout_ms.map(Duration::from_millis);
    for message in messages {
        let outcome = hub.submit_request(owner, message, timeout).await;
        print_outcome(message, &outcome)?;
    }

    let stats = hub.scheduler().stats().await;
    println!(
        "\n{} submitted={} dispatched={} completed={} failed={} retried={}",
        "Scheduler:".bold(),
        stats.total_submitted,
        stats.total_dispatched,
        stats.total_completed,
        stats.total_failed,
        stats.total_retried
    );
    let metrics = hub.correlator().metrics();
    println!(
        "{} resolved={} timeouts={} late={}",
        "Correlator:".bold(),
        metrics.resolved,
        metrics.timeouts,
        metrics.late_events
    );

    for handle in workers {
        handle.detach(&hub).await;
    }
    hub.shutdown().await;
    Ok(())
}

fn print_outcome(message: &str, outcome: &RequestOutcome) -> Result<()> {
    let status = if outcome.success {
        "OK".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!("\n{} {}", status, message.cyan());
    println!("  task: {}", outcome.task_id.as_deref().unwrap_or("-").dimmed());
    println!("  {}", serde_json::to_string(outcome)?);
    Ok(())
}

fn cmd_score(
    config: &Config,
    capability: &str,
    min_security: SecurityLevel,
    max_latency_ms: Option<f64>,
) -> Result<()> {
    debug!(%capability, %min_security, ?max_latency_ms, "cmd_score: called");
    let catalog = CapabilityCatalog::new(config.catalog.clone());
    for spec in &config.workers {
        for cap in DemoWorker::new(spec.clone()).capabilities() {
            catalog.register(cap)?;
        }
    }

    let mut requirement = Requirement::new(capability).with_min_security(min_security);
    if let Some(ms) = max_latency_ms {
        requirement = requirement.with_max_latency_ms(ms);
    }

    let candidates = catalog.find_candidates(&requirement);
    if candidates.is_empty() {
        println!("No candidates for '{}'", capability);
        return Ok(());
    }
    println!("{:<20} {:<16} {:>8}", "WORKER".bold(), "SECURITY".bold(), "SCORE".bold());
    for candidate in candidates {
        println!(
            "{:<20} {:<16} {:>8.3}",
            candidate.worker_id, candidate.capability.security_level, candidate.score
        );
    }
    Ok(())
}

fn cmd_journal(config: &Config, path: Option<PathBuf>, topic: Option<&str>) -> Result<()> {
    debug!(?path, ?topic, "cmd_journal: called");
    let Some(path) = path.or_else(|| config.bus.journal_path.clone()) else {
        eyre::bail!("No journal path given and bus.journal-path is not set");
    };
    let entries = taskmesh::bus::read_journal(&path)?;
    for entry in entries.iter().filter(|e| topic.is_none_or(|t| e.topic == t)) {
        println!(
            "{} {:<20} {}",
            entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            entry.topic.yellow(),
            serde_json::Value::Object(entry.message.payload.clone())
        );
    }
    Ok(())
}
