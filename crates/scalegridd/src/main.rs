//! scalegridd — the ScaleGrid daemon.
//!
//! Wires the control loop to its collaborators:
//! - configuration: TOML file, re-read when it changes
//! - metrics: JSON-lines samples file
//! - actuation: dry run (logs each confirmed action as JSON)
//!
//! # Usage
//!
//! ```text
//! scalegridd run --config scalegrid.toml --samples samples.jsonl
//! scalegridd check --config scalegrid.toml
//! scalegridd evaluate --config scalegrid.toml --samples samples.jsonl --at 1704099600
//! ```

mod report;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};

use scalegrid_autoscale::{
    ControlLoop, DryRunActuator, FileConfigProvider, StaticConfigProvider, epoch_secs,
};
use scalegrid_core::ScalerConfig;
use scalegrid_metrics::JsonlMetricSource;

#[derive(Parser)]
#[command(name = "scalegridd", about = "ScaleGrid autoscaling daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Run {
        /// Configuration file.
        #[arg(long, default_value = "scalegrid.toml")]
        config: PathBuf,

        /// JSON-lines metric samples file.
        #[arg(long)]
        samples: PathBuf,
    },

    /// Validate a configuration file and print a summary.
    Check {
        #[arg(long, default_value = "scalegrid.toml")]
        config: PathBuf,
    },

    /// Run a single dry-run pass and print the outcome per resource as JSON.
    Evaluate {
        #[arg(long, default_value = "scalegrid.toml")]
        config: PathBuf,

        #[arg(long)]
        samples: PathBuf,

        /// Evaluation time as Unix seconds (default: now).
        #[arg(long)]
        at: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Run { config, samples } => run(config, samples).await,
        Command::Check { config } => check(config),
        Command::Evaluate { config, samples, at } => evaluate(config, samples, at).await,
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => "info,scalegrid=debug".parse().context("default log filter")?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn run(config: PathBuf, samples: PathBuf) -> anyhow::Result<()> {
    info!(config = %config.display(), samples = %samples.display(), "ScaleGrid daemon starting");

    let provider = FileConfigProvider::load(&config)?;
    let control = ControlLoop::new(
        Arc::new(provider),
        Arc::new(JsonlMetricSource::new(&samples)),
        Arc::new(DryRunActuator),
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    control.run(shutdown_rx).await;

    info!("ScaleGrid daemon stopped");
    Ok(())
}

fn check(config: PathBuf) -> anyhow::Result<()> {
    let loaded = ScalerConfig::from_file(&config)?;
    print!("{}", report::config_summary(&loaded));
    println!("{}: ok", config.display());
    Ok(())
}

async fn evaluate(config: PathBuf, samples: PathBuf, at: Option<u64>) -> anyhow::Result<()> {
    let loaded = ScalerConfig::from_file(&config)?;
    let control = ControlLoop::new(
        Arc::new(StaticConfigProvider::new(loaded)),
        Arc::new(JsonlMetricSource::new(&samples)),
        Arc::new(DryRunActuator),
    );

    let now = at.unwrap_or_else(epoch_secs);
    let reports = control.run_once(now).await;
    let rendered: Vec<_> = reports.iter().map(report::pass_to_json).collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}
