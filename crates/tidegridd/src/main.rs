//! tidegridd — the tidegrid daemon.
//!
//! # Usage
//!
//! ```text
//! tidegridd simulate --config tidegrid.toml --data-dir /var/lib/tidegrid
//! tidegridd plan --config tidegrid.toml --at 2026-03-02T22:00:00Z
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidegrid_state::StateStore;
use tidegridd::{Engine, TidegridConfig};

const DEFAULT_LOG_FILTER: &str = "info,tidegridd=debug,tidegrid=debug";

#[derive(Parser)]
#[command(name = "tidegridd", about = "tidegrid autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the evaluation loop against the simulator until Ctrl-C.
    Simulate {
        /// Path to tidegrid.toml.
        #[arg(long)]
        config: PathBuf,

        /// Data directory for persistent state. Overrides `[daemon] data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Evaluate every cluster once and print the resulting intents as JSON.
    Plan {
        /// Path to tidegrid.toml.
        #[arg(long)]
        config: PathBuf,

        /// Evaluate as of this instant (RFC 3339) instead of now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            data_dir,
            json,
        } => {
            init_tracing(json);
            let config = TidegridConfig::from_file(&config)?;
            run_simulation(config, data_dir).await
        }
        Command::Plan { config, at } => {
            // stdout carries the plan; logs stay on stderr.
            init_tracing(false);
            let config = TidegridConfig::from_file(&config)?;
            run_plan(config, at.unwrap_or_else(Utc::now)).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_simulation(config: TidegridConfig, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    info!("tidegrid daemon starting in simulation mode");

    let data_dir = data_dir.unwrap_or_else(|| config.data_dir());
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("tidegrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let engine = Engine::build(&config, store);
    engine.seed(&config, Utc::now())?;

    let interval = config.evaluation_interval();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let autoscaler = engine.autoscaler.clone();
    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(interval, shutdown_rx).await;
    });
    info!(interval_secs = interval.as_secs(), "autoscaler running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = autoscale_handle.await;

    info!("tidegrid daemon stopped");
    Ok(())
}

async fn run_plan(config: TidegridConfig, now: DateTime<Utc>) -> anyhow::Result<()> {
    let engine = Engine::build(&config, StateStore::open_in_memory()?);
    engine.seed(&config, now)?;

    let intents = engine.autoscaler.evaluate_all(now).await?;
    info!(intents = intents.len(), %now, "evaluation complete");
    println!("{}", serde_json::to_string_pretty(&intents)?);
    Ok(())
}
