//! Vigil CLI
//!
//! Runs the alerting core as a long-lived process: loads the TOML
//! configuration, restores durable state, and drives the notification
//! dispatch loop on a fixed interval.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use vigil::{Config, Engine};

/// Alerting core for the vigil monitoring server
#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Alerting core - incident state, notification decisioning, and dispatch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch loop
    Serve {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: PathBuf,

        /// Seconds between notification dispatch cycles
        #[arg(long, default_value_t = 60)]
        check_interval: u64,
    },

    /// Parse and validate a configuration file, then exit
    Validate {
        /// Path to the TOML configuration file
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "vigil=debug" } else { "vigil=info" })
        .init();

    match cli.command {
        Commands::Serve {
            config,
            check_interval,
        } => serve(&config, check_interval).await,
        Commands::Validate { config } => {
            let parsed = Config::load(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            println!(
                "ok: {} alerts, {} notifications, {} templates",
                parsed.alerts.len(),
                parsed.notifications.len(),
                parsed.templates.len()
            );
            Ok(())
        }
    }
}

/// Run the dispatch loop until interrupted.
async fn serve(config_path: &Path, check_interval: u64) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let engine = Arc::new(Engine::new(config).context("failed to initialize engine")?);

    // Mirror delivery outcomes into the log stream.
    let mut outcomes = engine.subscribe().await;
    tokio::spawn(async move {
        while let Some(event) = outcomes.recv().await {
            match event.outcome {
                vigil::DeliveryOutcome::Sent => {
                    info!(
                        notification = %event.notification,
                        alert = %event.alert,
                        "Notification delivered"
                    );
                }
                outcome => {
                    warn!(
                        notification = %event.notification,
                        alert = %event.alert,
                        outcome = ?outcome,
                        "Notification not delivered"
                    );
                }
            }
        }
    });

    info!(interval = check_interval, "Starting dispatch loop (Ctrl+C to stop)");

    loop {
        engine.check_notifications().await;
        tokio::time::sleep(tokio::time::Duration::from_secs(check_interval)).await;
    }
}
