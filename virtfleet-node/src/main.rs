//! # virtfleet Node Daemon
//!
//! Polls a fleet of vSphere management endpoints, keeps per-host inventory
//! caches and a machine-to-host index, reconciles power state into the
//! local VM projection store, and exposes a command facade for power,
//! console, device and guest-file operations.
//!
//! ## Usage
//! ```bash
//! virtfleet-node --config /etc/virtfleet/node.yaml
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod daemon;

use cli::Args;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    if args.json_logs {
        virtfleet_common::init_logging_json(&args.log_level)?;
    } else {
        virtfleet_common::init_logging(&args.log_level)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting virtfleet Node Daemon"
    );

    // Load configuration
    let default_path = "/etc/virtfleet/node.yaml";
    let (config, config_path) = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => {
                info!(config_path = %path, "Configuration loaded");
                (cfg.with_cli_overrides(&args), Some(path.clone()))
            }
            Err(e) => {
                error!(error = %e, path = %path, "Failed to load configuration");
                return Err(e);
            }
        },
        None => match Config::load(default_path) {
            Ok(cfg) => {
                info!(config_path = %default_path, "Configuration loaded from default location");
                (
                    cfg.with_cli_overrides(&args),
                    Some(default_path.to_string()),
                )
            }
            Err(_) => {
                info!("No config file found, using CLI arguments and defaults");
                (Config::default_with_cli(&args), None)
            }
        },
    };

    info!(
        backend = ?config.backend,
        hosts = config.fleet.hosts.len(),
        poll_interval_secs = config.fleet.poll_interval_secs,
        "Node daemon configured"
    );

    if let Err(e) = daemon::run(config, config_path).await {
        error!(error = %e, "Daemon failed");
        return Err(e);
    }

    Ok(())
}
