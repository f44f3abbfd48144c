//! Command-line argument parsing.

use clap::Parser;

/// virtfleet Node Daemon - vSphere fleet management agent
#[derive(Parser, Debug)]
#[command(name = "virtfleet-node")]
#[command(about = "virtfleet Node Daemon - vSphere fleet management agent")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Registry poll interval in seconds (overrides config)
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Enable development mode (mock backend)
    #[arg(long)]
    pub dev: bool,
}
