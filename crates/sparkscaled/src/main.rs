//! sparkscaled — the sparkscale daemon.
//!
//! Single binary that assembles the autoscaler:
//! - Broker manager, cluster master and orchestrator clients
//! - Metrics aggregator over the lag, capacity and history signals
//! - Scaling policy engine
//! - Dispatch queue and scale request dispatcher
//! - Control loop
//!
//! # Usage
//!
//! ```text
//! sparkscaled run --config /etc/sparkscale/sparkscaled.toml
//! sparkscaled check-config --config sparkscaled.toml
//! ```

mod config;
mod daemon;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sparkscale_types::SystemClock;

use crate::config::DaemonConfig;

const DEFAULT_FILTER: &str = "info,sparkscaled=debug,sparkscale=debug";

#[derive(Parser)]
#[command(name = "sparkscaled", about = "Autoscaling daemon for a streaming compute cluster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Run {
        /// Path to the configuration file.
        #[arg(long, short)]
        config: PathBuf,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Parse and validate a configuration file, then print it resolved.
    CheckConfig {
        /// Path to the configuration file.
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, log_json } => {
            init_tracing(log_json);
            run(config).await
        }
        Command::CheckConfig { config } => check_config(config),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))?;
    let settings = config.resolve().context("invalid configuration")?;
    info!(config = %path.display(), interval = ?settings.interval, "sparkscaled starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    daemon::run(settings, Arc::new(SystemClock), shutdown_rx).await?;

    info!("sparkscaled stopped");
    Ok(())
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))?;
    config.resolve().context("invalid configuration")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["sparkscaled", "run", "--config", "a.toml", "--log-json"]).unwrap();
        match cli.command {
            Command::Run { config, log_json } => {
                assert_eq!(config, PathBuf::from("a.toml"));
                assert!(log_json);
            }
            Command::CheckConfig { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn check_config_requires_path() {
        assert!(Cli::try_parse_from(["sparkscaled", "check-config"]).is_err());
    }
}
