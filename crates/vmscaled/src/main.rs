//! vmscaled — the runner autoscaler daemon.
//!
//! Assembles the scaling subsystems into one process:
//! - Compute provider (in-memory, quotas from `[simulation]`)
//! - VM manager + fleet tracker
//! - Scaling controller + drain state machine
//! - Orphan reclaimer
//! - Job event stream (NDJSON on stdin)
//!
//! # Usage
//!
//! ```text
//! vmscaled run --config /etc/vmscale/vmscale.toml
//! vmscaled check-config --config /etc/vmscale/vmscale.toml
//! ```
//!
//! SIGINT/SIGTERM shut down (deleting the fleet unless draining).
//! SIGUSR1 enters drain mode; the daemon exits once the fleet is empty.

mod cli;
mod daemon;
mod events;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run(args) => {
            let config = args.load()?;
            daemon::run(config).await
        }
        Command::CheckConfig(args) => {
            let config = args.load()?;
            info!(zones = ?config.zones(), "configuration is valid");
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vmscale=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
