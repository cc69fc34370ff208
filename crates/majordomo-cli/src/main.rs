//! Operator entry point.
//!
//! `majordomo butler --config fleet/health/butler.toml` runs one butler;
//! `majordomo switchboard --config fleet/switchboard/butler.toml
//! --fleet-dir fleet` runs the ingress. Both block until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use majordomo_butler::{ButlerDaemon, JobRegistry};
use majordomo_switchboard::SwitchboardDaemon;

#[derive(Parser)]
#[command(name = "majordomo", about = "Butler fleet daemons", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a specialist butler.
    Butler {
        /// Path to the butler's `butler.toml`.
        #[arg(long)]
        config: PathBuf,
    },
    /// Run the switchboard ingress.
    Switchboard {
        /// Path to the switchboard's `butler.toml`.
        #[arg(long)]
        config: PathBuf,
        /// Fleet config root to discover butlers from.
        #[arg(long)]
        fleet_dir: Option<PathBuf>,
    },
    /// Validate a config file and exit.
    Check {
        /// Path to a `butler.toml`.
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Butler { config } => {
            let cfg = majordomo_config::load_butler(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let daemon = ButlerDaemon::start(&cfg, Vec::new(), JobRegistry::new(), None, None)
                .await
                .context("starting butler")?;
            info!(butler = daemon.name(), endpoint = %daemon.endpoint_url(), "running; Ctrl-C stops");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            daemon.shutdown().await;
        },
        Command::Switchboard { config, fleet_dir } => {
            let cfg = majordomo_config::load_butler(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let daemon = SwitchboardDaemon::start(&cfg, fleet_dir.as_deref(), None, None)
                .await
                .context("starting switchboard")?;
            info!(
                ingress = daemon.ingress_endpoint(),
                tools = %daemon.tool_endpoint(),
                "running; Ctrl-C stops"
            );
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            daemon.shutdown().await;
        },
        Command::Check { config } => {
            let cfg = majordomo_config::load_butler(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            println!("ok: butler {:?} on port {}", cfg.butler.name, cfg.butler.port);
        },
    }
    Ok(())
}
