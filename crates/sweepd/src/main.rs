//! sweepd — the SweepGrid spawn daemon.
//!
//! Listens for spawn and kill-all requests and runs commands as process
//! group leaders on this machine.
//!
//! # Usage
//!
//! ```text
//! sweepd listen --port 2000 --allow master.cluster --mode ack
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sweep_core::{DaemonMode, GridConfig};
use sweepgrid_daemon::{DaemonSettings, SpawnDaemon};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "sweepd", about = "SweepGrid spawn daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept spawn requests until interrupted.
    Listen {
        /// Cluster configuration file (sweepgrid.toml).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the configuration file).
        #[arg(long)]
        port: Option<u16>,

        /// Host allowed to connect; repeat for several. Overrides the
        /// configuration file.
        #[arg(long)]
        allow: Vec<String>,

        /// Reply style for spawn requests.
        #[arg(long, value_enum)]
        mode: Option<Mode>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Ack,
    Duplex,
}

impl From<Mode> for DaemonMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Ack => DaemonMode::Ack,
            Mode::Duplex => DaemonMode::Duplex,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sweepd=debug,sweepgrid=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Listen {
            config,
            port,
            allow,
            mode,
        } => {
            let grid = GridConfig::load_or_default(config.as_deref())?;
            let mut settings = DaemonSettings::from_config(&grid);
            if let Some(port) = port {
                settings.port = port;
            }
            if !allow.is_empty() {
                settings.allow = allow;
            }
            if let Some(mode) = mode {
                settings.mode = mode.into();
            }
            listen(settings).await
        }
    }
}

async fn listen(settings: DaemonSettings) -> anyhow::Result<()> {
    let daemon = SpawnDaemon::bind(settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    daemon.run(shutdown_rx).await?;
    Ok(())
}
