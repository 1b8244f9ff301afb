use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

/// Exit status for configuration and startup errors.
const CONFIG_ERROR_EXIT: i32 = -1;

#[derive(Parser)]
#[command(
    name = "sweep",
    about = "SweepGrid — parameter sweeps over a machine pool",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Cluster configuration file (sweepgrid.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a sweep and schedule every run.
    ///
    /// Creates a timestamped experiment directory under the results
    /// directory, one run directory per invocation and run id, and exits
    /// with the exit code of the last job to finish.
    Run {
        /// Sweep configuration file
        #[arg(short, long)]
        file: PathBuf,
        /// Print the commands without running anything
        #[arg(long)]
        dry_run: bool,
        /// Number of times to repeat every invocation
        #[arg(short = 'n', long, default_value = "1")]
        runs: u32,
        /// Process-map file listing the machines to use
        #[arg(long)]
        machines: Option<PathBuf>,
    },
    /// Print the invocations a sweep expands to
    Plan {
        #[arg(short, long)]
        file: PathBuf,
        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the run directories of an experiment
    Dirs {
        #[arg(short, long)]
        file: PathBuf,
        /// Experiment directory the runs were written to
        #[arg(long)]
        experiment: PathBuf,
        #[arg(short = 'n', long, default_value = "1")]
        runs: u32,
    },
    /// Run one command as a cohort over machines from a process map
    Spawn {
        num_procs: usize,
        /// Process-map file
        process_map: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Supervise one cohort member (invoked through the remote shell)
    Slave {
        /// Environment variable carrying the member's ordinal
        #[arg(long)]
        index_var: Option<String>,
        /// Credential renewal helper to keep alive next to the target
        #[arg(long)]
        renew: Option<String>,
        ordinal: usize,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sweep=debug,sweepgrid=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            CONFIG_ERROR_EXIT
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            file,
            dry_run,
            runs,
            machines,
        } => {
            commands::run::run(commands::run::RunOptions {
                file,
                dry_run,
                runs,
                config: config.map(PathBuf::from),
                machines,
            })
            .await
        }
        Commands::Plan { file, format } => commands::plan::plan(&file, &format).map(|()| 0),
        Commands::Dirs {
            file,
            experiment,
            runs,
        } => commands::plan::dirs(&file, &experiment, runs).map(|()| 0),
        Commands::Spawn {
            num_procs,
            process_map,
            command,
        } => commands::spawn::master(config, num_procs, &process_map, &command.join(" ")).await,
        Commands::Slave {
            index_var,
            renew,
            ordinal,
            command,
        } => {
            let overrides = commands::spawn::SlaveOverrides { index_var, renew };
            commands::spawn::slave(config, overrides, ordinal, &command.join(" ")).await
        }
    }
}
