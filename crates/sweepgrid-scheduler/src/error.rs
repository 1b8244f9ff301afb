//! Scheduler error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing machines and jobs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("machine is not in use: {0}")]
    UnknownMachine(String),

    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("job is not running")]
    NotRunning,

    #[error("spawn error: {0}")]
    Spawn(#[from] sweepgrid_spawn::SpawnError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
