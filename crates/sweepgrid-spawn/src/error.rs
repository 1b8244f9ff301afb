//! Orchestrator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to poll process {pid}: {source}")]
    Poll {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("cohort has no machines")]
    EmptyCohort,
}

pub type SpawnResult<T> = Result<T, SpawnError>;
