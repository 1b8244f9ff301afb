//! sweepgrid-scheduler — first-fit job scheduling over a machine pool.
//!
//! ```text
//! submit(Job) ──▶ queued ──first fit──▶ running ──poll──▶ outcome
//!                              ▲                     │
//!                MachinePool ──┘ take(n)   release ◀─┘
//! ```
//!
//! The pool, the queue and the running set are owned by the single task
//! that drives [`Scheduler::run`].

pub mod error;
pub mod job;
pub mod pool;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use job::{
    CohortJob, Job, JobKind, JobState, LocalJob, SPAWN_FAILED_EXIT_CODE, SimLaunch, Workload,
};
pub use pool::MachinePool;
pub use scheduler::{Admission, DEFAULT_POLL_INTERVAL, Outcome, ScheduleReport, Scheduler};
