//! sweepgrid-spawn — master/slave process orchestration.
//!
//! ```text
//! master                                   machine i (remote)
//! Cohort ── slot 0: sh -c <cmd>   (local, own process group)
//!        ── slot 1: ssh -x host "cd <dir>; sweep slave --index-var <var> 1 '<cmd>'"
//!                                          └─▶ Slave ──▶ sh -c <cmd> (own group)
//!                                                   └─▶ renewal helper
//! ```
//!
//! Any member exiting non-zero kills the rest of its cohort. A slave whose
//! connection drops kills its own target.

pub mod error;
pub mod master;
pub mod process;
pub mod remote;
pub mod slave;

pub use error::{SpawnError, SpawnResult};
pub use master::{Cohort, CohortOutcome, KILLED_EXIT_CODE, OrchestratorSettings, SlotState};
pub use process::{ProcessControl, SpawnSpec, UnixHandle, UnixProcessControl, exit_code};
pub use remote::{remote_invocation, shell_quote, with_library_path};
pub use slave::{Slave, SlaveExit, SlaveSettings};
