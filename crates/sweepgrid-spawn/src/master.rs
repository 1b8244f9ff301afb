//! Master side of the orchestrator: one cohort per job.
//!
//! A [`Cohort`] starts one process per bound machine: local machines run
//! the command directly, remote machines run it through the remote shell
//! and the slave entry point. Polling is all-or-nothing: the first member
//! to exit non-zero takes every running sibling down with it.

use std::path::PathBuf;
use std::time::Duration;

use sweep_core::{GridConfig, is_local_host};
use tracing::{debug, info, warn};

use crate::error::{SpawnError, SpawnResult};
use crate::process::{ProcessControl, SpawnSpec};
use crate::remote::{remote_invocation, shell_quote, with_library_path};

/// Exit code reported for a cohort killed from outside (`128 + SIGKILL`).
pub const KILLED_EXIT_CODE: i32 = 128 + 9;

/// How cohort members are started.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub work_dir: PathBuf,
    pub index_var: String,
    pub library_path: Option<String>,
    pub remote_shell: String,
    pub slave_entry: String,
    /// Forwarded to remote slaves, which start it next to their target.
    pub renewal_command: Option<String>,
    pub poll_interval: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &GridConfig, sim_root: PathBuf) -> Self {
        Self {
            work_dir: config.cluster.work_dir.clone().unwrap_or(sim_root),
            index_var: config.cluster.index_var.clone(),
            library_path: config.cluster.library_path.clone(),
            remote_shell: config.cluster.remote_shell.clone(),
            slave_entry: config.cluster.slave_entry.clone(),
            renewal_command: config.orchestrator.renewal_command.clone(),
            poll_interval: config.orchestrator.poll_interval(),
        }
    }

    /// Spawn spec for cohort member `ordinal` on `machine`.
    pub fn member_spec(&self, machine: &str, ordinal: usize, command: &str) -> SpawnSpec {
        if is_local_host(machine) {
            let mut spec = SpawnSpec::new(command)
                .env(&self.index_var, ordinal.to_string())
                .working_dir(&self.work_dir);
            if let Some(path) = &self.library_path {
                spec = spec.env("LD_LIBRARY_PATH", path);
            }
            spec
        } else {
            let command = with_library_path(command, self.library_path.as_deref());
            SpawnSpec::new(remote_invocation(
                &self.remote_shell,
                machine,
                &self.work_dir,
                &self.slave_line(),
                ordinal,
                &command,
            ))
        }
    }

    /// The slave entry point with the settings a remote slave cannot read
    /// from its own host's configuration.
    fn slave_line(&self) -> String {
        let mut line = format!(
            "{} --index-var {}",
            self.slave_entry,
            shell_quote(&self.index_var)
        );
        if let Some(renew) = &self.renewal_command {
            line.push_str(" --renew ");
            line.push_str(&shell_quote(renew));
        }
        line
    }
}

/// State of one cohort member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Running,
    Exited(i32),
    Killed,
}

/// Terminal status of a whole cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohortOutcome {
    AllExitedZero,
    /// `ordinal` exited with `code` first; running siblings were killed.
    AnyExitedNonzero { ordinal: usize, code: i32 },
    ExternallyKilled,
}

impl CohortOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            CohortOutcome::AllExitedZero => 0,
            CohortOutcome::AnyExitedNonzero { code, .. } => *code,
            CohortOutcome::ExternallyKilled => KILLED_EXIT_CODE,
        }
    }
}

struct Slot<H> {
    machine: String,
    handle: H,
    state: SlotState,
}

/// The processes of one job, one per machine.
pub struct Cohort<P: ProcessControl> {
    control: P,
    slots: Vec<Slot<P::Handle>>,
    outcome: Option<CohortOutcome>,
}

impl<P: ProcessControl> Cohort<P> {
    /// Start `command` on every machine, in order.
    ///
    /// If any member fails to start, the members already running are
    /// killed and the error is returned.
    pub fn spawn(
        control: P,
        machines: &[String],
        command: &str,
        settings: &OrchestratorSettings,
    ) -> SpawnResult<Self> {
        if machines.is_empty() {
            return Err(SpawnError::EmptyCohort);
        }

        let mut cohort = Cohort {
            control,
            slots: Vec::with_capacity(machines.len()),
            outcome: None,
        };
        for (ordinal, machine) in machines.iter().enumerate() {
            let spec = settings.member_spec(machine, ordinal, command);
            info!(ordinal, %machine, command = %spec.command, "starting cohort member");
            match cohort.control.spawn(&spec) {
                Ok(handle) => cohort.slots.push(Slot {
                    machine: machine.clone(),
                    handle,
                    state: SlotState::Running,
                }),
                Err(e) => {
                    cohort.kill_running();
                    return Err(e);
                }
            }
        }
        Ok(cohort)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn states(&self) -> Vec<SlotState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    pub fn outcome(&self) -> Option<CohortOutcome> {
        self.outcome
    }

    /// Check every member once.
    ///
    /// Returns the cohort outcome once it is decided: all members exited
    /// zero, or one exited non-zero (siblings are killed in the same call).
    pub fn poll(&mut self) -> SpawnResult<Option<CohortOutcome>> {
        if self.outcome.is_some() {
            return Ok(self.outcome);
        }

        let mut failure = None;
        for (ordinal, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Running {
                continue;
            }
            if let Some(code) = self.control.poll(&mut slot.handle)? {
                slot.state = SlotState::Exited(code);
                info!(ordinal, machine = %slot.machine, code, "cohort member exited");
                if code != 0 && failure.is_none() {
                    failure = Some((ordinal, code));
                }
            }
        }

        if let Some((ordinal, code)) = failure {
            warn!(ordinal, code, "cohort member failed, killing siblings");
            self.kill_running();
            self.outcome = Some(CohortOutcome::AnyExitedNonzero { ordinal, code });
        } else if self
            .slots
            .iter()
            .all(|s| matches!(s.state, SlotState::Exited(0)))
        {
            self.outcome = Some(CohortOutcome::AllExitedZero);
        }

        if let Some(outcome) = self.outcome {
            info!(exit_code = outcome.exit_code(), "cohort finished");
        }
        Ok(self.outcome)
    }

    /// Poll until the outcome is decided.
    pub async fn wait(&mut self, interval: Duration) -> SpawnResult<CohortOutcome> {
        loop {
            if let Some(outcome) = self.poll()? {
                return Ok(outcome);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Kill every running member.
    pub fn kill(&mut self) -> CohortOutcome {
        self.kill_running();
        *self.outcome.get_or_insert(CohortOutcome::ExternallyKilled)
    }

    fn kill_running(&mut self) {
        for (ordinal, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Running {
                continue;
            }
            debug!(ordinal, machine = %slot.machine, "killing cohort member");
            if let Err(e) = self.control.kill_group(&mut slot.handle) {
                warn!(ordinal, error = %e, "failed to kill cohort member");
            }
            slot.state = SlotState::Killed;
        }
    }
}

impl<P: ProcessControl> Drop for Cohort<P> {
    fn drop(&mut self) {
        self.kill_running();
    }
}
