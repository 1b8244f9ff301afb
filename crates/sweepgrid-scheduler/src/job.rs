//! Jobs — units of work the scheduler admits onto machines.
//!
//! A [`Job`] wraps a [`Workload`] with a machine requirement and a
//! lifecycle:
//!
//! ```text
//! Queued ──assign──▶ Assigned ──spawn──▶ Running ──▶ Completed(code)
//!                        │                  └──kill──▶ Killed
//!                        └──spawn failed──▶ Completed(-1)
//! ```
//!
//! [`JobKind`] is the closed set of workloads the CLI schedules: plain local
//! shell commands and simulator cohorts.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use sweepgrid_spawn::{
    Cohort, KILLED_EXIT_CODE, OrchestratorSettings, ProcessControl, SpawnSpec, UnixHandle,
    UnixProcessControl, shell_quote,
};
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Exit code recorded for a job whose workload could not be started.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// The spawn/poll/kill contract every job workload implements.
pub trait Workload {
    /// Human-readable command label for logs and reports.
    fn label(&self) -> &str;

    /// Start the work on the bound machines.
    fn spawn(&mut self, machines: &[String]) -> SchedulerResult<()>;

    /// Exit code once the work has finished, without blocking.
    fn poll(&mut self) -> SchedulerResult<Option<i32>>;

    /// Terminate the work.
    fn kill(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "exit_code")]
pub enum JobState {
    Queued,
    Assigned,
    Running,
    Completed(i32),
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed(_) | JobState::Killed)
    }

    /// Exit code of a terminal state.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobState::Completed(code) => Some(*code),
            JobState::Killed => Some(KILLED_EXIT_CODE),
            _ => None,
        }
    }
}

pub struct Job<W> {
    pub(crate) id: usize,
    machines_required: usize,
    workload: W,
    state: JobState,
    machines: Vec<String>,
}

impl<W: Workload> Job<W> {
    pub fn new(machines_required: usize, workload: W) -> Self {
        Self {
            id: 0,
            machines_required,
            workload,
            state: JobState::Queued,
            machines: Vec::new(),
        }
    }

    /// Identifier assigned on submission.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn label(&self) -> &str {
        self.workload.label()
    }

    pub fn machines_required(&self) -> usize {
        self.machines_required
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Machines bound to the job while it is assigned or running.
    pub fn machines(&self) -> &[String] {
        &self.machines
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    /// Bind `machines` and start the workload on them.
    ///
    /// On failure the job completes with [`SPAWN_FAILED_EXIT_CODE`]; the
    /// machines stay bound until the scheduler takes them back.
    pub fn spawn(&mut self, machines: Vec<String>) -> SchedulerResult<()> {
        self.machines = machines;
        self.state = JobState::Assigned;
        match self.workload.spawn(&self.machines) {
            Ok(()) => {
                self.state = JobState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = JobState::Completed(SPAWN_FAILED_EXIT_CODE);
                Err(e)
            }
        }
    }

    /// Check the workload once; returns the exit code when it finished.
    pub fn poll(&mut self) -> SchedulerResult<Option<i32>> {
        match self.state {
            JobState::Running => {}
            state if state.is_terminal() => return Ok(state.exit_code()),
            _ => return Err(SchedulerError::NotRunning),
        }
        let code = self.workload.poll()?;
        if let Some(code) = code {
            self.state = JobState::Completed(code);
        }
        Ok(code)
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait(&mut self, interval: Duration) -> SchedulerResult<i32> {
        loop {
            if let Some(code) = self.poll()? {
                return Ok(code);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Kill a running job.
    pub fn kill(&mut self) {
        if self.state == JobState::Running {
            self.workload.kill();
            self.state = JobState::Killed;
        }
    }

    pub(crate) fn take_machines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.machines)
    }
}

/// A shell command run on the scheduling host.
///
/// It still consumes `machines_required` machines from the pool.
pub struct LocalJob {
    command: String,
    control: UnixProcessControl,
    handle: Option<UnixHandle>,
}

impl LocalJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            control: UnixProcessControl::new(),
            handle: None,
        }
    }
}

impl Workload for LocalJob {
    fn label(&self) -> &str {
        &self.command
    }

    fn spawn(&mut self, _machines: &[String]) -> SchedulerResult<()> {
        self.handle = Some(self.control.spawn(&SpawnSpec::new(&self.command))?);
        Ok(())
    }

    fn poll(&mut self) -> SchedulerResult<Option<i32>> {
        let handle = self.handle.as_mut().ok_or(SchedulerError::NotRunning)?;
        Ok(self.control.poll(handle)?)
    }

    fn kill(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if let Err(e) = self.control.kill_group(handle) {
                warn!(command = %self.command, error = %e, "failed to kill local job");
            }
        }
    }
}

/// One simulator run: the pieces of its command line and where its
/// output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimLaunch {
    pub sim_command: String,
    pub sim_flags: String,
    pub app_command: String,
    pub output_dir: PathBuf,
}

impl SimLaunch {
    /// Full command line for a cohort bound to `machines`.
    ///
    /// ```text
    /// <sim> <flags> --general/output_dir="<dir>" --general/num_processes=<n>
    ///     --process_map/process<i>="<host>"... -- <app> > <dir>/output 2>&1
    /// ```
    pub fn render(&self, machines: &[String]) -> String {
        let dir = self.output_dir.to_string_lossy();
        let mut parts = vec![self.sim_command.trim().to_string()];
        if !self.sim_flags.trim().is_empty() {
            parts.push(self.sim_flags.trim().to_string());
        }
        parts.push(format!("--general/output_dir=\"{dir}\""));
        parts.push(format!("--general/num_processes={}", machines.len()));
        for (i, machine) in machines.iter().enumerate() {
            parts.push(format!("--process_map/process{i}=\"{machine}\""));
        }
        parts.push("--".to_string());
        parts.push(self.app_command.trim().to_string());
        parts.push(format!(
            "> {} 2>&1",
            shell_quote(&self.output_dir.join("output").to_string_lossy())
        ));
        parts.join(" ")
    }

    /// Create the output directory, render the command and record it in
    /// `<dir>/command`.
    pub fn prepare(&self, machines: &[String]) -> SchedulerResult<String> {
        fs::create_dir_all(&self.output_dir).map_err(|source| SchedulerError::Prepare {
            path: self.output_dir.clone(),
            source,
        })?;
        let command = self.render(machines);
        let command_file = self.output_dir.join("command");
        fs::write(&command_file, &command).map_err(|source| SchedulerError::Prepare {
            path: command_file,
            source,
        })?;
        Ok(command)
    }
}

/// A simulator run spread over every bound machine.
pub struct CohortJob {
    label: String,
    launch: SimLaunch,
    settings: OrchestratorSettings,
    cohort: Option<Cohort<UnixProcessControl>>,
}

impl CohortJob {
    pub fn new(launch: SimLaunch, settings: OrchestratorSettings) -> Self {
        Self {
            label: launch.output_dir.display().to_string(),
            launch,
            settings,
            cohort: None,
        }
    }

    pub fn launch(&self) -> &SimLaunch {
        &self.launch
    }
}

impl Workload for CohortJob {
    fn label(&self) -> &str {
        &self.label
    }

    fn spawn(&mut self, machines: &[String]) -> SchedulerResult<()> {
        let command = self.launch.prepare(machines)?;
        debug!(job = %self.label, %command, "starting cohort");
        self.cohort = Some(Cohort::spawn(
            UnixProcessControl::new(),
            machines,
            &command,
            &self.settings,
        )?);
        Ok(())
    }

    fn poll(&mut self) -> SchedulerResult<Option<i32>> {
        let cohort = self.cohort.as_mut().ok_or(SchedulerError::NotRunning)?;
        Ok(cohort.poll()?.map(|outcome| outcome.exit_code()))
    }

    fn kill(&mut self) {
        if let Some(cohort) = self.cohort.as_mut() {
            cohort.kill();
        }
    }
}

/// The workloads the scheduler runs.
pub enum JobKind {
    Local(LocalJob),
    Cohort(CohortJob),
}

impl Workload for JobKind {
    fn label(&self) -> &str {
        match self {
            JobKind::Local(job) => job.label(),
            JobKind::Cohort(job) => job.label(),
        }
    }

    fn spawn(&mut self, machines: &[String]) -> SchedulerResult<()> {
        match self {
            JobKind::Local(job) => job.spawn(machines),
            JobKind::Cohort(job) => job.spawn(machines),
        }
    }

    fn poll(&mut self) -> SchedulerResult<Option<i32>> {
        match self {
            JobKind::Local(job) => job.poll(),
            JobKind::Cohort(job) => job.poll(),
        }
    }

    fn kill(&mut self) {
        match self {
            JobKind::Local(job) => job.kill(),
            JobKind::Cohort(job) => job.kill(),
        }
    }
}

impl Job<JobKind> {
    /// A local shell command holding `machines_required` machines.
    pub fn local(machines_required: usize, command: impl Into<String>) -> Self {
        Job::new(machines_required, JobKind::Local(LocalJob::new(command)))
    }

    /// A simulator cohort with one process per machine.
    pub fn cohort(
        machines_required: usize,
        launch: SimLaunch,
        settings: OrchestratorSettings,
    ) -> Self {
        Job::new(
            machines_required,
            JobKind::Cohort(CohortJob::new(launch, settings)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(dir: PathBuf) -> SimLaunch {
        SimLaunch {
            sim_command: "./lib/sim".to_string(),
            sim_flags: "--general/total_cores=16".to_string(),
            app_command: "./tests/apps/fft/fft -p16".to_string(),
            output_dir: dir,
        }
    }

    #[test]
    fn render_command() {
        let command = launch(PathBuf::from("/res/run_0"))
            .render(&["localhost".to_string(), "node2".to_string()]);
        assert_eq!(
            command,
            "./lib/sim --general/total_cores=16 --general/output_dir=\"/res/run_0\" \
             --general/num_processes=2 --process_map/process0=\"localhost\" \
             --process_map/process1=\"node2\" -- ./tests/apps/fft/fft -p16 \
             > /res/run_0/output 2>&1"
        );
    }

    #[test]
    fn render_without_sim_flags() {
        let mut launch = launch(PathBuf::from("out"));
        launch.sim_flags = "  ".to_string();
        assert!(
            launch
                .render(&["localhost".to_string()])
                .starts_with("./lib/sim --general/output_dir=\"out\" ")
        );
    }

    #[test]
    fn prepare_writes_command_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ARGS_x").join("nested");
        let launch = launch(dir.clone());
        let command = launch.prepare(&["localhost".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(dir.join("command")).unwrap(), command);
    }

    #[test]
    fn state_exit_codes() {
        assert!(!JobState::Running.is_terminal());
        assert_eq!(JobState::Completed(4).exit_code(), Some(4));
        assert_eq!(JobState::Killed.exit_code(), Some(KILLED_EXIT_CODE));
        assert_eq!(JobState::Queued.exit_code(), None);
    }

    #[tokio::test]
    async fn local_job_lifecycle() {
        let mut job = Job::local(1, "exit 4");
        assert_eq!(job.state(), JobState::Queued);
        assert!(matches!(job.poll(), Err(SchedulerError::NotRunning)));

        job.spawn(vec!["localhost".to_string()]).unwrap();
        assert_eq!(job.machines().to_vec(), vec!["localhost".to_string()]);
        let code = job.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(code, 4);
        assert_eq!(job.state(), JobState::Completed(4));
    }

    #[test]
    fn local_job_kill() {
        let mut job = Job::local(1, "sleep 30");
        job.spawn(vec!["a".to_string()]).unwrap();
        assert_eq!(job.poll().unwrap(), None);
        job.kill();
        assert_eq!(job.state(), JobState::Killed);
        assert_eq!(job.take_machines(), vec!["a".to_string()]);
    }

    #[test]
    fn cohort_spawn_failure_completes_job() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = OrchestratorSettings {
            work_dir: tmp.path().to_path_buf(),
            index_var: "SWEEP_PROCESS_INDEX".to_string(),
            library_path: None,
            remote_shell: "ssh".to_string(),
            slave_entry: "sweep slave".to_string(),
            renewal_command: None,
            poll_interval: Duration::from_millis(10),
        };
        let mut job = Job::cohort(0, launch(tmp.path().join("run")), settings);
        let err = job.spawn(Vec::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::Spawn(_)));
        assert_eq!(job.state(), JobState::Completed(SPAWN_FAILED_EXIT_CODE));
    }
}
