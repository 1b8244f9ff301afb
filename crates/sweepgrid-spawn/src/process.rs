//! Process control capability.
//!
//! Everything OS specific the orchestrator needs sits behind
//! [`ProcessControl`]: spawning a shell command as a process-group leader,
//! non-blocking exit polling, signalling the whole group, and noticing that
//! our own parent went away.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::{Pid, getppid};
use tracing::debug;

use crate::error::{SpawnError, SpawnResult};

/// What to run and with which environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    /// Shell command line, run with `sh -c`.
    pub command: String,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl SpawnSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// OS capability used by the master and the slave.
pub trait ProcessControl {
    type Handle;

    /// Start `spec` as the leader of a new process group.
    fn spawn(&self, spec: &SpawnSpec) -> SpawnResult<Self::Handle>;

    /// Exit code if the process has terminated, without blocking.
    fn poll(&self, handle: &mut Self::Handle) -> SpawnResult<Option<i32>>;

    /// Kill the handle's whole process group and reap the leader.
    fn kill_group(&self, handle: &mut Self::Handle) -> SpawnResult<()>;

    /// Whether the process that started us is gone.
    fn is_orphaned(&self) -> bool;
}

/// A child started by [`UnixProcessControl`].
#[derive(Debug)]
pub struct UnixHandle {
    child: Child,
}

impl UnixHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// [`ProcessControl`] for Unix hosts.
///
/// Orphan detection compares the current parent pid with the one seen at
/// construction: re-parenting to init (or a subreaper) flips it.
#[derive(Debug, Clone)]
pub struct UnixProcessControl {
    parent: Pid,
    inherit_stdio: bool,
}

impl Default for UnixProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl UnixProcessControl {
    pub fn new() -> Self {
        Self {
            parent: getppid(),
            inherit_stdio: true,
        }
    }

    /// Route children's stdio to `/dev/null` instead of ours.
    pub fn quiet(mut self) -> Self {
        self.inherit_stdio = false;
        self
    }
}

/// Shell convention: signal deaths report as `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

impl ProcessControl for UnixProcessControl {
    type Handle = UnixHandle;

    fn spawn(&self, spec: &SpawnSpec) -> SpawnResult<UnixHandle> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&spec.command).process_group(0);
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        if !self.inherit_stdio {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        let child = command.spawn().map_err(|source| SpawnError::Spawn {
            command: spec.command.clone(),
            source,
        })?;
        debug!(pid = child.id(), command = %spec.command, "process spawned");
        Ok(UnixHandle { child })
    }

    fn poll(&self, handle: &mut UnixHandle) -> SpawnResult<Option<i32>> {
        let pid = handle.pid();
        handle
            .child
            .try_wait()
            .map(|status| status.map(exit_code))
            .map_err(|source| SpawnError::Poll { pid, source })
    }

    fn kill_group(&self, handle: &mut UnixHandle) -> SpawnResult<()> {
        let pgid = handle.pid() as i32;
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(source) => return Err(SpawnError::Signal { pgid, source }),
        }
        let pid = handle.pid();
        handle
            .child
            .wait()
            .map_err(|source| SpawnError::Poll { pid, source })?;
        debug!(pgid, "process group killed");
        Ok(())
    }

    fn is_orphaned(&self) -> bool {
        getppid() != self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for(control: &UnixProcessControl, handle: &mut UnixHandle) -> i32 {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(code) = control.poll(handle).unwrap() {
                return code;
            }
            assert!(Instant::now() < deadline, "process did not exit");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn exit_code_and_env() {
        let control = UnixProcessControl::new().quiet();
        let spec = SpawnSpec::new("exit $IDX").env("IDX", "7");
        let mut handle = control.spawn(&spec).unwrap();
        assert_eq!(wait_for(&control, &mut handle), 7);
    }

    #[test]
    fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let control = UnixProcessControl::new().quiet();
        let spec = SpawnSpec::new("touch marker").working_dir(dir.path());
        let mut handle = control.spawn(&spec).unwrap();
        assert_eq!(wait_for(&control, &mut handle), 0);
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn kill_group_reports_signal() {
        let control = UnixProcessControl::new().quiet();
        let mut handle = control.spawn(&SpawnSpec::new("sleep 30")).unwrap();
        assert_eq!(control.poll(&mut handle).unwrap(), None);
        control.kill_group(&mut handle).unwrap();
        assert_eq!(control.poll(&mut handle).unwrap(), Some(128 + 9));
    }

    #[test]
    fn kill_group_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let control = UnixProcessControl::new().quiet();
        let command = format!("(sleep 1; touch {}) & sleep 30", marker.display());
        let mut handle = control.spawn(&SpawnSpec::new(command)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        control.kill_group(&mut handle).unwrap();
        std::thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "background child survived the group kill");
    }

    #[test]
    fn not_orphaned_in_process() {
        assert!(!UnixProcessControl::new().is_orphaned());
    }
}
