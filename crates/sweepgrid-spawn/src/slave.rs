//! Slave side of the orchestrator.
//!
//! Runs on the remote machine under the remote shell. It starts the target
//! command as a process-group leader, optionally keeps a credential renewal
//! helper alive next to it, and reports the target's exit code through its
//! own exit status. If the remote shell connection drops, the slave is
//! re-parented; it then kills the target group and leaves silently.

use std::time::Duration;

use sweep_core::GridConfig;
use tracing::{debug, info, warn};

use crate::error::SpawnResult;
use crate::process::{ProcessControl, SpawnSpec};

#[derive(Debug, Clone)]
pub struct SlaveSettings {
    pub index_var: String,
    pub renewal_command: Option<String>,
    pub poll_interval: Duration,
}

impl SlaveSettings {
    pub fn from_config(config: &GridConfig) -> Self {
        Self {
            index_var: config.cluster.index_var.clone(),
            renewal_command: config.orchestrator.renewal_command.clone(),
            poll_interval: config.orchestrator.poll_interval(),
        }
    }
}

/// How supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveExit {
    /// The target exited with this code.
    Exited(i32),
    /// Our parent went away; the target group was killed.
    Orphaned,
}

pub struct Slave<P: ProcessControl> {
    control: P,
    ordinal: usize,
    target: P::Handle,
    renewal: Option<P::Handle>,
}

impl<P: ProcessControl> Slave<P> {
    /// Start the target command (and the renewal helper, if configured).
    pub fn start(
        control: P,
        ordinal: usize,
        command: &str,
        settings: &SlaveSettings,
    ) -> SpawnResult<Self> {
        let spec = SpawnSpec::new(command).env(&settings.index_var, ordinal.to_string());
        let target = control.spawn(&spec)?;
        info!(ordinal, %command, "slave started target");

        let renewal = match &settings.renewal_command {
            Some(renew) => match control.spawn(&SpawnSpec::new(renew)) {
                Ok(handle) => {
                    debug!(ordinal, command = %renew, "renewal helper started");
                    Some(handle)
                }
                Err(e) => {
                    warn!(ordinal, error = %e, "renewal helper failed to start");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            control,
            ordinal,
            target,
            renewal,
        })
    }

    /// Poll the target until it exits or we are orphaned.
    pub async fn supervise(mut self, interval: Duration) -> SpawnResult<SlaveExit> {
        loop {
            if let Some(code) = self.control.poll(&mut self.target)? {
                self.stop_renewal();
                info!(ordinal = self.ordinal, code, "target exited");
                return Ok(SlaveExit::Exited(code));
            }
            if self.control.is_orphaned() {
                warn!(ordinal = self.ordinal, "supervising connection lost, killing target");
                if let Err(e) = self.control.kill_group(&mut self.target) {
                    warn!(ordinal = self.ordinal, error = %e, "failed to kill target group");
                }
                self.stop_renewal();
                return Ok(SlaveExit::Orphaned);
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn stop_renewal(&mut self) {
        if let Some(mut helper) = self.renewal.take() {
            if let Err(e) = self.control.kill_group(&mut helper) {
                warn!(ordinal = self.ordinal, error = %e, "failed to stop renewal helper");
            }
            debug!(ordinal = self.ordinal, "renewal helper stopped");
        }
    }
}

impl<P: ProcessControl> Drop for Slave<P> {
    fn drop(&mut self) {
        self.stop_renewal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Scripted process control: handle ids are spawn order.
    #[derive(Default)]
    struct Script {
        spawned: RefCell<Vec<SpawnSpec>>,
        killed: RefCell<Vec<usize>>,
        exit_after_polls: Cell<Option<(u32, i32)>>,
        polls: Cell<u32>,
        orphan_after_polls: Cell<Option<u32>>,
    }

    #[derive(Clone, Default)]
    struct FakeControl(Rc<Script>);

    impl ProcessControl for FakeControl {
        type Handle = usize;

        fn spawn(&self, spec: &SpawnSpec) -> SpawnResult<usize> {
            let mut spawned = self.0.spawned.borrow_mut();
            spawned.push(spec.clone());
            Ok(spawned.len() - 1)
        }

        fn poll(&self, _handle: &mut usize) -> SpawnResult<Option<i32>> {
            let n = self.0.polls.get() + 1;
            self.0.polls.set(n);
            Ok(self
                .0
                .exit_after_polls
                .get()
                .and_then(|(after, code)| (n >= after).then_some(code)))
        }

        fn kill_group(&self, handle: &mut usize) -> SpawnResult<()> {
            self.0.killed.borrow_mut().push(*handle);
            Ok(())
        }

        fn is_orphaned(&self) -> bool {
            self.0
                .orphan_after_polls
                .get()
                .is_some_and(|after| self.0.polls.get() >= after)
        }
    }

    fn settings(renewal: Option<&str>) -> SlaveSettings {
        SlaveSettings {
            index_var: "IDX".to_string(),
            renewal_command: renewal.map(str::to_string),
            poll_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn exit_code_reported_and_helper_stopped() {
        let control = FakeControl::default();
        control.0.exit_after_polls.set(Some((3, 4)));
        let slave = Slave::start(control.clone(), 2, "./sim", &settings(Some("renew -K 60"))).unwrap();

        let exit = slave.supervise(Duration::from_millis(1)).await.unwrap();
        assert_eq!(exit, SlaveExit::Exited(4));

        let spawned = control.0.spawned.borrow();
        assert_eq!(spawned[0].env, vec![("IDX".to_string(), "2".to_string())]);
        assert_eq!(spawned[1].command, "renew -K 60");
        // Only the helper (handle 1) is killed, exactly once.
        assert_eq!(*control.0.killed.borrow(), vec![1]);
    }

    #[tokio::test]
    async fn orphan_kills_target_and_helper() {
        let control = FakeControl::default();
        control.0.orphan_after_polls.set(Some(2));
        let slave = Slave::start(control.clone(), 0, "./sim", &settings(Some("renew"))).unwrap();

        let exit = slave.supervise(Duration::from_millis(1)).await.unwrap();
        assert_eq!(exit, SlaveExit::Orphaned);
        assert_eq!(*control.0.killed.borrow(), vec![0, 1]);
    }

    #[tokio::test]
    async fn without_helper() {
        let control = FakeControl::default();
        control.0.exit_after_polls.set(Some((1, 0)));
        let slave = Slave::start(control.clone(), 0, "true", &settings(None)).unwrap();
        assert_eq!(
            slave.supervise(Duration::from_millis(1)).await.unwrap(),
            SlaveExit::Exited(0)
        );
        assert_eq!(control.0.spawned.borrow().len(), 1);
        assert!(control.0.killed.borrow().is_empty());
    }
}
