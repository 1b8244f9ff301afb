//! Children the daemon has spawned and not yet seen exit.

use std::collections::HashSet;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Process-group leaders, keyed by pid. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ChildRegistry {
    pids: Arc<Mutex<HashSet<u32>>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `command` and track it before any `kill_all` can run.
    pub async fn spawn(&self, command: &mut Command) -> std::io::Result<Child> {
        let mut pids = self.pids.lock().await;
        let child = command.spawn()?;
        if let Some(pid) = child.id() {
            pids.insert(pid);
        }
        Ok(child)
    }

    pub async fn insert(&self, pid: u32) {
        self.pids.lock().await.insert(pid);
    }

    pub async fn remove(&self, pid: u32) {
        self.pids.lock().await.remove(&pid);
    }

    pub async fn len(&self) -> usize {
        self.pids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pids.lock().await.is_empty()
    }

    /// SIGKILL every tracked process group; returns how many were signalled.
    ///
    /// Entries stay until their watcher sees the exit.
    pub async fn kill_all(&self) -> usize {
        let pids = self.pids.lock().await;
        let mut killed = 0;
        for &pid in pids.iter() {
            if kill_group(pid) {
                killed += 1;
            }
        }
        killed
    }
}

/// SIGKILL the process group led by `pid`. False if nothing was signalled.
pub fn kill_group(pid: u32) -> bool {
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already gone");
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "failed to kill process group");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_remove() {
        let registry = ChildRegistry::new();
        assert!(registry.is_empty().await);
        registry.insert(10).await;
        registry.insert(11).await;
        registry.remove(10).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn kill_all_signals_groups() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let registry = ChildRegistry::new();
        registry.insert(child.id().unwrap()).await;

        assert_eq!(registry.kill_all().await, 1);
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn spawned_child_is_tracked_on_return() {
        let registry = ChildRegistry::new();
        let mut command = Command::new("sleep");
        command.arg("30").process_group(0);
        let mut child = registry.spawn(&mut command).await.unwrap();
        let pid = child.id().unwrap();
        assert_eq!(registry.len().await, 1);

        assert_eq!(registry.kill_all().await, 1);
        assert!(!child.wait().await.unwrap().success());
        registry.remove(pid).await;
        assert!(registry.is_empty().await);
    }
}
