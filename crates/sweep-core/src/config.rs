//! sweepgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Default environment variable carrying a cohort member's ordinal.
pub const DEFAULT_INDEX_VAR: &str = "SWEEP_PROCESS_INDEX";

/// Default TCP port of the spawn daemon.
pub const DEFAULT_DAEMON_PORT: u16 = 2000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cluster: ClusterConfig,
    pub scheduler: SchedulerConfig,
    pub orchestrator: OrchestratorConfig,
    pub launch: LaunchConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Machines available to the scheduler, in binding order.
    pub machines: Vec<String>,
    /// Remote shell used to reach non-local machines.
    pub remote_shell: String,
    /// Slave entry point invoked on remote machines.
    pub slave_entry: String,
    /// Working directory on every machine. Defaults to the sim root.
    pub work_dir: Option<PathBuf>,
    /// Environment variable carrying the ordinal index.
    pub index_var: String,
    /// Exported as `LD_LIBRARY_PATH` for every cohort member.
    pub library_path: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            machines: vec!["localhost".to_string()],
            remote_shell: "ssh".to_string(),
            slave_entry: "sweep slave".to_string(),
            work_dir: None,
            index_var: DEFAULT_INDEX_VAR.to_string(),
            library_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub poll_interval_ms: u64,
    /// Credential renewal helper started next to every remote slave.
    pub renewal_command: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            renewal_command: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How a planned run is turned into a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Run the simulator across the bound machines via the orchestrator.
    Cohort,
    /// Run a `make`-style command locally that consumes the bound machines.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub mode: LaunchMode,
    /// Simulator command line prefix used in cohort mode.
    pub sim_command: String,
    /// Simulator configuration file passed with `-c`.
    pub sim_config: Option<String>,
    /// Directory applications are looked up in (`<apps_dir>/<app>/<app>`).
    pub apps_dir: String,
    /// Root of timestamped experiment directories.
    pub results_dir: PathBuf,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            mode: LaunchMode::Cohort,
            sim_command: "./lib/sim".to_string(),
            sim_config: None,
            apps_dir: "./tests/apps".to_string(),
            results_dir: PathBuf::from("results"),
        }
    }
}

/// Spawn daemon protocol flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonMode {
    /// Reply `ack` once the spawned child exits.
    Ack,
    /// Pipe the child's standard streams over the connection.
    Duplex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub mode: DaemonMode,
    /// Hosts allowed to connect. Empty means any peer.
    pub allow: Vec<String>,
    pub max_message: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DAEMON_PORT,
            mode: DaemonMode::Ack,
            allow: Vec::new(),
            max_message: 1024,
        }
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: GridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.cluster.index_var.is_empty() {
            return Err(ConfigError::Invalid("cluster.index_var is empty".into()));
        }
        if self.scheduler.poll_interval_ms == 0 || self.orchestrator.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if self.daemon.max_message < 2 {
            return Err(ConfigError::Invalid("daemon.max_message must be at least 2".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = GridConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("SWEEP_PROCESS_INDEX"));
        let parsed = GridConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.cluster.machines, vec!["localhost"]);
        assert_eq!(parsed.scheduler.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn parse_partial() {
        let toml_str = r#"
[cluster]
machines = ["node1", "node2", "node3"]
library_path = "/opt/pin/runtime"

[launch]
mode = "local"

[daemon]
mode = "duplex"
allow = ["node1"]
"#;
        let config = GridConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.cluster.machines.len(), 3);
        assert_eq!(config.cluster.remote_shell, "ssh");
        assert_eq!(config.launch.mode, LaunchMode::Local);
        assert_eq!(config.daemon.mode, DaemonMode::Duplex);
        assert_eq!(config.daemon.port, DEFAULT_DAEMON_PORT);
        assert_eq!(config.orchestrator.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = GridConfig::from_toml("[scheduler]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll intervals"));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(GridConfig::from_toml("[launch]\nmode = \"batch\"\n").is_err());
    }
}
