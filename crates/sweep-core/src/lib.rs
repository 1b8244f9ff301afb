pub mod config;
pub mod error;
pub mod machines;

pub use config::{
    ClusterConfig, DaemonConfig, DaemonMode, GridConfig, LaunchConfig, LaunchMode,
    OrchestratorConfig, SchedulerConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use machines::{is_local_host, load_process_map, sim_root};
