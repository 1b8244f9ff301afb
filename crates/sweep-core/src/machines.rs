//! Machine lists and simulator root discovery.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable naming the simulator root directory.
pub const SIM_ROOT_VAR: &str = "SWEEPGRID_HOME";

static QUOTED_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(.*)""#).expect("valid regex"));

/// Whether `machine` names the host we are running on.
pub fn is_local_host(machine: &str) -> bool {
    machine == "localhost" || machine == "127.0.0.1"
}

/// Read a machine list from a simulator config's `[process_map]` section.
///
/// Entries look like `process0 = "host"`; the section ends at the first
/// blank line.
pub fn load_process_map(path: &Path) -> ConfigResult<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_process_map(&content, path)
}

pub fn parse_process_map(content: &str, path: &Path) -> ConfigResult<Vec<String>> {
    let mut lines = content.lines().enumerate();
    if !lines.any(|(_, line)| line.trim_end() == "[process_map]") {
        return Err(ConfigError::MissingProcessMap {
            path: path.to_path_buf(),
        });
    }

    let mut hosts = Vec::new();
    for (number, line) in lines {
        if line.trim().is_empty() {
            break;
        }
        let host = QUOTED_HOST
            .captures(line)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ConfigError::ProcessMapEntry {
                path: path.to_path_buf(),
                line: number + 1,
            })?;
        hosts.push(host.as_str().to_string());
    }
    Ok(hosts)
}

/// Simulator root: `$SWEEPGRID_HOME`, else the current directory.
pub fn sim_root() -> PathBuf {
    match std::env::var_os(SIM_ROOT_VAR) {
        Some(root) => PathBuf::from(root),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            warn!(var = SIM_ROOT_VAR, root = %cwd.display(), "sim root undefined, using current directory");
            cwd
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIM_CFG: &str = r#"[general]
total_cores = 64

[process_map]
process0 = "127.0.0.1"
process1 = "node-a"
process2 = "node-b"

[network]
model = "magic"
"#;

    #[test]
    fn parse_process_map_stops_at_blank() {
        let hosts = parse_process_map(SIM_CFG, Path::new("sim.cfg")).unwrap();
        assert_eq!(hosts, vec!["127.0.0.1", "node-a", "node-b"]);
    }

    #[test]
    fn missing_section() {
        let err = parse_process_map("[general]\n", Path::new("sim.cfg")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingProcessMap { .. }));
    }

    #[test]
    fn unquoted_entry_is_rejected() {
        let err = parse_process_map("[process_map]\nprocess0 = node\n", Path::new("x.cfg"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ProcessMapEntry { line: 2, .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.cfg");
        std::fs::write(&path, SIM_CFG).unwrap();
        assert_eq!(load_process_map(&path).unwrap().len(), 3);
    }

    #[test]
    fn local_hosts() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(!is_local_host("node-a"));
    }
}
