//! Run planning — pairs simulator variants with application instances.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::ExpandResult;
use crate::generator::{AppInstance, SimVariant, expand_app, generate};
use crate::parser::SweepConfig;

/// A fully expanded run: one simulator variant crossed with one
/// application instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunInvocation {
    pub process_count: u32,
    pub sim_flags: String,
    pub core_index: Option<u32>,
    pub app_name: String,
    pub app_flags: String,
    pub user_thread_index: Option<u32>,
}

impl RunInvocation {
    /// Directory name for this run under an experiment directory.
    ///
    /// Flag strings are flattened together with the spaces that separate
    /// them from the app name, so non-empty sim flags end in `___` and
    /// non-empty app flags start with it: `ARGS_<sim>___<app>____<appflags>_<run>`.
    pub fn directory_name(&self, run_id: u32) -> String {
        let sim = if self.sim_flags.is_empty() {
            String::new()
        } else {
            sanitize(&format!("{} ", self.sim_flags))
        };
        let app = if self.app_flags.is_empty() {
            String::new()
        } else {
            sanitize(&format!(" {}", self.app_flags))
        };
        format!("ARGS_{sim}{}_{app}_{run_id}", self.app_name)
    }
}

/// Whether an application's thread index may run under a core index.
pub fn thread_compatible(core_index: Option<u32>, user_thread_index: Option<u32>) -> bool {
    match (core_index, user_thread_index) {
        (None, _) | (_, None) => true,
        (Some(core), Some(thread)) => core == thread,
    }
}

/// Cross variants with app instances, keeping thread-compatible pairs.
pub fn pair_runs(variants: &[SimVariant], apps: &[AppInstance]) -> Vec<RunInvocation> {
    variants
        .iter()
        .flat_map(|variant| {
            apps.iter()
                .filter(|app| thread_compatible(variant.core_index, app.user_thread_index))
                .map(move |app| RunInvocation {
                    process_count: variant.process_count,
                    sim_flags: variant.flags.clone(),
                    core_index: variant.core_index,
                    app_name: app.name.clone(),
                    app_flags: app.flags.clone(),
                    user_thread_index: app.user_thread_index,
                })
        })
        .collect()
}

/// Expand a sweep configuration into every run it describes.
pub fn plan_runs(config: &SweepConfig) -> ExpandResult<Vec<RunInvocation>> {
    let variants = generate(&config.variables, &config.fixed_args(), config.baseline_procs)?;
    let apps: Vec<AppInstance> = config.apps.iter().flat_map(expand_app).collect();
    let runs = pair_runs(&variants, &apps);
    info!(
        variants = variants.len(),
        app_instances = apps.len(),
        runs = runs.len(),
        "sweep planned"
    );
    Ok(runs)
}

/// Flatten a flag string into something usable as a path component.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            ' ' => out.push_str("___"),
            '-' => {}
            '/' => out.push_str("__"),
            c if c.is_alphanumeric() || c == '_' => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

/// Run directories of every planned run for each run id.
pub fn plot_directories(
    experiment_dir: &Path,
    runs: &[RunInvocation],
    run_ids: &[u32],
) -> Vec<PathBuf> {
    runs.iter()
        .flat_map(|run| {
            run_ids
                .iter()
                .map(move |id| experiment_dir.join(run.directory_name(*id)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_sweep;

    const MATCHED: &str = r#"
[apps]
fft -p[$16,32]
[/apps]
[sim]
[general]
total_cores = [16,32]
[/sim]
"#;

    #[test]
    fn thread_gating_keeps_matching_pairs() {
        let config = parse_sweep(MATCHED).unwrap();
        let runs = plan_runs(&config).unwrap();
        let pairs: Vec<_> = runs
            .iter()
            .map(|r| (r.sim_flags.as_str(), r.app_flags.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("--general/total_cores=16", "-p16"),
                ("--general/total_cores=32", "-p32"),
            ]
        );
    }

    #[test]
    fn unconstrained_sides_pair_with_everything() {
        let text = r#"
[apps]
fft -p[$16,32]
ping_pong
[/apps]
[sim]
[network]
model = [a,b]
[/sim]
"#;
        let runs = plan_runs(&parse_sweep(text).unwrap()).unwrap();
        // No total_cores axis: every variant takes every instance.
        assert_eq!(runs.len(), 2 * 3);
    }

    #[test]
    fn thread_index_must_fit_core_index() {
        assert!(thread_compatible(None, Some(3)));
        assert!(thread_compatible(Some(3), None));
        assert!(thread_compatible(Some(1), Some(1)));
        assert!(!thread_compatible(Some(0), Some(1)));
    }

    #[test]
    fn process_count_flows_into_runs() {
        let text = "[apps]\nfft\n[/apps]\n[sim]\n[general]\nnum_processes = 3\n[/sim]\n";
        let runs = plan_runs(&parse_sweep(text).unwrap()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].process_count, 3);
        assert_eq!(runs[0].sim_flags, "--general/num_processes=3");
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize("--general/total_cores=16 -p"), "general__total_cores_16___p");
    }

    #[test]
    fn directory_name_without_flags() {
        let run = RunInvocation {
            process_count: 1,
            sim_flags: String::new(),
            core_index: None,
            app_name: "ping_pong".to_string(),
            app_flags: String::new(),
            user_thread_index: None,
        };
        assert_eq!(run.directory_name(2), "ARGS_ping_pong__2");
    }

    #[test]
    fn directory_names() {
        let config = parse_sweep(MATCHED).unwrap();
        let runs = plan_runs(&config).unwrap();
        assert_eq!(
            runs[0].directory_name(0),
            "ARGS_general__total_cores_16___fft____p16_0"
        );

        let dirs = plot_directories(Path::new("/results/exp"), &runs, &[0, 1]);
        assert_eq!(dirs.len(), 4);
        assert_eq!(
            dirs[1],
            PathBuf::from("/results/exp/ARGS_general__total_cores_16___fft____p16_1")
        );
    }
}
