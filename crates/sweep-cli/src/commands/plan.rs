use std::path::Path;

use sweep_expand::{RunInvocation, load_sweep, plan_runs, plot_directories};

pub fn plan(file: &Path, format: &str) -> anyhow::Result<()> {
    let sweep = load_sweep(file)?;
    let runs = plan_runs(&sweep)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        _ => {
            for (i, run) in runs.iter().enumerate() {
                println!("{}", format_invocation(i, run));
            }
            println!("{} invocation(s)", runs.len());
        }
    }
    Ok(())
}

pub fn dirs(file: &Path, experiment: &Path, runs: u32) -> anyhow::Result<()> {
    let sweep = load_sweep(file)?;
    let invocations = plan_runs(&sweep)?;
    let run_ids: Vec<u32> = (0..runs).collect();
    for dir in plot_directories(experiment, &invocations, &run_ids) {
        println!("{}", dir.display());
    }
    Ok(())
}

fn format_invocation(index: usize, run: &RunInvocation) -> String {
    let tag = |v: Option<u32>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    format!(
        "[{index}] procs={} core={} thread={}  {} -- {} {}",
        run.process_count,
        tag(run.core_index),
        tag(run.user_thread_index),
        run.sim_flags,
        run.app_name,
        run.app_flags
    )
    .trim_end()
    .to_string()
}
