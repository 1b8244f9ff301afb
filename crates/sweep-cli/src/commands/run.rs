use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sweep_core::{GridConfig, LaunchConfig, LaunchMode, load_process_map, sim_root};
use sweep_expand::{RunInvocation, load_sweep, plan_runs};
use sweepgrid_scheduler::{Job, JobKind, MachinePool, Scheduler, SimLaunch};
use sweepgrid_spawn::{OrchestratorSettings, shell_quote};
use tokio::sync::watch;
use tracing::{info, warn};

/// Experiment directory timestamp, e.g. `2024_03_01__17_05_09`.
const EXPERIMENT_STAMP: &str = "%Y_%m_%d__%H_%M_%S";

pub struct RunOptions {
    pub file: PathBuf,
    pub dry_run: bool,
    pub runs: u32,
    pub config: Option<PathBuf>,
    pub machines: Option<PathBuf>,
}

/// One scheduled unit: an invocation under a run id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRun {
    pub output_dir: PathBuf,
    pub machines_required: usize,
    pub launch: Launch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// Simulator cohort; the command line is finished once machines are bound.
    Cohort(SimLaunch),
    /// A complete local command line.
    Local(String),
}

impl PlannedRun {
    /// The command as recorded in `exec_command.txt`.
    pub fn exec_command(&self) -> String {
        match &self.launch {
            Launch::Cohort(launch) => format!(
                "{} {} -- {}",
                launch.sim_command, launch.sim_flags, launch.app_command
            ),
            Launch::Local(command) => command.clone(),
        }
    }

    fn into_job(self, settings: &OrchestratorSettings) -> Job<JobKind> {
        match self.launch {
            Launch::Cohort(launch) => Job::cohort(self.machines_required, launch, settings.clone()),
            Launch::Local(command) => Job::local(self.machines_required, command),
        }
    }
}

pub async fn run(opts: RunOptions) -> anyhow::Result<i32> {
    let grid = GridConfig::load_or_default(opts.config.as_deref())?;
    let sweep = load_sweep(&opts.file)?;
    let invocations = plan_runs(&sweep)?;
    let machines = match &opts.machines {
        Some(path) => load_process_map(path)?,
        None => grid.cluster.machines.clone(),
    };
    let pool = MachinePool::new(machines.clone());

    let root = sim_root();
    let stamp = chrono::Local::now().format(EXPERIMENT_STAMP).to_string();
    let experiment_dir = root.join(&grid.launch.results_dir).join(stamp);
    let planned = plan_jobs(&grid.launch, &root, &experiment_dir, &invocations, opts.runs);

    for run in &planned {
        if run.machines_required > pool.total() {
            warn!(
                dir = %run.output_dir.display(),
                needs = run.machines_required,
                pool = pool.total(),
                "run needs more machines than the pool holds and will never start"
            );
        }
        println!("{}", preview(run, &machines));
    }
    info!(runs = planned.len(), machines = pool.total(), "sweep expanded");
    if opts.dry_run {
        return Ok(0);
    }

    prepare_experiment(&experiment_dir, &opts.file, &planned)?;
    info!(dir = %experiment_dir.display(), "experiment directory created");

    let settings = OrchestratorSettings::from_config(&grid, root);
    let mut scheduler =
        Scheduler::new(pool).with_poll_interval(grid.scheduler.poll_interval());
    for run in planned {
        scheduler.submit(run.into_job(&settings));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping jobs");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = scheduler.run(shutdown_rx).await?;
    let code = report.last_exit_code().unwrap_or(0);
    info!(
        finished = report.outcomes.len(),
        interrupted = report.interrupted,
        exit_code = code,
        "sweep done"
    );
    Ok(code)
}

/// Every invocation under every run id, run id outermost.
pub fn plan_jobs(
    launch: &LaunchConfig,
    sim_root: &Path,
    experiment_dir: &Path,
    invocations: &[RunInvocation],
    runs: u32,
) -> Vec<PlannedRun> {
    (0..runs)
        .flat_map(|run_id| {
            invocations.iter().map(move |inv| {
                let output_dir = experiment_dir.join(inv.directory_name(run_id));
                let launch = match launch.mode {
                    LaunchMode::Cohort => Launch::Cohort(SimLaunch {
                        sim_command: sim_command(launch),
                        sim_flags: inv.sim_flags.clone(),
                        app_command: app_command(launch, inv),
                        output_dir: output_dir.clone(),
                    }),
                    LaunchMode::Local => {
                        Launch::Local(make_command(launch, sim_root, inv, &output_dir))
                    }
                };
                PlannedRun {
                    output_dir,
                    machines_required: inv.process_count as usize,
                    launch,
                }
            })
        })
        .collect()
}

fn sim_command(launch: &LaunchConfig) -> String {
    match &launch.sim_config {
        Some(cfg) => format!("{} -c {}", launch.sim_command, shell_quote(cfg)),
        None => launch.sim_command.clone(),
    }
}

fn app_command(launch: &LaunchConfig, inv: &RunInvocation) -> String {
    let binary = format!(
        "{}/{name}/{name}",
        launch.apps_dir.trim_end_matches('/'),
        name = inv.app_name
    );
    if inv.app_flags.is_empty() {
        binary
    } else {
        format!("{binary} {}", inv.app_flags)
    }
}

/// `make -C <root> <app> PROCS=<n> SIM_FLAGS="..." APP_FLAGS="..."`, with
/// output captured in `<dir>/output`.
pub fn make_command(
    launch: &LaunchConfig,
    sim_root: &Path,
    inv: &RunInvocation,
    output_dir: &Path,
) -> String {
    let mut sim_flags = String::new();
    let mut config_arg = String::new();
    if let Some(cfg) = &launch.sim_config {
        let cfg = sim_root.join(cfg);
        sim_flags.push_str(&format!("-c {} ", cfg.display()));
        config_arg = format!(" CONFIG_FILE={}", shell_quote(&cfg.to_string_lossy()));
    }
    sim_flags.push_str(&inv.sim_flags);
    sim_flags.push_str(&format!(
        " --general/output_dir=\"{}\"",
        output_dir.display()
    ));

    format!(
        "make -C {} {} PROCS={}{config_arg} SIM_FLAGS={} APP_FLAGS={} > {} 2>&1",
        shell_quote(&sim_root.to_string_lossy()),
        inv.app_name,
        inv.process_count,
        shell_quote(sim_flags.trim_start()),
        shell_quote(&inv.app_flags),
        shell_quote(&output_dir.join("output").to_string_lossy()),
    )
}

fn preview(run: &PlannedRun, machines: &[String]) -> String {
    match &run.launch {
        Launch::Cohort(launch) => {
            let bound = &machines[..run.machines_required.min(machines.len())];
            launch.render(bound)
        }
        Launch::Local(command) => command.clone(),
    }
}

/// Create the experiment and run directories, copy the sweep file in and
/// record each run's command.
pub fn prepare_experiment(
    experiment_dir: &Path,
    sweep_file: &Path,
    planned: &[PlannedRun],
) -> anyhow::Result<()> {
    fs::create_dir_all(experiment_dir)
        .with_context(|| format!("creating {}", experiment_dir.display()))?;
    if let Some(name) = sweep_file.file_name() {
        fs::copy(sweep_file, experiment_dir.join(name))
            .with_context(|| format!("copying {}", sweep_file.display()))?;
    }
    for run in planned {
        fs::create_dir_all(&run.output_dir)
            .with_context(|| format!("creating {}", run.output_dir.display()))?;
        fs::write(run.output_dir.join("exec_command.txt"), run.exec_command())
            .with_context(|| format!("writing command for {}", run.output_dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> RunInvocation {
        RunInvocation {
            process_count: 2,
            sim_flags: "--general/total_cores=16".to_string(),
            core_index: Some(0),
            app_name: "fft".to_string(),
            app_flags: "-p16".to_string(),
            user_thread_index: Some(0),
        }
    }

    #[test]
    fn plan_jobs_cohort_mode() {
        let launch = LaunchConfig {
            sim_config: Some("carbon_sim.cfg".to_string()),
            ..LaunchConfig::default()
        };
        let planned = plan_jobs(
            &launch,
            Path::new("/sim"),
            Path::new("/sim/results/x"),
            &[invocation()],
            2,
        );
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].machines_required, 2);
        assert_eq!(
            planned[1].output_dir,
            Path::new("/sim/results/x").join(invocation().directory_name(1))
        );
        let Launch::Cohort(sim) = &planned[0].launch else {
            panic!("expected a cohort launch");
        };
        assert_eq!(sim.sim_command, "./lib/sim -c carbon_sim.cfg");
        assert_eq!(sim.app_command, "./tests/apps/fft/fft -p16");
        assert_eq!(
            planned[0].exec_command(),
            "./lib/sim -c carbon_sim.cfg --general/total_cores=16 -- ./tests/apps/fft/fft -p16"
        );
    }

    #[test]
    fn make_command_line_for_local_mode() {
        let launch = LaunchConfig {
            mode: LaunchMode::Local,
            sim_config: Some("carbon_sim.cfg".to_string()),
            ..LaunchConfig::default()
        };
        let command = make_command(
            &launch,
            Path::new("/sim"),
            &invocation(),
            Path::new("/sim/results/run"),
        );
        assert_eq!(
            command,
            "make -C /sim fft PROCS=2 CONFIG_FILE=/sim/carbon_sim.cfg \
             SIM_FLAGS='-c /sim/carbon_sim.cfg --general/total_cores=16 \
             --general/output_dir=\"/sim/results/run\"' APP_FLAGS=-p16 \
             > /sim/results/run/output 2>&1"
        );
    }

    #[test]
    fn prepare_experiment_writes_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let sweep_file = tmp.path().join("tests.cfg");
        fs::write(&sweep_file, "[apps]\nfft\n[/apps]\n").unwrap();
        let experiment = tmp.path().join("results").join("2024_01_01__00_00_00");
        let planned = plan_jobs(
            &LaunchConfig::default(),
            tmp.path(),
            &experiment,
            &[invocation()],
            1,
        );

        prepare_experiment(&experiment, &sweep_file, &planned).unwrap();

        assert!(experiment.join("tests.cfg").exists());
        let recorded =
            fs::read_to_string(planned[0].output_dir.join("exec_command.txt")).unwrap();
        assert_eq!(recorded, planned[0].exec_command());
    }

    #[test]
    fn preview_binds_front_machines() {
        let planned = plan_jobs(
            &LaunchConfig::default(),
            Path::new("/sim"),
            Path::new("/out"),
            &[invocation()],
            1,
        );
        let machines = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let text = preview(&planned[0], &machines);
        assert!(text.contains("--process_map/process1=\"b\""));
        assert!(!text.contains("process2"));
    }
}
