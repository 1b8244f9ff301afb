use std::path::Path;

use anyhow::bail;
use sweep_core::{GridConfig, load_process_map, sim_root};
use sweepgrid_spawn::{
    Cohort, KILLED_EXIT_CODE, OrchestratorSettings, Slave, SlaveExit, SlaveSettings,
    UnixProcessControl,
};
use tracing::{info, warn};

/// Standalone master: one cohort over the first `num_procs` machines.
pub async fn master(
    config: Option<&Path>,
    num_procs: usize,
    process_map: &Path,
    command: &str,
) -> anyhow::Result<i32> {
    let grid = GridConfig::load_or_default(config)?;
    let machines = load_process_map(process_map)?;
    if machines.len() < num_procs {
        bail!(
            "{} lists {} machine(s), {num_procs} requested",
            process_map.display(),
            machines.len()
        );
    }
    let settings = OrchestratorSettings::from_config(&grid, sim_root());

    let mut cohort = Cohort::spawn(
        UnixProcessControl::new(),
        &machines[..num_procs],
        command,
        &settings,
    )?;
    let finished = tokio::select! {
        outcome = cohort.wait(settings.poll_interval) => Some(outcome?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            warn!("interrupted, killing cohort");
            cohort.kill()
        }
    };
    info!(?outcome, "cohort done");
    Ok(outcome.exit_code())
}

/// Settings the master passes on the slave's command line.
#[derive(Debug, Default)]
pub struct SlaveOverrides {
    pub index_var: Option<String>,
    pub renew: Option<String>,
}

impl SlaveOverrides {
    fn apply(self, settings: &mut SlaveSettings) {
        if let Some(index_var) = self.index_var {
            settings.index_var = index_var;
        }
        if self.renew.is_some() {
            settings.renewal_command = self.renew;
        }
    }
}

/// Slave entry point: run the target and report its exit code.
pub async fn slave(
    config: Option<&Path>,
    overrides: SlaveOverrides,
    ordinal: usize,
    command: &str,
) -> anyhow::Result<i32> {
    let grid = GridConfig::load_or_default(config)?;
    let mut settings = SlaveSettings::from_config(&grid);
    overrides.apply(&mut settings);
    let slave = Slave::start(UnixProcessControl::new(), ordinal, command, &settings)?;
    match slave.supervise(settings.poll_interval).await? {
        SlaveExit::Exited(code) => Ok(code),
        // Nobody is left to report to.
        SlaveExit::Orphaned => Ok(KILLED_EXIT_CODE),
    }
}
