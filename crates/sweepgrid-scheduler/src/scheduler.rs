//! Scheduler — greedy first-fit admission of queued jobs.
//!
//! Each tick admits at most one job: the first queued job that fits in the
//! available machines, even if an earlier job is still waiting for a larger
//! share. Then every running job is polled and finished jobs return their
//! machines. Once the queue is empty the loop only waits on what is still
//! running. A shutdown signal kills every running job.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SchedulerResult;
use crate::job::{Job, JobKind, JobState, Workload};
use crate::pool::MachinePool;

/// Default delay between scheduling ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub job: usize,
    pub label: String,
    pub machines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub job: usize,
    pub label: String,
    pub state: JobState,
}

/// What happened during a scheduler run, in observation order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleReport {
    pub admissions: Vec<Admission>,
    pub outcomes: Vec<Outcome>,
    /// The run was cut short by the shutdown signal.
    pub interrupted: bool,
    /// Jobs still queued when the run was interrupted.
    pub unscheduled: Vec<usize>,
}

impl ScheduleReport {
    /// Exit code of the last job observed to finish.
    pub fn last_exit_code(&self) -> Option<i32> {
        self.outcomes.last().and_then(|o| o.state.exit_code())
    }
}

pub struct Scheduler<W: Workload = JobKind> {
    pool: MachinePool,
    queued: Vec<Job<W>>,
    running: Vec<Job<W>>,
    poll_interval: Duration,
    next_id: usize,
}

impl<W: Workload> Scheduler<W> {
    pub fn new(pool: MachinePool) -> Self {
        Self {
            pool,
            queued: Vec::new(),
            running: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            next_id: 0,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Queue a job; returns its id.
    pub fn submit(&mut self, mut job: Job<W>) -> usize {
        job.id = self.next_id;
        self.next_id += 1;
        debug!(job = job.id, label = %job.label(), machines = job.machines_required(), "job queued");
        self.queued.push(job);
        self.next_id - 1
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Run every queued job to completion, or until `shutdown` turns true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<ScheduleReport> {
        let mut report = ScheduleReport::default();
        info!(
            jobs = self.queued.len(),
            machines = self.pool.total(),
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                return self.interrupt(report);
            }
            self.admit_next(&mut report)?;
            if self.queued.is_empty() {
                break;
            }
            self.reap(&mut report)?;
            pause(&mut shutdown, self.poll_interval).await;
        }

        while !self.running.is_empty() {
            if *shutdown.borrow() {
                return self.interrupt(report);
            }
            self.reap(&mut report)?;
            if self.running.is_empty() {
                break;
            }
            pause(&mut shutdown, self.poll_interval).await;
        }

        info!(
            finished = report.outcomes.len(),
            last_exit_code = ?report.last_exit_code(),
            "scheduler finished"
        );
        Ok(report)
    }

    /// Admit the first queued job that fits.
    fn admit_next(&mut self, report: &mut ScheduleReport) -> SchedulerResult<()> {
        let available = self.pool.available();
        let Some(index) = self
            .queued
            .iter()
            .position(|job| job.machines_required() <= available)
        else {
            return Ok(());
        };
        let Some(machines) = self.pool.take(self.queued[index].machines_required()) else {
            return Ok(());
        };
        let mut job = self.queued.remove(index);

        info!(job = job.id(), label = %job.label(), machines = ?machines, "job admitted");
        report.admissions.push(Admission {
            job: job.id(),
            label: job.label().to_string(),
            machines: machines.clone(),
        });

        match job.spawn(machines) {
            Ok(()) => self.running.push(job),
            Err(e) => {
                warn!(job = job.id(), error = %e, "job failed to start");
                self.finish(job, report)?;
            }
        }
        Ok(())
    }

    /// Poll running jobs and retire the finished ones.
    fn reap(&mut self, report: &mut ScheduleReport) -> SchedulerResult<()> {
        let mut index = 0;
        while index < self.running.len() {
            let job = &mut self.running[index];
            let finished = match job.poll() {
                Ok(code) => code.is_some(),
                Err(e) => {
                    warn!(job = job.id(), error = %e, "job poll failed, killing it");
                    job.kill();
                    true
                }
            };
            if finished {
                let job = self.running.remove(index);
                self.finish(job, report)?;
            } else {
                index += 1;
            }
        }
        Ok(())
    }

    fn finish(&mut self, mut job: Job<W>, report: &mut ScheduleReport) -> SchedulerResult<()> {
        let machines = job.take_machines();
        self.pool.release(&machines)?;
        info!(job = job.id(), state = ?job.state(), available = self.pool.available(), "job finished");
        report.outcomes.push(Outcome {
            job: job.id(),
            label: job.label().to_string(),
            state: job.state(),
        });
        Ok(())
    }

    fn interrupt(mut self, mut report: ScheduleReport) -> SchedulerResult<ScheduleReport> {
        warn!(
            running = self.running.len(),
            queued = self.queued.len(),
            "scheduler interrupted, killing running jobs"
        );
        for mut job in std::mem::take(&mut self.running) {
            job.kill();
            self.finish(job, &mut report)?;
        }
        report.interrupted = true;
        report.unscheduled = self.queued.iter().map(Job::id).collect();
        Ok(report)
    }
}

/// Sleep one tick, waking early if the shutdown flag changes.
async fn pause(shutdown: &mut watch::Receiver<bool>, interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        Ok(()) = shutdown.changed() => {}
    }
}
