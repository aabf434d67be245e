//! The per-job backup loop.
//!
//! Startup replaces any previous process registered under the same name,
//! registers this one, then alternates backup rounds and waits until the
//! controller says stop or shutdown is requested. Round failures are logged
//! and never end the loop.

pub mod controller;
pub mod cron;

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::executor::{BackupExecutor, TickOutcome};
use crate::jobs::{JobRecord, JobRegistry, ProcessControl, Termination};
use crate::transfer::progress::format_duration;
use crate::utils::Result;
pub use controller::{Controller, Forever, Iterations};
pub use cron::{CronParseError, CronSchedule};

/// Source of the wait between two backup rounds
pub trait Cadence: Send + Sync {
    /// How long to sleep after a round; `None` when no further round is due
    fn next_wait(&self) -> Option<Duration>;

    /// Nominal gap between rounds, for logging
    fn interval(&self) -> Option<Duration>;
}

impl Cadence for CronSchedule {
    fn next_wait(&self) -> Option<Duration> {
        self.until_next(&Local::now())
    }

    fn interval(&self) -> Option<Duration> {
        CronSchedule::interval(self, &Local::now())
    }
}

impl Cadence for Duration {
    fn next_wait(&self) -> Option<Duration> {
        Some(*self)
    }

    fn interval(&self) -> Option<Duration> {
        Some(*self)
    }
}

/// Counters of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: usize,
    pub uploads: usize,
    pub failures: usize,
}

pub struct Scheduler {
    executor: BackupExecutor,
    cadence: Box<dyn Cadence>,
    controller: Box<dyn Controller>,
    registry: JobRegistry,
    control: Arc<dyn ProcessControl>,
    record: JobRecord,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// `record` is what gets registered under the job's name; its pid is
    /// normally this process.
    pub fn new(
        executor: BackupExecutor,
        cadence: impl Cadence + 'static,
        registry: JobRegistry,
        control: Arc<dyn ProcessControl>,
        record: JobRecord,
    ) -> Self {
        Self {
            executor,
            cadence: Box::new(cadence),
            controller: Box::new(Forever),
            registry,
            control,
            record,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_controller(mut self, controller: impl Controller + 'static) -> Self {
        self.controller = Box::new(controller);
        self
    }

    /// Cancelling the token ends the loop at its next wait
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn name(&self) -> &str {
        &self.executor.job().name
    }

    /// Terminate a previous holder of the name, then register this job
    pub fn register(&self) -> Result<()> {
        let name = self.name();

        if let Some(previous) = self.registry.get(name)? {
            if previous.pid != self.record.pid {
                match self.control.terminate(previous.pid)? {
                    Termination::Sent => {
                        info!("Terminated previous job {} (pid {})", name, previous.pid)
                    }
                    Termination::NoSuchProcess => {
                        debug!("Previous job {} (pid {}) was not running", name, previous.pid)
                    }
                    Termination::PermissionDenied => {
                        warn!("Not allowed to terminate previous job {} (pid {})", name, previous.pid)
                    }
                }
            }
        }

        self.registry.add(name, self.record.clone())?;
        info!(
            "Registered job {} (pid {}) for {}",
            name,
            self.record.pid,
            self.record.path.display()
        );
        Ok(())
    }

    /// Register, loop, and deregister on exit
    pub async fn run(self) -> Result<RunSummary> {
        let span = info_span!("job", job = %self.name());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<RunSummary> {
        self.register()?;

        match self.cadence.interval() {
            Some(interval) => info!(
                "Starting backups of {} every {} ({})",
                self.record.path.display(),
                format_duration(interval),
                self.record.cron
            ),
            None => info!("Starting backups of {}", self.record.path.display()),
        }

        let summary = self.run_loop().await;

        let name = self.name().to_string();
        match self.registry.remove_if_owned(&name, self.record.pid) {
            Ok(true) => info!("Deregistered job {}", name),
            Ok(false) => debug!("Job {} is registered to another process; leaving it", name),
            Err(err) => warn!("Failed to deregister job {}: {}", name, err),
        }

        info!(
            "Job {} finished: {} rounds, {} uploads, {} failures",
            name, summary.ticks, summary.uploads, summary.failures
        );
        Ok(summary)
    }

    async fn run_loop(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();

        while self.controller.should_continue() {
            if self.shutdown.is_cancelled() {
                break;
            }

            summary.ticks += 1;
            match self.executor.run_once().await {
                Ok(TickOutcome::Uploaded { archive, files, .. }) => {
                    summary.uploads += 1;
                    info!("Backed up {} files as {}", files.len(), archive.display());
                }
                Ok(TickOutcome::Unchanged) => {}
                Err(err) => {
                    summary.failures += 1;
                    error!("Backup round of {} failed: {}", self.name(), err);
                }
            }

            let Some(wait) = self.cadence.next_wait() else {
                warn!("Schedule of {} has no further runs", self.name());
                break;
            };
            debug!("Sleeping for {}", format_duration(wait));

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping job {}", self.name());
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        summary
    }
}
