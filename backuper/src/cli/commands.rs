//! Handlers behind each subcommand. Each prints its user-facing outcome.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{Command, JobArgs};
use crate::config::Config;
use crate::daemon::shutdown::ShutdownCoordinator;
use crate::daemon::spawn::spawn_detached;
use crate::executor::manifest::BackupManifest;
use crate::executor::{BackupExecutor, BackupJob};
use crate::jobs::{JobRecord, JobRegistry, SignalControl, StopOutcome};
use crate::scheduler::{CronSchedule, RunSummary, Scheduler};
use crate::storage::{self, local::LocalDirectory, BackendKind, StorageBackend};
use crate::utils::{BackuperError, Result};

/// Dispatch one parsed command
pub async fn execute(
    command: Command,
    log_level: Option<&str>,
    config: Config,
) -> anyhow::Result<()> {
    config.ensure_dirs().context("failed to create application directory")?;

    match command {
        Command::Start(job) => start(&job, log_level, &config),
        Command::Run(job) => run(&job, &config).await.map(|_| ()).map_err(Into::into),
        Command::Stop { name } => stop(&name, &config),
        Command::Backups => backups(&config),
        Command::Auth { disk } => auth(disk, &config).await,
        Command::Diskfiles { disk } => diskfiles(disk, &config).await,
        Command::Download { disk, name, output } => download(disk, &name, output, &config).await,
    }
}

/// Everything a job needs, checked before any process is launched
#[derive(Debug)]
pub struct ValidatedJob {
    pub root: PathBuf,
    pub schedule: CronSchedule,
}

/// Fail fast on a missing path, a bad cron expression, or a backend that is
/// not set up
pub fn validate(job: &JobArgs, config: &Config) -> Result<ValidatedJob> {
    let root = job.path.canonicalize().map_err(|_| {
        BackuperError::Config(format!("This path doesn't exist: {}", job.path.display()))
    })?;
    let schedule = CronSchedule::parse(&job.cron)?;

    if job.name.trim().is_empty() {
        return Err(BackuperError::Config("job name must not be empty".to_string()));
    }
    if job.disk == BackendKind::Local {
        LocalDirectory::from_config(config)?;
    } else if !storage::is_authorized(job.disk, config) {
        return Err(BackuperError::NotAuthorized(job.disk.to_string()));
    }

    Ok(ValidatedJob { root, schedule })
}

fn start(job: &JobArgs, log_level: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let validated = validate(job, config)?;

    if JobRegistry::from_config(config).contains(&job.name)? {
        println!("Job {} is already registered; the new process will replace it", job.name);
    }

    let detached = JobArgs {
        path: validated.root,
        ..job.clone()
    };
    let pid = spawn_detached(detached.to_run_args(log_level))?;

    info!("Launched job {} as pid {}", job.name, pid);
    println!("Background process started with PID {}", pid);
    Ok(())
}

/// Body of the detached job process
pub async fn run(job: &JobArgs, config: &Config) -> Result<RunSummary> {
    let validated = validate(job, config)?;

    let backend: Arc<dyn StorageBackend> = Arc::from(storage::connect(job.disk, config)?);
    info!("Authorized in {} disk", job.disk);

    let executor = BackupExecutor::new(
        BackupJob::from_config(&job.name, &validated.root, config),
        BackupManifest::new().with_pruning(config.settings.prune_deleted),
        backend,
    );

    let shutdown = ShutdownCoordinator::new();
    shutdown.listen()?;

    let record = JobRecord {
        cron: job.cron.clone(),
        pid: std::process::id() as i32,
        path: validated.root,
    };

    Scheduler::new(
        executor,
        validated.schedule,
        JobRegistry::from_config(config),
        Arc::new(SignalControl),
        record,
    )
    .with_shutdown(shutdown.token())
    .run()
    .await
}

fn stop(name: &str, config: &Config) -> anyhow::Result<()> {
    let registry = JobRegistry::from_config(config);
    match registry.stop(name, &SignalControl)? {
        StopOutcome::Stopped(pid) => println!("Background process with PID {} stopped.", pid),
        StopOutcome::NotFound => println!("Process {} not found", name),
        StopOutcome::AlreadyStopped(pid) => {
            println!("Process {} (PID {}) was already stopped; removed it", name, pid)
        }
        StopOutcome::Denied(pid) => {
            anyhow::bail!("Unable to stop process with PID {}: permission denied", pid)
        }
    }
    Ok(())
}

fn backups(config: &Config) -> anyhow::Result<()> {
    let jobs = JobRegistry::from_config(config).list(&SignalControl)?;
    if jobs.is_empty() {
        println!("No running processes");
        return Ok(());
    }

    for job in jobs {
        println!("{}", job.name);
        println!("\tcron: {}", job.record.cron);
        println!("\tpid: {}", job.record.pid);
        println!("\tpath: {}", job.record.path.display());
        println!("\tstatus: {}", if job.alive { "running" } else { "not running" });
    }
    Ok(())
}

async fn auth(disk: BackendKind, config: &Config) -> anyhow::Result<()> {
    storage::authenticate(disk, config)
        .await
        .with_context(|| format!("authorization in {} failed", disk))?;
    println!("Authorized in {} disk", disk);
    Ok(())
}

async fn diskfiles(disk: BackendKind, config: &Config) -> anyhow::Result<()> {
    let backend = storage::connect(disk, config)?;
    for name in backend.list_of_files().await? {
        println!("{}", name);
    }
    Ok(())
}

async fn download(
    disk: BackendKind,
    name: &str,
    output: Option<PathBuf>,
    config: &Config,
) -> anyhow::Result<()> {
    let backend = storage::connect(disk, config)?;
    let dest_dir = match output {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match backend.download(name, &dest_dir).await {
        Ok(path) => {
            println!("Downloaded {}", path.display());
            Ok(())
        }
        Err(BackuperError::FileNotFound(_)) => anyhow::bail!("No such file on disk"),
        Err(err) => Err(err.into()),
    }
}
