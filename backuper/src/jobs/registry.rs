//! Registry of named backup jobs, persisted as a JSON object keyed by name:
//!
//! ```json
//! {"docs": {"cron": "*/15 * * * *", "pid": 4242, "path": "/home/user/docs"}}
//! ```
//!
//! Every mutation holds an exclusive lock on `<registry>.lock` for its whole
//! load-modify-store cycle, and the store replaces the file atomically.
//! A missing or unparsable file reads as an empty registry.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::process::{ProcessControl, Termination};
use crate::config::Config;
use crate::utils::atomic::write_atomic;
use crate::utils::{BackuperError, Result};

pub type Jobs = BTreeMap<String, JobRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub cron: String,
    pub pid: i32,
    pub path: PathBuf,
}

/// A registry entry together with whether its process is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub record: JobRecord,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// SIGTERM delivered; record removed
    Stopped(i32),
    /// No job with that name
    NotFound,
    /// The recorded process was already gone; stale record removed
    AlreadyStopped(i32),
    /// Not allowed to signal the process; record kept
    Denied(i32),
}

#[derive(Debug, Clone)]
pub struct JobRegistry {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JobRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.paths.registry_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents. Readers take no lock; writers replace the file atomically.
    pub fn load(&self) -> Result<Jobs> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Jobs::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(jobs) => Ok(jobs),
            Err(err) => {
                warn!(
                    "Registry {} is unreadable, treating it as empty: {}",
                    self.path.display(),
                    err
                );
                Ok(Jobs::new())
            }
        }
    }

    /// Replace the whole registry
    pub fn save(&self, jobs: &Jobs) -> Result<()> {
        let _lock = self.lock()?;
        self.store(jobs)
    }

    pub fn get(&self, name: &str) -> Result<Option<JobRecord>> {
        Ok(self.load()?.remove(name))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(name))
    }

    /// Insert or overwrite `name`
    pub fn add(&self, name: &str, record: JobRecord) -> Result<()> {
        self.update(|jobs| {
            jobs.insert(name.to_string(), record);
        })
    }

    /// Returns whether a record was removed
    pub fn remove(&self, name: &str) -> Result<bool> {
        self.update(|jobs| jobs.remove(name).is_some())
    }

    /// Remove `name` only while it still belongs to `pid`, so an exiting job
    /// never deletes the record of the job that replaced it.
    pub fn remove_if_owned(&self, name: &str, pid: i32) -> Result<bool> {
        self.update(|jobs| match jobs.get(name) {
            Some(record) if record.pid == pid => {
                jobs.remove(name);
                true
            }
            _ => false,
        })
    }

    /// Terminate the job called `name` and deregister it
    pub fn stop(&self, name: &str, control: &dyn ProcessControl) -> Result<StopOutcome> {
        let _lock = self.lock()?;
        let mut jobs = self.load()?;

        let Some(record) = jobs.get(name) else {
            return Ok(StopOutcome::NotFound);
        };
        let pid = record.pid;

        let outcome = match control.terminate(pid)? {
            Termination::Sent => StopOutcome::Stopped(pid),
            Termination::NoSuchProcess => StopOutcome::AlreadyStopped(pid),
            Termination::PermissionDenied => return Ok(StopOutcome::Denied(pid)),
        };

        jobs.remove(name);
        self.store(&jobs)?;
        info!("Stopped job {} (pid {}): {:?}", name, pid, outcome);
        Ok(outcome)
    }

    /// Every job, sorted by name, with process liveness
    pub fn list(&self, control: &dyn ProcessControl) -> Result<Vec<JobStatus>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|(name, record)| JobStatus {
                alive: control.is_alive(record.pid),
                name,
                record,
            })
            .collect())
    }

    /// Locked load-modify-store; the file is rewritten only if `f` changed it
    fn update<T>(&self, f: impl FnOnce(&mut Jobs) -> T) -> Result<T> {
        let _lock = self.lock()?;
        let mut jobs = self.load()?;
        let before = jobs.clone();

        let result = f(&mut jobs);
        if jobs != before {
            self.store(&jobs)?;
        }
        Ok(result)
    }

    fn store(&self, jobs: &Jobs) -> Result<()> {
        let contents = serde_json::to_vec_pretty(jobs)?;
        write_atomic(&self.path, &contents)?;
        debug!("Wrote {} jobs to {}", jobs.len(), self.path.display());
        Ok(())
    }

    /// Exclusive advisory lock, released when the returned file is dropped
    fn lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive().map_err(|e| {
            BackuperError::Registry(format!("cannot lock {}: {}", self.lock_path.display(), e))
        })?;
        Ok(lock_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fake control with a scripted answer for `terminate`
    struct FakeControl {
        answer: Termination,
        signalled: Mutex<Vec<i32>>,
        alive: Vec<i32>,
    }

    impl FakeControl {
        fn answering(answer: Termination) -> Self {
            Self {
                answer,
                signalled: Mutex::new(Vec::new()),
                alive: Vec::new(),
            }
        }
    }

    impl ProcessControl for FakeControl {
        fn terminate(&self, pid: i32) -> std::io::Result<Termination> {
            self.signalled.lock().unwrap().push(pid);
            Ok(self.answer)
        }

        fn is_alive(&self, pid: i32) -> bool {
            self.alive.contains(&pid)
        }
    }

    fn record(pid: i32) -> JobRecord {
        JobRecord {
            cron: "* * * * *".to_string(),
            pid,
            path: PathBuf::from("/data"),
        }
    }

    fn registry(dir: &TempDir) -> JobRegistry {
        JobRegistry::new(dir.path().join("processes.json"))
    }

    #[test]
    fn test_add_load_remove() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);

        registry.add("docs", record(100))?;
        assert_eq!(registry.load()?.get("docs"), Some(&record(100)));
        assert_eq!(registry.get("docs")?, Some(record(100)));

        assert!(registry.remove("docs")?);
        assert!(!registry.contains("docs")?);
        assert!(!registry.remove("docs")?);
        Ok(())
    }

    #[test]
    fn test_file_format() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        registry.add("docs", record(4242))?;

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(registry.path())?)?;
        assert_eq!(raw["docs"]["pid"], 4242);
        assert_eq!(raw["docs"]["cron"], "* * * * *");
        assert_eq!(raw["docs"]["path"], "/data");
        Ok(())
    }

    #[test]
    fn test_missing_and_corrupt_files_are_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        assert!(registry.load()?.is_empty());

        std::fs::write(registry.path(), "{ not json")?;
        assert!(registry.load()?.is_empty());

        registry.add("docs", record(1))?;
        assert_eq!(registry.load()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_remove_if_owned() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        registry.add("docs", record(200))?;

        assert!(!registry.remove_if_owned("docs", 100)?);
        assert!(registry.contains("docs")?);
        assert!(registry.remove_if_owned("docs", 200)?);
        assert!(!registry.contains("docs")?);
        Ok(())
    }

    #[test]
    fn test_stop_running_job() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        registry.add("docs", record(4242))?;
        let control = FakeControl::answering(Termination::Sent);

        assert_eq!(registry.stop("docs", &control)?, StopOutcome::Stopped(4242));
        assert_eq!(*control.signalled.lock().unwrap(), vec![4242]);
        assert!(!registry.contains("docs")?);
        Ok(())
    }

    #[test]
    fn test_stop_dead_pid_removes_stale_record() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        registry.add("docs", record(4242))?;
        let control = FakeControl::answering(Termination::NoSuchProcess);

        assert_eq!(registry.stop("docs", &control)?, StopOutcome::AlreadyStopped(4242));
        assert!(!registry.contains("docs")?);
        Ok(())
    }

    #[test]
    fn test_stop_denied_keeps_record() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        registry.add("docs", record(1))?;
        let control = FakeControl::answering(Termination::PermissionDenied);

        assert_eq!(registry.stop("docs", &control)?, StopOutcome::Denied(1));
        assert!(registry.contains("docs")?);
        Ok(())
    }

    #[test]
    fn test_stop_unknown_name() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        let control = FakeControl::answering(Termination::Sent);

        assert_eq!(registry.stop("ghost", &control)?, StopOutcome::NotFound);
        assert!(control.signalled.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_list_reports_liveness() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = registry(&temp_dir);
        registry.add("b-job", record(2))?;
        registry.add("a-job", record(1))?;
        let control = FakeControl {
            alive: vec![1],
            ..FakeControl::answering(Termination::Sent)
        };

        let statuses = registry.list(&control)?;
        let summary: Vec<(&str, bool)> = statuses
            .iter()
            .map(|s| (s.name.as_str(), s.alive))
            .collect();
        assert_eq!(summary, vec![("a-job", true), ("b-job", false)]);
        Ok(())
    }

    #[test]
    fn test_concurrent_adds_keep_every_record() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("processes.json");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = JobRegistry::new(&path);
                std::thread::spawn(move || registry.add(&format!("job{i}"), record(i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap()?;
        }

        assert_eq!(JobRegistry::new(&path).load()?.len(), 8);
        Ok(())
    }
}
