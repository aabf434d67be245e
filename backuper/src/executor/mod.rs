//! Backup round executor.
//!
//! One call to [`BackupExecutor::run_once`] is one scheduler tick:
//! - scan the watched path
//! - select new and modified files against the manifest
//! - zip them into the archive directory
//! - upload the archive
//! - commit the round to the manifest
//!
//! The manifest only changes after the upload succeeded, so a failed round is
//! retried in full on the next tick.

pub mod archive;
pub mod manifest;

use chrono::Local;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::storage::StorageBackend;
use crate::transfer::progress::format_bytes;
use crate::utils::Result;
use archive::build_archive;
use manifest::BackupManifest;

/// What one job backs up and where its archives go
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub name: String,
    pub root: PathBuf,
    pub walk_options: WalkOptions,
    pub archives_dir: PathBuf,
    pub keep_local_archives: bool,
}

impl BackupJob {
    /// The app dir and local target dir are never scanned, even when the
    /// watched root contains them; otherwise each tick would archive the
    /// previous archive and log.
    pub fn from_config(name: impl Into<String>, root: impl Into<PathBuf>, config: &Config) -> Self {
        let root = root.into();
        let exclude_dirs = [Some(&config.paths.app_dir), config.settings.local_target_dir.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|dir| nested_under(&root, dir))
            .collect();

        Self {
            name: name.into(),
            walk_options: WalkOptions {
                follow_links: config.settings.follow_links,
                exclude_patterns: config.settings.exclude_patterns.clone(),
                exclude_dirs,
            },
            root,
            archives_dir: config.paths.archives_dir.clone(),
            keep_local_archives: config.settings.keep_local_archives,
        }
    }
}

/// `dir` spelled under `root` when it lies strictly inside it
fn nested_under(root: &Path, dir: &Path) -> Option<PathBuf> {
    let resolve = |path: &Path| path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let relative = resolve(dir).strip_prefix(resolve(root)).ok()?.to_path_buf();
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(relative))
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new since the last backup; no archive was made
    Unchanged,

    Uploaded {
        archive: PathBuf,
        files: Vec<PathBuf>,
        bytes: u64,
    },
}

pub struct BackupExecutor {
    job: BackupJob,
    manifest: BackupManifest,
    backend: Arc<dyn StorageBackend>,
}

impl BackupExecutor {
    pub fn new(job: BackupJob, manifest: BackupManifest, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            job,
            manifest,
            backend,
        }
    }

    pub fn job(&self) -> &BackupJob {
        &self.job
    }

    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    /// Run one backup round
    pub async fn run_once(&mut self) -> Result<TickOutcome> {
        let started = Local::now();
        let scan_time = started.timestamp();

        let root = self.job.root.clone();
        let options = self.job.walk_options.clone();
        let current = tokio::task::spawn_blocking(move || walk_directory(&root, &options)).await??;

        let forgotten = self.manifest.prune(&current);
        if forgotten > 0 {
            debug!("Forgot {} deleted files of job {}", forgotten, self.job.name);
        }

        let selected = self.manifest.select(&current);
        if selected.is_empty() {
            info!("No changes in {}, nothing to back up", self.job.root.display());
            return Ok(TickOutcome::Unchanged);
        }
        debug!(
            "{} of {} files changed in {}",
            selected.len(),
            current.len(),
            self.job.root.display()
        );

        let root = self.job.root.clone();
        let archives_dir = self.job.archives_dir.clone();
        let paths: Vec<PathBuf> = selected.iter().map(|file| file.path.clone()).collect();
        let now = started.naive_local();
        let built = tokio::task::spawn_blocking(move || {
            build_archive(&root, &paths, &archives_dir, &now)
        })
        .await??;

        let Some(archive) = built else {
            info!("Every changed file vanished before archiving; skipping upload");
            return Ok(TickOutcome::Unchanged);
        };

        info!(
            "Uploading {} ({} files, {}) to {}",
            archive.path.display(),
            archive.included.len(),
            format_bytes(archive.size),
            self.backend.kind()
        );
        let uploaded = self.backend.upload(&archive.path).await;

        if uploaded.is_err() || !self.job.keep_local_archives {
            if let Err(err) = tokio::fs::remove_file(&archive.path).await {
                warn!("Failed to remove {}: {}", archive.path.display(), err);
            }
        }
        uploaded?;

        let included: HashSet<&PathBuf> = archive.included.iter().collect();
        self.manifest.record(
            selected.iter().filter(|file| included.contains(&file.path)),
            scan_time,
        );

        Ok(TickOutcome::Uploaded {
            archive: archive.path,
            files: archive.included,
            bytes: archive.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendKind;
    use crate::utils::BackuperError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Records uploads; fails while `fail` is set
    #[derive(Default)]
    struct FlakyBackend {
        fail: Mutex<bool>,
        uploads: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Local
        }

        async fn upload(&self, local_path: &Path) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(BackuperError::Storage("network down".to_string()));
            }
            self.uploads.lock().unwrap().push(local_path.to_path_buf());
            Ok(())
        }

        async fn list_of_files(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn download(&self, name: &str, _dest_dir: &Path) -> Result<PathBuf> {
            Err(BackuperError::FileNotFound(name.to_string()))
        }
    }

    fn write_old(path: &Path, contents: &[u8]) {
        std::fs::write(path, contents).unwrap();
        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(an_hour_ago)
            .unwrap();
    }

    fn job(source: &Path, archives: &Path, keep: bool) -> BackupJob {
        BackupJob {
            name: "test".to_string(),
            root: source.to_path_buf(),
            walk_options: WalkOptions::default(),
            archives_dir: archives.to_path_buf(),
            keep_local_archives: keep,
        }
    }

    #[tokio::test]
    async fn test_failed_upload_is_retried_next_tick() {
        let source = TempDir::new().unwrap();
        let archives = TempDir::new().unwrap();
        write_old(&source.path().join("a.txt"), b"a");

        let backend = Arc::new(FlakyBackend::default());
        *backend.fail.lock().unwrap() = true;
        let mut executor = BackupExecutor::new(
            job(source.path(), archives.path(), true),
            BackupManifest::new(),
            backend.clone(),
        );

        assert!(executor.run_once().await.is_err());
        assert_eq!(executor.manifest().last_backup_time(), 0);
        assert!(executor.manifest().archived().is_empty());
        // The failed archive is not left behind
        assert_eq!(std::fs::read_dir(archives.path()).unwrap().count(), 0);

        *backend.fail.lock().unwrap() = false;
        let outcome = executor.run_once().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Uploaded { ref files, .. } if files.len() == 1));
        assert_eq!(backend.uploads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_archive_removed_after_upload_when_not_kept() {
        let source = TempDir::new().unwrap();
        let archives = TempDir::new().unwrap();
        write_old(&source.path().join("a.txt"), b"a");

        let backend = Arc::new(FlakyBackend::default());
        let mut executor = BackupExecutor::new(
            job(source.path(), archives.path(), false),
            BackupManifest::new(),
            backend.clone(),
        );

        let outcome = executor.run_once().await.unwrap();
        let TickOutcome::Uploaded { archive, .. } = outcome else {
            panic!("expected an upload");
        };
        assert!(!archive.exists());
        assert_eq!(backend.uploads.lock().unwrap().as_slice(), &[archive]);
    }

    #[tokio::test]
    async fn test_backup_time_is_scan_start() {
        let source = TempDir::new().unwrap();
        let archives = TempDir::new().unwrap();
        write_old(&source.path().join("a.txt"), b"a");

        let before = Local::now().timestamp();
        let mut executor = BackupExecutor::new(
            job(source.path(), archives.path(), true),
            BackupManifest::new(),
            Arc::new(FlakyBackend::default()),
        );
        executor.run_once().await.unwrap();
        let after = Local::now().timestamp();

        let recorded = executor.manifest().last_backup_time();
        assert!(before <= recorded && recorded <= after);
    }

    #[test]
    fn test_from_config_excludes_nested_app_dir() {
        let home = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let mut config = Config::for_dir(home.path().join(".backuper"));
        config.ensure_dirs().unwrap();
        config.settings.local_target_dir = Some(outside.path().to_path_buf());

        let job = BackupJob::from_config("home", home.path(), &config);
        assert_eq!(job.walk_options.exclude_dirs, vec![home.path().join(".backuper")]);

        let sibling = BackupJob::from_config("docs", outside.path(), &Config::for_dir(home.path()));
        assert!(sibling.walk_options.exclude_dirs.is_empty());
    }

    #[tokio::test]
    async fn test_app_dir_under_root_does_not_retrigger_backups() {
        let home = TempDir::new().unwrap();
        let config = Config::for_dir(home.path().join(".backuper"));
        config.ensure_dirs().unwrap();
        write_old(&home.path().join("a.txt"), b"a");

        let backend = Arc::new(FlakyBackend::default());
        let mut executor = BackupExecutor::new(
            BackupJob::from_config("home", home.path(), &config),
            BackupManifest::new(),
            backend.clone(),
        );

        let first = executor.run_once().await.unwrap();
        let TickOutcome::Uploaded { archive, files, .. } = first else {
            panic!("expected an upload");
        };
        assert!(archive.starts_with(&config.paths.archives_dir));
        assert_eq!(files, vec![home.path().join("a.txt")]);

        std::fs::write(&config.paths.log_file, b"Uploading...\n").unwrap();
        assert_eq!(executor.run_once().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(backend.uploads.lock().unwrap().len(), 1);
    }
}
