//! Configuration management for the backuper agent.
//!
//! Every job shares one per-user application directory (`~/.backuper` unless
//! `BACKUPER_HOME` is set). Settings are layered: built-in defaults, then the
//! optional `config.toml` inside the application directory, then
//! `BACKUPER__*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::{BackuperError, Result};

const APP_DIR_NAME: &str = ".backuper";
const HOME_ENV: &str = "BACKUPER_HOME";
const ENV_PREFIX: &str = "BACKUPER";

#[derive(Debug, Clone)]
pub struct Config {
    pub paths: AppPaths,
    pub settings: Settings,
}

/// Fixed file layout under the application directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub app_dir: PathBuf,

    /// Job registry (JSON object keyed by job name)
    pub registry_file: PathBuf,

    /// Backend secrets (JSON object keyed by backend name)
    pub secrets_file: PathBuf,

    /// Where archives are written before upload
    pub archives_dir: PathBuf,

    /// Log file of detached backup jobs
    pub log_file: PathBuf,

    /// Optional settings file
    pub config_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP timeout for a single upload or download, in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// Keep archives in the archive directory after a successful upload
    #[serde(default = "default_true")]
    pub keep_local_archives: bool,

    /// Forget files that disappeared from disk so the archived set stays bounded
    #[serde(default)]
    pub prune_deleted: bool,

    /// File-name substrings skipped while scanning
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Follow symbolic links while scanning
    #[serde(default)]
    pub follow_links: bool,

    /// Target directory of the `local` backend
    #[serde(default)]
    pub local_target_dir: Option<PathBuf>,

    /// Secrets older than this are treated as absent
    #[serde(default = "default_secrets_ttl_days")]
    pub secrets_ttl_days: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

fn default_secrets_ttl_days() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            upload_timeout_secs: default_upload_timeout_secs(),
            keep_local_archives: true,
            prune_deleted: false,
            exclude_patterns: Vec::new(),
            follow_links: false,
            local_target_dir: None,
            secrets_ttl_days: default_secrets_ttl_days(),
        }
    }
}

impl AppPaths {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        Self {
            registry_file: app_dir.join("processes.json"),
            secrets_file: app_dir.join("secrets.json"),
            archives_dir: app_dir.join("archives"),
            log_file: app_dir.join("logs.txt"),
            config_file: app_dir.join("config.toml"),
            app_dir,
        }
    }
}

impl Config {
    /// Defaults rooted at `app_dir`, without reading any file or environment
    pub fn for_dir(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: AppPaths::new(app_dir),
            settings: Settings::default(),
        }
    }

    /// Load configuration for the given (or default) application directory
    pub fn load(app_dir: Option<PathBuf>) -> Result<Self> {
        let app_dir = match app_dir {
            Some(dir) => dir,
            None => default_app_dir()?,
        };
        let paths = AppPaths::new(app_dir);
        let settings = load_settings(&paths.config_file)?;
        Ok(Self { paths, settings })
    }

    /// Create the application and archive directories
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.app_dir)?;
        std::fs::create_dir_all(&self.paths.archives_dir)?;
        Ok(())
    }
}

fn default_app_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(APP_DIR_NAME))
        .ok_or_else(|| BackuperError::Config("cannot determine home directory".to_string()))
}

fn load_settings(config_file: &Path) -> Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::from(config_file).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize::<Settings>()?;

    if settings.upload_timeout_secs == 0 {
        return Err(BackuperError::Config(
            "upload_timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(settings)
}
