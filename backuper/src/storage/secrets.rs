//! Cleartext JSON secrets file shared by all backends.
//!
//! Layout: `{"<backend>": {...backend secrets...}}`. When the file has not
//! been written for longer than the TTL its contents count as absent, which
//! forces the user through `auth` again.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::atomic::write_atomic;
use crate::utils::Result;

pub type Secrets = Map<String, Value>;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct SecretsStore {
    path: PathBuf,
    ttl: Duration,
}

impl SecretsStore {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.paths.secrets_file,
            Duration::from_secs(config.settings.secrets_ttl_days * SECONDS_PER_DAY),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is older than the TTL (a missing file is not stale)
    pub fn is_stale(&self) -> bool {
        let Ok(modified) = std::fs::metadata(&self.path).and_then(|m| m.modified()) else {
            return false;
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > self.ttl,
            // Modified in the future
            Err(_) => false,
        }
    }

    /// Every backend's secrets; empty when the file is missing, stale, or unreadable
    pub fn extract_all(&self) -> Secrets {
        if !self.path.exists() {
            return Secrets::new();
        }
        if self.is_stale() {
            debug!("Secrets file {} is stale, ignoring it", self.path.display());
            return Secrets::new();
        }

        let parsed = std::fs::read(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(Value::Object(all)) => all,
            Ok(_) => {
                warn!("Secrets file {} is not a JSON object, ignoring it", self.path.display());
                Secrets::new()
            }
            Err(err) => {
                warn!("Cannot read secrets file {}: {}", self.path.display(), err);
                Secrets::new()
            }
        }
    }

    /// Secrets of one backend; empty when absent
    pub fn extract(&self, backend: &str) -> Secrets {
        match self.extract_all().remove(backend) {
            Some(Value::Object(secrets)) => secrets,
            _ => Secrets::new(),
        }
    }

    /// Replace the secrets of `backend`, keeping other backends' fresh entries.
    /// Writing refreshes the file's modification time, restarting the TTL.
    pub fn save(&self, backend: &str, secrets: Secrets) -> Result<()> {
        let mut all = self.extract_all();
        all.insert(backend.to_string(), Value::Object(secrets));
        let contents = serde_json::to_vec_pretty(&Value::Object(all))?;
        write_atomic(&self.path, &contents)?;
        Ok(())
    }
}
