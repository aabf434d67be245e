//! Backend that copies archives into a directory on this machine
//! (a mounted network share or a second disk).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{file_name, filter_backups, BackendKind, StorageBackend};
use crate::config::Config;
use crate::utils::{BackuperError, Result};

pub struct LocalDirectory {
    target: PathBuf,
}

impl LocalDirectory {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Uses the `local_target_dir` setting
    pub fn from_config(config: &Config) -> Result<Self> {
        let target = config.settings.local_target_dir.clone().ok_or_else(|| {
            BackuperError::Config(
                "the local disk needs `local_target_dir` in config.toml".to_string(),
            )
        })?;
        Ok(Self::new(target))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

#[async_trait]
impl StorageBackend for LocalDirectory {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn upload(&self, local_path: &Path) -> Result<()> {
        let name = file_name(local_path)?;
        tokio::fs::create_dir_all(&self.target).await?;

        let partial = self.target.join(format!(".{}.part", name));
        tokio::fs::copy(local_path, &partial).await?;
        tokio::fs::rename(&partial, self.target.join(&name)).await?;

        info!("Copied {} to {}", name, self.target.display());
        Ok(())
    }

    async fn list_of_files(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.target).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(filter_backups(names))
    }

    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let source = self.target.join(name);
        if file_name(&source)? != name || !tokio::fs::try_exists(&source).await? {
            return Err(BackuperError::FileNotFound(name.to_string()));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(name);
        tokio::fs::copy(&source, &dest).await?;
        Ok(dest)
    }
}
