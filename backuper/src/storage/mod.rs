//! Remote storage backends.
//!
//! Every backend implements [`StorageBackend`]. A backend is picked by name
//! through [`connect`] (secrets are loaded once, at job startup) and set up
//! interactively through [`authenticate`].

pub mod google;
pub mod local;
pub mod secrets;
pub mod yandex;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::Config;
use crate::executor::archive::TIMESTAMP_FORMAT;
use crate::transfer::progress::format_bytes;
use crate::transfer::progress_stream::ProgressStream;
use crate::utils::{BackuperError, Result};
use secrets::SecretsStore;

/// Names accepted by `-d/--disk`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Yandex,
    Google,
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Yandex => "yandex",
            BackendKind::Google => "google",
            BackendKind::Local => "local",
        }
    }

    /// Whether the backend needs `auth` before it can be used
    pub fn needs_secrets(&self) -> bool {
        !matches!(self, BackendKind::Local)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the backup core needs from a remote store
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Upload a local file under its own file name
    async fn upload(&self, local_path: &Path) -> Result<()>;

    /// Names of the backup archives present remotely
    async fn list_of_files(&self) -> Result<Vec<String>>;

    /// Fetch one archive into `dest_dir`, returning the written path
    async fn download(&self, name: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Build the backend called `kind`, loading its stored secrets.
pub fn connect(kind: BackendKind, config: &Config) -> Result<Box<dyn StorageBackend>> {
    let store = SecretsStore::from_config(config);
    let backend: Box<dyn StorageBackend> = match kind {
        BackendKind::Yandex => Box::new(yandex::YandexDisk::from_secrets(
            http_client(config)?,
            store.extract(kind.as_str()),
        )?),
        BackendKind::Google => Box::new(google::GoogleDrive::from_secrets(
            http_client(config)?,
            store.extract(kind.as_str()),
        )?),
        BackendKind::Local => Box::new(local::LocalDirectory::from_config(config)?),
    };
    debug!("Connected to {} storage", kind);
    Ok(backend)
}

/// Whether usable (fresh) secrets exist for `kind`
pub fn is_authorized(kind: BackendKind, config: &Config) -> bool {
    if !kind.needs_secrets() {
        return true;
    }
    !SecretsStore::from_config(config)
        .extract(kind.as_str())
        .is_empty()
}

/// Run the interactive authorization flow of `kind` and persist its secrets.
pub async fn authenticate(kind: BackendKind, config: &Config) -> Result<()> {
    let store = SecretsStore::from_config(config);
    let secrets = match kind {
        BackendKind::Yandex => {
            yandex::authenticate(&http_client(config)?, store.extract(kind.as_str())).await?
        }
        BackendKind::Google => google::authenticate(&http_client(config)?).await?,
        BackendKind::Local => {
            local::LocalDirectory::from_config(config)?;
            return Ok(());
        }
    };
    store.save(kind.as_str(), secrets)?;
    info!("Saved {} secrets", kind);
    Ok(())
}

/// Matches `YYYY-MM-DD_HH-MM-SS_<anything>.zip`
pub fn is_backup_archive(name: &str) -> bool {
    let Some(stamp) = name.get(..19) else {
        return false;
    };
    name.len() > 24
        && name.as_bytes()[19] == b'_'
        && name.ends_with(".zip")
        && NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok()
}

/// Keep only backup archives, sorted oldest first
pub fn filter_backups<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut backups: Vec<String> = names
        .into_iter()
        .filter(|name| is_backup_archive(name))
        .collect();
    backups.sort();
    backups
}

pub(crate) fn http_client(config: &Config) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.settings.upload_timeout_secs))
        .build()?)
}

pub(crate) fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| BackuperError::Storage(format!("{} has no file name", path.display())))
}

/// Streaming request body for `path` that logs upload progress
pub(crate) async fn upload_body(path: &Path) -> Result<(reqwest::Body, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();
    let label = path.display().to_string();

    let stream = ProgressStream::new(
        ReaderStream::new(file),
        total,
        Arc::new(move |sent, total| {
            debug!("Uploading {}: {} of {}", label, format_bytes(sent), format_bytes(total));
        }),
    );
    Ok((reqwest::Body::wrap_stream(stream), total))
}

/// Stream a successful response body into `dest`
pub(crate) async fn save_response(response: reqwest::Response, dest: &Path) -> Result<()> {
    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&partial, dest).await?;
    Ok(())
}

/// Turn a non-success HTTP status into a storage error
pub(crate) async fn check_status(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackuperError::Storage(format!("{} failed with status {}: {}", action, status, body)))
}

/// Ask the user for one line on the terminal
pub(crate) fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        return Err(BackuperError::Authentication(format!(
            "no input for '{}'",
            message.trim().trim_end_matches(':')
        )));
    }
    Ok(line)
}
