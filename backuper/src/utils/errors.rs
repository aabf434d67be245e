//! Custom error types for the backuper agent.

use thiserror::Error;

use crate::scheduler::cron::CronParseError;

#[derive(Error, Debug)]
pub enum BackuperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(#[from] CronParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Not authorized in {0}; run `backuper auth -d {0}` first")]
    NotAuthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No such file on disk: {0}")]
    FileNotFound(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<config::ConfigError> for BackuperError {
    fn from(err: config::ConfigError) -> Self {
        BackuperError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackuperError>;
