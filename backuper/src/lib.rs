//! Backuper library
//!
//! Scheduled incremental backups of a local file or directory: changed files
//! are zipped on a cron schedule and uploaded to a storage backend.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod jobs;
pub mod scheduler;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackuperError;
pub type Result<T> = std::result::Result<T, BackuperError>;
