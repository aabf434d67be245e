//! Command-line surface of `backuper`.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::storage::BackendKind;

#[derive(Parser, Debug)]
#[command(name = "backuper", author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a scheduled backup job in the background
    Start(JobArgs),

    /// Stop a running backup job
    Stop {
        /// Name of the job
        #[arg(short, long)]
        name: String,
    },

    /// List registered backup jobs
    Backups,

    /// Authorize in a storage backend
    Auth {
        #[arg(short, long, value_enum)]
        disk: BackendKind,
    },

    /// List backup archives stored on a backend
    Diskfiles {
        #[arg(short, long, value_enum)]
        disk: BackendKind,
    },

    /// Download one backup archive
    Download {
        #[arg(short, long, value_enum)]
        disk: BackendKind,

        /// Archive name as shown by `diskfiles`
        #[arg(short, long)]
        name: String,

        /// Directory to save into (default: current directory)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Run a job in the foreground (used by `start`)
    #[command(hide = true)]
    Run(JobArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct JobArgs {
    /// File or directory to back up
    #[arg(short, long)]
    pub path: PathBuf,

    /// Backup schedule as a 5-field cron expression
    #[arg(short, long)]
    pub cron: String,

    #[arg(short, long, value_enum)]
    pub disk: BackendKind,

    /// Name of the job
    #[arg(short, long)]
    pub name: String,
}

impl JobArgs {
    /// Arguments that make the detached child run this job
    pub fn to_run_args(&self, log_level: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(level) = log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        args.push("run".into());
        args.push("--path".into());
        args.push(self.path.clone().into_os_string());
        args.push("--cron".into());
        args.push(self.cron.clone().into());
        args.push("--disk".into());
        args.push(self.disk.as_str().into());
        args.push("--name".into());
        args.push(self.name.clone().into());
        args
    }
}
