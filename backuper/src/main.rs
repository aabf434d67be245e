//! Backuper - Main entry point

use backuper::cli::{commands, Cli, Command};
use backuper::{config::Config, utils};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(None) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    // Detached jobs have no terminal, so they log to the shared log file
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    let detached = matches!(cli.command, Command::Run(_));
    let logging = if detached {
        utils::logger::init_file(&log_level, &config.paths.log_file)
    } else {
        utils::logger::init(&log_level)
    };
    if let Err(err) = logging {
        eprintln!("Failed to initialize logging: {}", err);
    }

    tracing::debug!("backuper v{}", env!("CARGO_PKG_VERSION"));

    match commands::execute(cli.command, cli.log_level.as_deref(), config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if detached => {
            tracing::error!("Job exited: {:#}", err);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
