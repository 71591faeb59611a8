//! Harness - host run loop / foreign main context bridge
//!
//! Command line entry point exercising the select thread and the
//! filesystem watcher.

mod cli;
mod cmd_wait;
mod cmd_watch;
mod config;

use std::path::Path;

use clap::Parser;
use tracing::debug;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::{Cli, Commands};
use crate::config::HarnessConfig;

/// Initialize tracing with console output and, when `log_dir` is given,
/// daily-rotated log files.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("harness")
                .filename_suffix("log")
                .max_log_files(30)
                .build(log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Flushes buffered lines on exit.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(file_layer)
        .init();

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_dir.as_deref())?;

    let config = HarnessConfig::load(cli.config.as_deref())?;
    debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Commands::Watch { paths, types } => cmd_watch::watch(&config, &paths, &types)?,
        Commands::WaitReadable { fd, timeout_ms } => {
            let ready = cmd_wait::wait_readable(&config, fd, timeout_ms)?;
            println!("{}", ready);
        }
    }

    Ok(())
}
