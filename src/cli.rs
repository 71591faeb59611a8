//! CLI definitions for Harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use harness_fswatch::FsEventType;

/// Harness CLI.
#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Drive a foreign main context from a host run loop")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to ~/.harness/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Log filesystem changes under the given paths until interrupted
    Watch {
        /// Paths to watch (non-recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Comma-separated event types (default: all)
        #[arg(long, value_delimiter = ',')]
        types: Vec<FsEventType>,
    },

    /// Wait for a descriptor to become readable via the select thread
    WaitReadable {
        /// Descriptor to wait on
        #[arg(long, default_value_t = 0)]
        fd: i32,

        /// Timeout in milliseconds (negative waits forever)
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        timeout_ms: i32,
    },
}
