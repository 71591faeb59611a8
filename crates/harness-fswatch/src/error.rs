//! Error types for filesystem watching.

use thiserror::Error;

/// Filesystem watcher errors.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watcher could not be started.
    #[error("Startup failure: {0}")]
    StartupFailure(String),

    /// A path could not be watched.
    #[error("Watch failure: {0}")]
    WatchFailure(String),

    /// The watcher was used in the wrong state.
    #[error("Usage error: {0}")]
    Usage(String),

    /// Error reported by the notify backend.
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result type for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;
