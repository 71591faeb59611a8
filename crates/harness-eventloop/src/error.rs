//! Error types for the event loop bridge.

use thiserror::Error;

/// Errors that can occur while setting up the bridge machinery.
///
/// None of these surface from the phase handlers themselves; they are
/// logged and the bridge degrades to the synchronous probe path.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Creating or configuring the select thread wakeup pipe failed.
    #[error("Wakeup pipe error: {0}")]
    WakeupPipe(#[from] nix::Error),

    /// Spawning the select thread failed.
    #[error("Failed to spawn select thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
