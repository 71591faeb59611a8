//! # Harness FS Watch
//!
//! Filesystem change notifications delivered to per-path callbacks.
//!
//! ```rust,no_run
//! use harness_fswatch::{FsEventType, FsWatcher, WatchConfig};
//!
//! let watcher = FsWatcher::new(WatchConfig::default());
//! watcher.start()?;
//! let token = watcher.watch("/tmp", &[FsEventType::Create], |event| {
//!     println!("{} {:?}", event.kind, event.path);
//! })?;
//! // The watch lives until `token` is cancelled or dropped.
//! token.cancel();
//! # Ok::<(), harness_fswatch::WatchError>(())
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod watcher;

// Re-exports
pub use config::WatchConfig;
pub use error::{WatchError, WatchResult};
pub use event::{FsEvent, FsEventType};
pub use watcher::{FsWatcher, ObservationToken, WatcherState};
