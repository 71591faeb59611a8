//! Filesystem watcher with per-path callbacks.

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WatchConfig;
use crate::error::{WatchError, WatchResult};
use crate::event::{FsEvent, FsEventType};

/// Watcher lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Running,
    Error(String),
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatcherState::Stopped => write!(f, "stopped"),
            WatcherState::Running => write!(f, "running"),
            WatcherState::Error(message) => write!(f, "watcher error: {}", message),
        }
    }
}

type WatchCallback = Arc<dyn Fn(&FsEvent) + Send + Sync>;

struct WatchEntry {
    path: PathBuf,
    types: Vec<FsEventType>,
    callback: WatchCallback,
}

pub(crate) struct WatcherShared {
    state: RwLock<WatcherState>,
    watches: RwLock<HashMap<Uuid, WatchEntry>>,
    backend: Mutex<Option<RecommendedWatcher>>,
}

impl WatcherShared {
    fn set_state(&self, state: WatcherState) {
        if let WatcherState::Error(message) = &state {
            error!("FsWatcher: {}", message);
        }
        *self.state.write() = state;
    }

    /// Deliver a backend event to every matching watch.
    pub(crate) fn dispatch(&self, event: &Event) {
        let kind = FsEventType::from_kind(&event.kind);

        let (paths, new_path) = if kind == FsEventType::MoveTo && event.paths.len() == 2 {
            (&event.paths[..1], Some(event.paths[1].clone()))
        } else {
            (&event.paths[..], None)
        };

        for path in paths {
            // Callbacks run without the lock so they may cancel watches.
            let matched: Vec<(Uuid, FsEventType, WatchCallback)> = self
                .watches
                .read()
                .iter()
                .filter_map(|(id, entry)| {
                    let kind = effective_kind(kind, path, &entry.path)?;
                    entry
                        .types
                        .contains(&kind)
                        .then(|| (*id, kind, entry.callback.clone()))
                })
                .collect();

            for (id, kind, callback) in matched {
                let fs_event = FsEvent {
                    id,
                    path: path.clone(),
                    new_path: new_path.clone(),
                    kind,
                };
                callback(&fs_event);
            }
        }
    }
}

/// The event kind as seen by a watch on `watched`, or `None` if the event
/// is outside it.
fn effective_kind(kind: FsEventType, path: &Path, watched: &Path) -> Option<FsEventType> {
    if !path.starts_with(watched) {
        return None;
    }
    if kind == FsEventType::Delete && path == watched {
        return Some(FsEventType::DeleteSelf);
    }
    Some(kind)
}

/// Watches filesystem paths and invokes callbacks on changes.
///
/// Callbacks run on the backend's event thread.
pub struct FsWatcher {
    config: WatchConfig,
    pub(crate) shared: Arc<WatcherShared>,
}

impl FsWatcher {
    /// Create a stopped watcher.
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            shared: Arc::new(WatcherShared {
                state: RwLock::new(WatcherState::Stopped),
                watches: RwLock::new(HashMap::new()),
                backend: Mutex::new(None),
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> WatcherState {
        self.shared.state.read().clone()
    }

    /// Number of live watches.
    pub fn watch_count(&self) -> usize {
        self.shared.watches.read().len()
    }

    /// Start the backend.
    pub fn start(&self) -> WatchResult<()> {
        if self.state() == WatcherState::Running {
            return Err(WatchError::StartupFailure(
                "start called on a running watcher".to_string(),
            ));
        }

        let shared: Weak<WatcherShared> = Arc::downgrade(&self.shared);
        let backend = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.dispatch(&event);
                    }
                }
                Err(e) => warn!("FsWatcher: Backend error: {}", e),
            },
            Config::default().with_poll_interval(self.config.poll_interval()),
        );

        match backend {
            Ok(mut backend) => {
                self.rewatch(&mut backend);
                *self.shared.backend.lock() = Some(backend);
                self.shared.set_state(WatcherState::Running);
                info!("FsWatcher: Started filesystem monitoring");
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to create watcher: {}", e);
                self.shared.set_state(WatcherState::Error(message.clone()));
                Err(WatchError::StartupFailure(message))
            }
        }
    }

    /// Stop the backend. Watches are kept and resume on the next start.
    ///
    /// Must not be called from a watch callback.
    pub fn stop(&self) -> WatchResult<()> {
        if self.state() != WatcherState::Running {
            return Err(WatchError::Usage(
                "stop called without a running watcher".to_string(),
            ));
        }
        let backend = self.shared.backend.lock().take();
        drop(backend);
        self.shared.set_state(WatcherState::Stopped);
        debug!("FsWatcher: Stopped filesystem monitoring");
        Ok(())
    }

    /// Watch `path` (non-recursively) for `types`, calling `callback` for
    /// each matching event until the returned token is cancelled or dropped.
    pub fn watch<F>(
        &self,
        path: impl AsRef<Path>,
        types: &[FsEventType],
        callback: F,
    ) -> WatchResult<ObservationToken>
    where
        F: Fn(&FsEvent) + Send + Sync + 'static,
    {
        match self.state() {
            WatcherState::Running => {}
            WatcherState::Error(message) => return Err(WatchError::WatchFailure(message)),
            WatcherState::Stopped => {
                return Err(WatchError::Usage(
                    "watch called without a running watcher".to_string(),
                ))
            }
        }

        let path = path.as_ref().to_path_buf();
        {
            let mut backend = self.shared.backend.lock();
            let backend = backend.as_mut().ok_or_else(|| {
                WatchError::Usage("watch called without a running watcher".to_string())
            })?;
            backend.watch(&path, RecursiveMode::NonRecursive)?;
        }

        let id = Uuid::new_v4();
        debug!("FsWatcher: Watching {:?} for {:?} ({})", path, types, id);
        self.shared.watches.write().insert(
            id,
            WatchEntry {
                path,
                types: types.to_vec(),
                callback: Arc::new(callback),
            },
        );

        Ok(ObservationToken {
            id,
            shared: Some(Arc::downgrade(&self.shared)),
        })
    }

    /// Register the paths of existing watches with a fresh backend.
    fn rewatch(&self, backend: &mut RecommendedWatcher) {
        let mut paths: Vec<PathBuf> = self
            .shared
            .watches
            .read()
            .values()
            .map(|entry| entry.path.clone())
            .collect();
        paths.sort();
        paths.dedup();

        for path in paths {
            if let Err(e) = backend.watch(&path, RecursiveMode::NonRecursive) {
                warn!("FsWatcher: Failed to watch {:?} again: {}", path, e);
            }
        }
    }

    /// Drop every watch. Outstanding tokens become no-ops.
    pub fn remove_all(&self) {
        let removed = {
            let mut watches = self.shared.watches.write();
            let removed = watches.len();
            watches.clear();
            removed
        };
        debug!("FsWatcher: Removed {} watches", removed);
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        if self.state() == WatcherState::Running {
            if let Err(e) = self.stop() {
                error!("FsWatcher: {}", e);
            }
        }
    }
}

/// Keeps a watch alive. Dropping it removes the watch.
#[must_use = "dropping the token removes the watch"]
pub struct ObservationToken {
    id: Uuid,
    shared: Option<Weak<WatcherShared>>,
}

impl ObservationToken {
    /// Id carried by events delivered for this watch.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the watch.
    pub fn cancel(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(shared) = self.shared.take().and_then(|weak| weak.upgrade()) {
            if shared.watches.write().remove(&self.id).is_some() {
                debug!("FsWatcher: Cancelled watch {}", self.id);
            }
        }
    }
}

impl Drop for ObservationToken {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for ObservationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationToken").field("id", &self.id).finish()
    }
}
