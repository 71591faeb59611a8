//! `harness watch`: log filesystem changes until interrupted.

use std::path::PathBuf;

use nix::sys::signal::{SigSet, Signal};
use tracing::info;

use harness_fswatch::{FsEventType, FsWatcher, ObservationToken, WatchResult};

use crate::config::HarnessConfig;

/// Watch `paths` and log every matching event until SIGINT or SIGTERM.
pub(crate) fn watch(
    config: &HarnessConfig,
    paths: &[PathBuf],
    types: &[FsEventType],
) -> Result<(), Box<dyn std::error::Error>> {
    // Block before the backend thread exists so it inherits the mask and
    // the signal is left for sigwait.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;

    let watcher = FsWatcher::new(config.watch.clone());
    watcher.start()?;
    let tokens = watch_paths(&watcher, paths, types)?;
    info!(
        "Watching {} path(s) for {} event type(s), press Ctrl-C to stop",
        tokens.len(),
        event_types(types).len()
    );

    let signal = signals.wait()?;
    info!("Received {}, stopping", signal);

    drop(tokens);
    watcher.stop()?;
    Ok(())
}

/// Register one logging watch per path.
pub(crate) fn watch_paths(
    watcher: &FsWatcher,
    paths: &[PathBuf],
    types: &[FsEventType],
) -> WatchResult<Vec<ObservationToken>> {
    let types = event_types(types);
    paths
        .iter()
        .map(|path| {
            watcher.watch(path, &types, |event| match &event.new_path {
                Some(new_path) => info!(
                    "{} {} -> {}",
                    event.kind,
                    event.path.display(),
                    new_path.display()
                ),
                None => info!("{} {}", event.kind, event.path.display()),
            })
        })
        .collect()
}

/// An empty selection means every type.
fn event_types(types: &[FsEventType]) -> Vec<FsEventType> {
    if types.is_empty() {
        FsEventType::ALL.to_vec()
    } else {
        types.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_fswatch::{WatchConfig, WatchError};
    use tempfile::TempDir;

    #[test]
    fn test_empty_types_means_all() {
        assert_eq!(event_types(&[]).len(), FsEventType::ALL.len());
        assert_eq!(
            event_types(&[FsEventType::Create]),
            vec![FsEventType::Create]
        );
    }

    #[test]
    fn test_watch_paths_registers_each_path() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let watcher = FsWatcher::new(WatchConfig::default());
        watcher.start().unwrap();

        let tokens = watch_paths(
            &watcher,
            &[first.path().to_path_buf(), second.path().to_path_buf()],
            &[],
        )
        .unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(watcher.watch_count(), 2);

        drop(tokens);
        assert_eq!(watcher.watch_count(), 0);
    }

    #[test]
    fn test_watch_paths_fails_on_missing_path() {
        let dir = TempDir::new().unwrap();
        let watcher = FsWatcher::new(WatchConfig::default());
        watcher.start().unwrap();

        let result = watch_paths(
            &watcher,
            &[dir.path().to_path_buf(), dir.path().join("missing")],
            &[FsEventType::Create],
        );
        assert!(matches!(result, Err(WatchError::Notify(_))));
        // The first token was dropped with the error.
        assert_eq!(watcher.watch_count(), 0);
    }
}
