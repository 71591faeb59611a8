//! `harness wait-readable`: one descriptor through the select thread.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use harness_eventloop::{
    BridgeMetrics, HostWaker, PollDescriptor, PollStart, SelectWorker, SystemPoll, POLL_IN,
};

use crate::config::HarnessConfig;

/// Stands in for a host loop: the select thread signals it when the
/// blocking poll completes.
#[derive(Default)]
struct ParkedWaker {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl HostWaker for ParkedWaker {
    fn wake_up(&self) {
        *self.signalled.lock() = true;
        self.cond.notify_all();
    }
}

impl ParkedWaker {
    /// Block until signalled or `deadline` passes. Returns whether signalled.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut signalled),
            }
        }
        *signalled
    }
}

/// Wait for `fd` to become readable. Returns the ready count.
pub(crate) fn wait_readable(
    config: &HarnessConfig,
    fd: RawFd,
    timeout_ms: i32,
) -> Result<usize, Box<dyn std::error::Error>> {
    config.bridge.validate()?;

    let waker = Arc::new(ParkedWaker::default());
    let metrics = Arc::new(BridgeMetrics::new());
    let worker = SelectWorker::new(
        Arc::new(SystemPoll),
        waker.clone(),
        &config.bridge,
        metrics.clone(),
    );

    let mut fds = [PollDescriptor::new(fd, POLL_IN)];
    let ready = match worker.start_poll(&mut fds, timeout_ms) {
        PollStart::Ready(ready) => {
            debug!("wait-readable: Probe found {} ready", ready);
            ready
        }
        PollStart::Pending => {
            let deadline = u64::try_from(timeout_ms)
                .ok()
                .map(|ms| Instant::now() + Duration::from_millis(ms));
            if waker.wait(deadline) {
                worker.collect_poll(&mut fds)
            } else {
                debug!("wait-readable: Timed out after {}ms", timeout_ms);
                0
            }
        }
    };

    let snapshot = metrics.snapshot();
    debug!(
        "wait-readable: sync_probes={} async_polls={} worker_polls={}",
        snapshot.sync_probes, snapshot.async_polls, snapshot.worker_polls
    );
    info!(
        "wait-readable: fd {} ready={} revents={:#x}",
        fd, ready, fds[0].revents
    );
    Ok(ready)
}
