//! The select thread.
//!
//! The host loop cannot wait on file descriptors and its own events at the
//! same time, so when the foreign context needs a blocking poll we hand the
//! descriptor set to a helper thread and let the host loop sleep natively.
//! When the poll completes the helper wakes the host loop, and the main
//! thread collects the results on its next AfterWaiting.
//!
//! ```text
//!                  start_poll (new set)
//!   Waiting ────────────────────────────────▶ PollingQueued
//!      ▲                                          │ worker adopts set
//!      │ poll completes                           ▼
//!      └──────────────────────────────────── PollingDescriptors ◀─┐
//!                                                 │               │
//!                      start_poll (same set)      ▼               │
//!                                            PollingRestart ──────┘
//!                                              poll completes, re-poll
//! ```
//!
//! A different set submitted while polling writes a byte to the wakeup pipe
//! and moves straight to PollingQueued.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::HostWaker;
use crate::metrics::BridgeMetrics;
use crate::poll::PollFunc;
use crate::poll_set::{requests_equal, PollDescriptor};
use crate::wakeup::WakeupPipe;

/// State shared between the main thread and the select thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectThreadState {
    /// The select thread has not been started yet.
    BeforeStart,
    /// Waiting for the main thread to submit a descriptor set.
    Waiting,
    /// A set has been submitted but not yet picked up.
    PollingQueued,
    /// Polling; the main thread resubmitted the same set, so poll again once
    /// the current poll completes instead of reporting it.
    PollingRestart,
    /// Blocked in the poll primitive.
    PollingDescriptors,
}

impl std::fmt::Display for SelectThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectThreadState::BeforeStart => write!(f, "before_start"),
            SelectThreadState::Waiting => write!(f, "waiting"),
            SelectThreadState::PollingQueued => write!(f, "polling_queued"),
            SelectThreadState::PollingRestart => write!(f, "polling_restart"),
            SelectThreadState::PollingDescriptors => write!(f, "polling_descriptors"),
        }
    }
}

/// Outcome of [`SelectWorker::start_poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStart {
    /// Answered synchronously; the count may be zero.
    Ready(usize),
    /// Nothing was ready; an asynchronous poll is running and
    /// [`SelectWorker::collect_poll`] must be called later.
    Pending,
}

impl PollStart {
    pub fn is_pending(&self) -> bool {
        matches!(self, PollStart::Pending)
    }

    /// Ready count, or zero while pending.
    pub fn ready_count(&self) -> usize {
        match self {
            PollStart::Ready(n) => *n,
            PollStart::Pending => 0,
        }
    }
}

/// Creates the select thread.
pub trait ThreadSpawner: Send + Sync {
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()>;
}

/// Spawns detached OS threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdThreadSpawner;

impl ThreadSpawner for StdThreadSpawner {
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map(|_| ())
    }
}

struct WorkerInner {
    state: SelectThreadState,
    /// Set the select thread is polling; wakeup descriptor last.
    current: Vec<PollDescriptor>,
    /// Set waiting to be picked up; wakeup descriptor last.
    next: Option<Vec<PollDescriptor>>,
    wakeup: Option<WakeupPipe>,
    shutdown: bool,
}

struct WorkerShared {
    inner: Mutex<WorkerInner>,
    /// Signalled only on transitions out of Waiting.
    cond: Condvar,
    poll_func: Arc<dyn PollFunc>,
    waker: Arc<dyn HostWaker>,
    metrics: Arc<BridgeMetrics>,
    trace_transitions: bool,
}

impl WorkerShared {
    fn set_state(&self, inner: &mut WorkerInner, new_state: SelectThreadState) {
        if inner.state == new_state {
            return;
        }
        let old_state = inner.state;
        inner.state = new_state;
        if self.trace_transitions {
            trace!("SelectWorker: state {} => {}", old_state, new_state);
        }
        if old_state == SelectThreadState::Waiting {
            self.cond.notify_one();
        }
    }

    /// Body of the select thread.
    fn run(&self) {
        let mut inner = self.inner.lock();
        debug!("SelectWorker: select thread running");

        loop {
            if inner.shutdown {
                break;
            }
            let state = inner.state;
            match state {
                SelectThreadState::BeforeStart => {
                    unreachable!("select thread running before start")
                }
                SelectThreadState::Waiting => {
                    self.cond.wait(&mut inner);
                }
                SelectThreadState::PollingQueued => {
                    inner.current = inner.next.take().unwrap_or_default();
                    self.set_state(&mut inner, SelectThreadState::PollingDescriptors);
                }
                SelectThreadState::PollingRestart => {
                    self.set_state(&mut inner, SelectThreadState::PollingDescriptors);
                }
                SelectThreadState::PollingDescriptors => {
                    let mut fds = inner.current.clone();
                    MutexGuard::unlocked(&mut inner, || {
                        self.poll_func.poll(&mut fds, -1);
                    });
                    self.metrics.record_worker_poll();

                    if let Some(pipe) = inner.wakeup.as_ref() {
                        pipe.drain();
                    }
                    inner.current = fds;

                    if inner.shutdown {
                        break;
                    }
                    if inner.state == SelectThreadState::PollingDescriptors {
                        self.waker.wake_up();
                        self.set_state(&mut inner, SelectThreadState::Waiting);
                    }
                }
            }
        }

        debug!("SelectWorker: select thread exiting");
    }
}

/// Main-thread handle to the select thread.
pub struct SelectWorker {
    shared: Arc<WorkerShared>,
    spawner: Arc<dyn ThreadSpawner>,
    thread_name: String,
    retry_delay: Duration,
}

impl SelectWorker {
    /// Create a worker. The thread itself is spawned on the first poll that
    /// needs it.
    pub fn new(
        poll_func: Arc<dyn PollFunc>,
        waker: Arc<dyn HostWaker>,
        config: &BridgeConfig,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                inner: Mutex::new(WorkerInner {
                    state: SelectThreadState::BeforeStart,
                    current: Vec::new(),
                    next: None,
                    wakeup: None,
                    shutdown: false,
                }),
                cond: Condvar::new(),
                poll_func,
                waker,
                metrics,
                trace_transitions: config.trace_state_transitions,
            }),
            spawner: Arc::new(StdThreadSpawner),
            thread_name: config.worker_thread_name.clone(),
            retry_delay: config.spawn_retry_delay(),
        }
    }

    /// Replace the thread spawner.
    pub fn with_spawner(mut self, spawner: Arc<dyn ThreadSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Current state of the select thread.
    pub fn state(&self) -> SelectThreadState {
        self.shared.inner.lock().state
    }

    /// Begin polling `fds`; `timeout_ms` only decides whether a blocking
    /// poll is wanted at all.
    ///
    /// Always probes synchronously with a zero timeout first, so ready
    /// descriptors never wait on a thread handoff. Returns `Pending` only
    /// when nothing was ready and `timeout_ms != 0`.
    pub fn start_poll(&self, fds: &mut [PollDescriptor], timeout_ms: i32) -> PollStart {
        let placeholder = fds.iter().position(PollDescriptor::is_placeholder);

        if fds.is_empty() || (fds.len() == 1 && placeholder.is_some()) {
            trace!("SelectWorker: Nothing to poll");
            return PollStart::Ready(0);
        }

        self.shared.metrics.record_sync_probe();
        let ready = self.shared.poll_func.poll(fds, 0);
        if ready > 0 || timeout_ms == 0 {
            return PollStart::Ready(ready.max(0) as usize);
        }

        let mut inner = self.shared.inner.lock();

        if inner.state == SelectThreadState::BeforeStart && !self.start(&mut inner) {
            return PollStart::Ready(0);
        }

        let mut have_new_fds = false;
        let state = inner.state;
        match state {
            SelectThreadState::PollingQueued => {
                // Not picked up yet: replace a stale set in place.
                let stale = inner
                    .next
                    .as_deref()
                    .map_or(true, |next| !requests_equal(fds, without_wakeup(next)));
                if stale {
                    inner.next = None;
                    have_new_fds = true;
                }
            }
            SelectThreadState::PollingRestart | SelectThreadState::PollingDescriptors => {
                // Same set: let the poll run on, but re-poll when it
                // completes so the main thread never collects readiness
                // observed before its own latest reads.
                if !requests_equal(fds, without_wakeup(&inner.current)) {
                    have_new_fds = true;
                } else if needs_restart(fds.len(), placeholder)
                    && state != SelectThreadState::PollingRestart
                {
                    self.shared.metrics.record_worker_restart();
                    self.shared
                        .set_state(&mut inner, SelectThreadState::PollingRestart);
                }
            }
            SelectThreadState::Waiting | SelectThreadState::BeforeStart => {
                have_new_fds = true;
            }
        }

        if have_new_fds {
            debug_assert!(inner.next.is_none());
            let Some(wakeup) = inner.wakeup.as_ref().map(WakeupPipe::descriptor) else {
                return PollStart::Ready(0);
            };

            let mut next = Vec::with_capacity(fds.len() + 1);
            next.extend_from_slice(fds);
            next.push(wakeup);
            inner.next = Some(next);

            let polling = !matches!(
                inner.state,
                SelectThreadState::PollingQueued | SelectThreadState::Waiting
            );
            if polling {
                if let Some(pipe) = inner.wakeup.as_ref() {
                    match pipe.notify() {
                        Ok(()) => self.shared.metrics.record_worker_interrupt(),
                        Err(e) => warn!("SelectWorker: Failed to interrupt select thread: {}", e),
                    }
                }
            }
            self.shared
                .set_state(&mut inner, SelectThreadState::PollingQueued);
        }

        self.shared.metrics.record_async_poll();
        PollStart::Pending
    }

    /// Finish an asynchronous poll begun by [`start_poll`](Self::start_poll).
    ///
    /// `fds` must be the set passed to `start_poll`. Results are written into
    /// it. Returns the number of ready descriptors, or zero when the poll has
    /// not completed yet.
    ///
    /// Panics if `fds` does not match the set the select thread polled.
    pub fn collect_poll(&self, fds: &mut [PollDescriptor]) -> usize {
        let inner = self.shared.inner.lock();

        if inner.state != SelectThreadState::Waiting {
            return 0;
        }

        assert_eq!(
            inner.current.len(),
            fds.len() + 1,
            "collected descriptor set differs from the polled one"
        );

        let mut ready = 0;
        for (fd, polled) in fds.iter_mut().zip(inner.current.iter()) {
            if fd.is_placeholder() {
                continue;
            }
            assert_eq!(fd.fd, polled.fd, "collected descriptor differs from the polled one");
            assert_eq!(
                fd.events, polled.events,
                "collected events differ from the polled ones"
            );
            if polled.revents != 0 {
                fd.revents = polled.revents;
                ready += 1;
            }
        }
        ready
    }

    /// Create the wakeup pipe and spawn the thread, retrying the spawn
    /// indefinitely. Returns false if the pipe could not be created.
    fn start(&self, inner: &mut MutexGuard<'_, WorkerInner>) -> bool {
        assert_eq!(inner.state, SelectThreadState::BeforeStart);

        match WakeupPipe::new() {
            Ok(pipe) => inner.wakeup = Some(pipe),
            Err(e) => {
                error!("SelectWorker: Failed to create wakeup pipe: {}", e);
                return false;
            }
        }

        self.shared.set_state(inner, SelectThreadState::Waiting);

        loop {
            let shared = self.shared.clone();
            match self
                .spawner
                .spawn(&self.thread_name, Box::new(move || shared.run()))
            {
                Ok(()) => break,
                Err(e) => {
                    self.shared.metrics.record_spawn_failure();
                    warn!(
                        "SelectWorker: {}, sleeping and trying again",
                        BridgeError::Spawn(e)
                    );
                    thread::sleep(self.retry_delay);
                }
            }
        }

        debug!("SelectWorker: Started select thread '{}'", self.thread_name);
        true
    }
}

impl Drop for SelectWorker {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.shutdown = true;
        if let Some(pipe) = inner.wakeup.as_ref() {
            let _ = pipe.notify();
        }
        self.shared.cond.notify_one();
    }
}

/// A set minus the wakeup descriptor appended for the select thread.
fn without_wakeup(set: &[PollDescriptor]) -> &[PollDescriptor] {
    &set[..set.len().saturating_sub(1)]
}

/// Whether resubmitting an unchanged set must go through PollingRestart.
///
/// Not needed when the only live descriptor is the foreign context's own
/// wakeup descriptor: a lone entry, or a pair alongside a placeholder.
fn needs_restart(len: usize, placeholder: Option<usize>) -> bool {
    !((len == 1 && placeholder.is_none()) || (len == 2 && placeholder.is_some()))
}

#[cfg(test)]
#[path = "select_worker_tests.rs"]
mod tests;
