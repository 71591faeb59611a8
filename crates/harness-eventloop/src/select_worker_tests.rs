use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::*;
use crate::poll::SystemPoll;
use crate::poll_set::POLL_IN;

#[derive(Default)]
struct CountingWaker {
    wakeups: AtomicUsize,
}

impl HostWaker for CountingWaker {
    fn wake_up(&self) {
        self.wakeups.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingWaker {
    fn count(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }
}

/// Counts calls that may block.
#[derive(Default)]
struct CountingPoll {
    blocking_calls: AtomicUsize,
}

impl PollFunc for CountingPoll {
    fn poll(&self, fds: &mut [PollDescriptor], timeout_ms: i32) -> i32 {
        if timeout_ms != 0 {
            self.blocking_calls.fetch_add(1, Ordering::SeqCst);
        }
        SystemPoll.poll(fds, timeout_ms)
    }
}

/// Fails a fixed number of spawns, then spawns real threads.
struct FlakySpawner {
    failures_left: AtomicUsize,
}

impl ThreadSpawner for FlakySpawner {
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"));
        }
        StdThreadSpawner.spawn(name, body)
    }
}

/// Holds spawned threads back until opened.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

struct GatedSpawner {
    gate: Arc<Gate>,
}

impl ThreadSpawner for GatedSpawner {
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        let gate = self.gate.clone();
        StdThreadSpawner.spawn(
            name,
            Box::new(move || {
                gate.wait();
                body();
            }),
        )
    }
}

/// Raises a flag once the thread body has returned.
struct ExitFlagSpawner {
    exited: Arc<AtomicBool>,
}

impl ThreadSpawner for ExitFlagSpawner {
    fn spawn(&self, name: &str, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<()> {
        let exited = self.exited.clone();
        StdThreadSpawner.spawn(
            name,
            Box::new(move || {
                body();
                exited.store(true, Ordering::SeqCst);
            }),
        )
    }
}

fn make_worker(poll_func: Arc<dyn PollFunc>) -> (SelectWorker, Arc<CountingWaker>, Arc<BridgeMetrics>) {
    let waker = Arc::new(CountingWaker::default());
    let metrics = Arc::new(BridgeMetrics::new());
    let worker = SelectWorker::new(
        poll_func,
        waker.clone(),
        &BridgeConfig::default(),
        metrics.clone(),
    );
    (worker, waker, metrics)
}

fn readable(stream: &UnixStream) -> PollDescriptor {
    PollDescriptor::new(stream.as_raw_fd(), POLL_IN)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn count(counter: &std::sync::atomic::AtomicU64) -> u64 {
    counter.load(Ordering::SeqCst)
}

#[test]
fn test_empty_set_returns_immediately() {
    let (worker, _waker, metrics) = make_worker(Arc::new(SystemPoll));

    assert_eq!(worker.start_poll(&mut [], -1), PollStart::Ready(0));
    assert_eq!(worker.state(), SelectThreadState::BeforeStart);
    assert_eq!(count(&metrics.sync_probes), 0);
}

#[test]
fn test_placeholder_only_set_returns_immediately() {
    let (worker, _waker, _metrics) = make_worker(Arc::new(SystemPoll));

    let mut fds = [PollDescriptor::new(-1, POLL_IN)];
    assert_eq!(worker.start_poll(&mut fds, -1), PollStart::Ready(0));
    assert_eq!(worker.state(), SelectThreadState::BeforeStart);
}

#[test]
fn test_zero_timeout_never_starts_thread() {
    let (worker, _waker, metrics) = make_worker(Arc::new(SystemPoll));
    let (a, _b) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert_eq!(worker.start_poll(&mut fds, 0), PollStart::Ready(0));
    assert_eq!(worker.state(), SelectThreadState::BeforeStart);
    assert_eq!(count(&metrics.sync_probes), 1);
    assert_eq!(count(&metrics.async_polls), 0);
}

#[test]
fn test_ready_descriptor_answered_synchronously() {
    let (worker, _waker, _metrics) = make_worker(Arc::new(SystemPoll));
    let (a, mut b) = UnixStream::pair().unwrap();
    b.write_all(b"x").unwrap();

    let mut fds = [readable(&a)];
    assert_eq!(worker.start_poll(&mut fds, -1), PollStart::Ready(1));
    assert_ne!(fds[0].revents & POLL_IN, 0);
    assert_eq!(worker.state(), SelectThreadState::BeforeStart);
}

#[test]
fn test_collect_before_completion_returns_zero() {
    let (worker, _waker, _metrics) = make_worker(Arc::new(SystemPoll));
    let (a, _b) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert_eq!(worker.collect_poll(&mut fds), 0);
    assert_eq!(fds[0].revents, 0);
}

#[test]
fn test_async_readiness_is_collected() {
    let (worker, waker, metrics) = make_worker(Arc::new(SystemPoll));
    let (a, mut b) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert_eq!(worker.start_poll(&mut fds, -1), PollStart::Pending);

    thread::sleep(Duration::from_millis(50));
    b.write_all(b"x").unwrap();
    thread::sleep(Duration::from_millis(100));

    assert!(wait_until(|| waker.count() >= 1));
    assert_eq!(worker.state(), SelectThreadState::Waiting);
    assert_eq!(worker.collect_poll(&mut fds), 1);
    assert_ne!(fds[0].revents & POLL_IN, 0);
    assert_eq!(count(&metrics.async_polls), 1);
    assert_eq!(count(&metrics.worker_polls), 1);
}

#[test]
fn test_identical_set_restarts_without_interrupt() {
    let (worker, waker, metrics) = make_worker(Arc::new(SystemPoll));
    let (a1, mut b1) = UnixStream::pair().unwrap();
    let (a2, _b2) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a1), readable(&a2)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert!(wait_until(|| worker.state() == SelectThreadState::PollingDescriptors));

    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert_eq!(worker.state(), SelectThreadState::PollingRestart);
    assert_eq!(count(&metrics.worker_restarts), 1);
    assert_eq!(count(&metrics.worker_interrupts), 0);

    b1.write_all(b"x").unwrap();
    assert!(wait_until(|| waker.count() >= 1));

    // The completed poll is discarded and the set polled once more.
    assert_eq!(count(&metrics.worker_polls), 2);
    assert_eq!(worker.collect_poll(&mut fds), 1);
    assert_ne!(fds[0].revents & POLL_IN, 0);
    assert_eq!(fds[1].revents, 0);
}

#[test]
fn test_single_descriptor_set_skips_restart() {
    let (worker, _waker, metrics) = make_worker(Arc::new(SystemPoll));
    let (a, _b) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert!(wait_until(|| worker.state() == SelectThreadState::PollingDescriptors));

    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert_eq!(worker.state(), SelectThreadState::PollingDescriptors);
    assert_eq!(count(&metrics.worker_restarts), 0);
}

#[test]
fn test_different_set_interrupts_poll() {
    let (worker, waker, metrics) = make_worker(Arc::new(SystemPoll));
    let (a1, _b1) = UnixStream::pair().unwrap();
    let (a2, mut b2) = UnixStream::pair().unwrap();

    let mut first = [readable(&a1)];
    assert!(worker.start_poll(&mut first, -1).is_pending());
    assert!(wait_until(|| worker.state() == SelectThreadState::PollingDescriptors));

    let mut second = [readable(&a2)];
    assert!(worker.start_poll(&mut second, -1).is_pending());
    assert_eq!(count(&metrics.worker_interrupts), 1);

    // The interrupted poll is not reported; the new set is adopted.
    assert!(wait_until(|| {
        count(&metrics.worker_polls) >= 1
            && worker.state() == SelectThreadState::PollingDescriptors
    }));
    assert_eq!(waker.count(), 0);

    b2.write_all(b"x").unwrap();
    assert!(wait_until(|| waker.count() >= 1));
    assert_eq!(worker.collect_poll(&mut second), 1);
    assert_eq!(count(&metrics.worker_interrupts), 1);
}

#[test]
fn test_identical_set_spans_iterations_with_one_blocking_poll() {
    let poll = Arc::new(CountingPoll::default());
    let (worker, waker, _metrics) = make_worker(poll.clone());
    let (a1, _b1) = UnixStream::pair().unwrap();
    let (a2, _b2) = UnixStream::pair().unwrap();
    let (a3, _b3) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a1), readable(&a2), readable(&a3)];

    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert!(wait_until(|| worker.state() == SelectThreadState::PollingDescriptors));
    assert_eq!(worker.collect_poll(&mut fds), 0);

    assert!(worker.start_poll(&mut fds, -1).is_pending());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(worker.collect_poll(&mut fds), 0);

    assert_eq!(poll.blocking_calls.load(Ordering::SeqCst), 1);
    assert_eq!(waker.count(), 0);
}

#[test]
fn test_spawn_failures_are_retried() {
    let waker = Arc::new(CountingWaker::default());
    let metrics = Arc::new(BridgeMetrics::new());
    let worker = SelectWorker::new(
        Arc::new(SystemPoll),
        waker.clone(),
        &BridgeConfig::default(),
        metrics.clone(),
    )
    .with_spawner(Arc::new(FlakySpawner {
        failures_left: AtomicUsize::new(2),
    }));
    let (a, mut b) = UnixStream::pair().unwrap();

    let started = Instant::now();
    let mut fds = [readable(&a)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(count(&metrics.spawn_failures), 2);

    b.write_all(b"x").unwrap();
    assert!(wait_until(|| waker.count() >= 1));
    assert_eq!(worker.collect_poll(&mut fds), 1);
}

#[test]
fn test_queued_set_replaced_before_adoption() {
    let gate = Arc::new(Gate::default());
    let (worker, waker, metrics) = make_worker(Arc::new(SystemPoll));
    let worker = worker.with_spawner(Arc::new(GatedSpawner { gate: gate.clone() }));
    let (a1, mut b1) = UnixStream::pair().unwrap();
    let (a2, mut b2) = UnixStream::pair().unwrap();

    let mut first = [readable(&a1)];
    assert!(worker.start_poll(&mut first, -1).is_pending());
    assert_eq!(worker.state(), SelectThreadState::PollingQueued);

    let mut second = [readable(&a2)];
    assert!(worker.start_poll(&mut second, -1).is_pending());
    assert_eq!(worker.state(), SelectThreadState::PollingQueued);
    assert_eq!(count(&metrics.worker_interrupts), 0);

    // Readiness on the replaced set must not complete the poll.
    b1.write_all(b"x").unwrap();
    gate.open();
    assert!(wait_until(|| worker.state() == SelectThreadState::PollingDescriptors));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(waker.count(), 0);
    assert_eq!(count(&metrics.worker_polls), 0);

    b2.write_all(b"x").unwrap();
    assert!(wait_until(|| waker.count() >= 1));
    assert_eq!(worker.collect_poll(&mut second), 1);
    assert_ne!(second[0].revents & POLL_IN, 0);
    assert_eq!(count(&metrics.worker_polls), 1);
}

#[test]
fn test_drop_stops_thread_while_polling() {
    let exited = Arc::new(AtomicBool::new(false));
    let (worker, waker, _metrics) = make_worker(Arc::new(SystemPoll));
    let worker = worker.with_spawner(Arc::new(ExitFlagSpawner {
        exited: exited.clone(),
    }));
    let (a, _b) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    assert!(wait_until(|| worker.state() == SelectThreadState::PollingDescriptors));

    let shared = Arc::downgrade(&worker.shared);
    drop(worker);

    assert!(wait_until(|| exited.load(Ordering::SeqCst)));
    // The thread held the last reference, so the pipe is closed too.
    assert!(wait_until(|| shared.upgrade().is_none()));
    assert_eq!(waker.count(), 0);
}

#[test]
fn test_drop_stops_thread_while_waiting() {
    let exited = Arc::new(AtomicBool::new(false));
    let (worker, waker, _metrics) = make_worker(Arc::new(SystemPoll));
    let worker = worker.with_spawner(Arc::new(ExitFlagSpawner {
        exited: exited.clone(),
    }));
    let (a, mut b) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    b.write_all(b"x").unwrap();
    assert!(wait_until(|| waker.count() >= 1));
    assert_eq!(worker.state(), SelectThreadState::Waiting);
    assert!(!exited.load(Ordering::SeqCst));

    let shared = Arc::downgrade(&worker.shared);
    drop(worker);

    assert!(wait_until(|| exited.load(Ordering::SeqCst)));
    assert!(wait_until(|| shared.upgrade().is_none()));
}

#[test]
#[should_panic(expected = "differs from the polled one")]
fn test_collect_with_mismatched_set_panics() {
    let (worker, waker, _metrics) = make_worker(Arc::new(SystemPoll));
    let (a, mut b) = UnixStream::pair().unwrap();
    let (other, _peer) = UnixStream::pair().unwrap();

    let mut fds = [readable(&a)];
    assert!(worker.start_poll(&mut fds, -1).is_pending());
    b.write_all(b"x").unwrap();
    assert!(wait_until(|| waker.count() >= 1));

    let mut wrong = [readable(&other)];
    worker.collect_poll(&mut wrong);
}

#[test]
fn test_needs_restart_thresholds() {
    assert!(!needs_restart(1, None));
    assert!(!needs_restart(2, Some(0)));
    assert!(needs_restart(2, None));
    assert!(needs_restart(3, Some(2)));
}

#[test]
fn test_poll_start_accessors() {
    assert_eq!(PollStart::Ready(3).ready_count(), 3);
    assert_eq!(PollStart::Pending.ready_count(), 0);
    assert!(PollStart::Pending.is_pending());
    assert!(!PollStart::Ready(0).is_pending());
}

#[test]
fn test_state_display() {
    assert_eq!(SelectThreadState::PollingRestart.to_string(), "polling_restart");
    assert_eq!(SelectThreadState::BeforeStart.to_string(), "before_start");
}
