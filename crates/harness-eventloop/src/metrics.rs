//! Loop bridge metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Loop bridge metrics.
///
/// Shared between the main thread and the select thread.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Host loop iterations that reached AfterWaiting.
    pub iterations: AtomicU64,

    /// Foreign dispatch calls.
    pub dispatches: AtomicU64,

    /// Zero-timeout probes made on the main thread.
    pub sync_probes: AtomicU64,

    /// Polls handed to the select thread.
    pub async_polls: AtomicU64,

    /// Blocking polls made by the select thread.
    pub worker_polls: AtomicU64,

    /// Transitions into PollingRestart.
    pub worker_restarts: AtomicU64,

    /// Bytes written to the select thread wakeup pipe.
    pub worker_interrupts: AtomicU64,

    /// One-shot wakeup timers armed on the host loop.
    pub timers_armed: AtomicU64,

    /// Failed attempts to acquire the foreign context.
    pub acquire_failures: AtomicU64,

    /// Failed attempts to spawn the select thread.
    pub spawn_failures: AtomicU64,
}

impl BridgeMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_probe(&self) {
        self.sync_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_poll(&self) {
        self.async_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_poll(&self) {
        self.worker_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_restart(&self) {
        self.worker_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_interrupt(&self) {
        self.worker_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timer_armed(&self) {
        self.timers_armed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquire_failure(&self) {
        self.acquire_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            iterations: self.iterations.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            sync_probes: self.sync_probes.load(Ordering::Relaxed),
            async_polls: self.async_polls.load(Ordering::Relaxed),
            worker_polls: self.worker_polls.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
            worker_interrupts: self.worker_interrupts.load(Ordering::Relaxed),
            timers_armed: self.timers_armed.load(Ordering::Relaxed),
            acquire_failures: self.acquire_failures.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub iterations: u64,
    pub dispatches: u64,
    pub sync_probes: u64,
    pub async_polls: u64,
    pub worker_polls: u64,
    pub worker_restarts: u64,
    pub worker_interrupts: u64,
    pub timers_armed: u64,
    pub acquire_failures: u64,
    pub spawn_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of iterations that dispatched foreign callbacks.
    pub fn dispatch_ratio(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.dispatches as f64 / self.iterations as f64
    }

    /// Async polls served per blocking poll on the select thread.
    pub fn polls_per_worker_wait(&self) -> f64 {
        if self.worker_polls == 0 {
            return 0.0;
        }
        self.async_polls as f64 / self.worker_polls as f64
    }
}
