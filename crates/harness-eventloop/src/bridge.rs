//! The loop bridge.
//!
//! Observes the host loop and runs one foreign iteration per host iteration:
//!
//! - BeforeSources: prepare, query, probe, check and dispatch sources more
//!   urgent than host activity.
//! - BeforeWaiting: prepare and query again, then start a poll. Wake the host
//!   if something is ready, otherwise let it sleep with the select thread
//!   (and a timer, for foreign timeouts) standing by.
//! - AfterWaiting: collect the poll, check and dispatch.
//!
//! Entry and Exit track the host nesting depth and the foreign context
//! ownership taken at the outermost entry that could acquire it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::foreign::{ForeignContext, ForeignLoopAdapter};
use crate::host::{HostLoop, TimerToken};
use crate::metrics::BridgeMetrics;
use crate::observer::RunLoopObserver;
use crate::phase::RunLoopPhase;
use crate::poll::PollFunc;
use crate::poll_set::PollSet;
use crate::select_worker::{SelectThreadState, SelectWorker, ThreadSpawner};

/// Drives a [`ForeignContext`] from a [`HostLoop`].
///
/// Lives on the host loop's thread for its whole lifetime.
pub struct LoopBridge {
    host: Rc<dyn HostLoop>,
    adapter: ForeignLoopAdapter,
    worker: SelectWorker,
    config: BridgeConfig,
    metrics: Arc<BridgeMetrics>,

    poll_set: RefCell<PollSet>,

    /// Host nesting depth.
    current_level: Cell<u32>,
    /// Depth at which the foreign context was acquired.
    acquired_level: Cell<Option<u32>>,
    /// Raised while the bridge itself is spinning the host loop.
    getting_events: Cell<u32>,

    /// Priority from the BeforeWaiting prepare, reused for the AfterWaiting
    /// check.
    max_priority: Cell<i32>,
    polling_async: Cell<bool>,
    timer: Cell<Option<TimerToken>>,
}

impl LoopBridge {
    /// Create a builder.
    pub fn builder() -> LoopBridgeBuilder {
        LoopBridgeBuilder::new()
    }

    /// React to a host loop phase. Called by the installed observer.
    pub fn handle_phase(&self, phase: RunLoopPhase) {
        match phase {
            RunLoopPhase::Entry => self.current_level.set(self.current_level.get() + 1),
            RunLoopPhase::Exit => {
                let level = self.current_level.get();
                assert!(level > 0, "host loop exit without a matching entry");
                self.current_level.set(level - 1);
            }
            _ => {}
        }

        // Activity we triggered ourselves.
        if self.getting_events.get() > 0 {
            return;
        }

        match phase {
            RunLoopPhase::Entry => self.on_entry(),
            RunLoopPhase::BeforeTimers => {}
            RunLoopPhase::BeforeSources => self.on_before_sources(),
            RunLoopPhase::BeforeWaiting => self.on_before_waiting(),
            RunLoopPhase::AfterWaiting => self.on_after_waiting(),
            RunLoopPhase::Exit => self.on_exit(),
        }
    }

    /// Run `f` with phase handling suspended.
    ///
    /// Use this around calls that spin the host loop on the bridge's behalf;
    /// the iterations they produce only update the nesting depth.
    pub fn with_host_events<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = GettingEventsGuard::raise(&self.getting_events);
        f()
    }

    /// Whether this thread currently owns the foreign context.
    pub fn owns_context(&self) -> bool {
        self.acquired_level.get().is_some()
    }

    /// Current host loop nesting depth.
    pub fn loop_level(&self) -> u32 {
        self.current_level.get()
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn worker_state(&self) -> SelectThreadState {
        self.worker.state()
    }

    fn on_entry(&self) {
        if self.owns_context() {
            return;
        }
        if self.adapter.acquire() {
            debug!("LoopBridge: Beginning tracking run loop activity");
            self.acquired_level.set(Some(self.current_level.get()));
        } else {
            // Another thread is iterating the context; try again next entry.
            self.metrics.record_acquire_failure();
            warn!("LoopBridge: Can't acquire foreign context");
        }
    }

    fn on_before_sources(&self) {
        if !self.owns_context() {
            return;
        }

        let max_priority = self.adapter.prepare().min(self.config.host_priority);

        let ready = {
            let mut set = self.poll_set.borrow_mut();
            // Timeout ignored: queried again before waiting.
            self.adapter.query(max_priority, &mut set);
            if !set.is_empty() {
                self.metrics.record_sync_probe();
                self.adapter.default_poll(set.as_mut_slice(), 0);
            }
            self.adapter.check(max_priority, &set)
        };

        if ready {
            self.dispatch("high priority sources");
        }
    }

    fn on_before_waiting(&self) {
        if !self.owns_context() {
            return;
        }

        let max_priority = self.adapter.prepare();
        self.max_priority.set(max_priority);

        let (start, timeout_ms) = {
            let mut set = self.poll_set.borrow_mut();
            let timeout_ms = self.adapter.query(max_priority, &mut set);
            (self.worker.start_poll(set.as_mut_slice(), timeout_ms), timeout_ms)
        };

        if start.ready_count() > 0 || timeout_ms == 0 {
            self.host.wake_up();
        } else if timeout_ms > 0 {
            self.arm_timer(Duration::from_millis(timeout_ms as u64));
        }
        self.polling_async.set(start.is_pending());
    }

    fn on_after_waiting(&self) {
        if let Some(token) = self.timer.take() {
            self.host.remove_timer(token);
        }

        if !self.owns_context() {
            return;
        }

        let max_priority = self.max_priority.get();
        let ready = {
            let mut set = self.poll_set.borrow_mut();
            if self.polling_async.replace(false) {
                self.worker.collect_poll(set.as_mut_slice());
            }
            self.adapter.check(max_priority, &set)
        };

        if ready {
            self.dispatch("after waiting");
        }
        self.metrics.record_iteration();
    }

    fn on_exit(&self) {
        // +1: the depth was already decremented in handle_phase.
        if self.acquired_level.get() == Some(self.current_level.get() + 1) {
            self.adapter.release();
            self.acquired_level.set(None);
            debug!("LoopBridge: Ended tracking run loop activity");
        }
    }

    fn arm_timer(&self, delay: Duration) {
        trace!("LoopBridge: Adding timer to wake us up in {:?}", delay);
        let token = self.host.add_timer(delay);
        if let Some(stale) = self.timer.replace(Some(token)) {
            self.host.remove_timer(stale);
        }
        self.metrics.record_timer_armed();
    }

    /// No borrow of bridge state may be held here: dispatch can re-enter.
    fn dispatch(&self, stage: &str) {
        trace!("LoopBridge: Dispatching {}", stage);
        self.metrics.record_dispatch();
        self.adapter.dispatch();
    }
}

impl std::fmt::Debug for LoopBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopBridge")
            .field("current_level", &self.current_level.get())
            .field("acquired_level", &self.acquired_level.get())
            .field("getting_events", &self.getting_events.get())
            .field("polling_async", &self.polling_async.get())
            .finish_non_exhaustive()
    }
}

/// Forwards host phases to the bridge without keeping it alive.
struct BridgeObserver {
    bridge: Weak<LoopBridge>,
}

impl RunLoopObserver for BridgeObserver {
    fn on_phase(&self, phase: RunLoopPhase) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.handle_phase(phase);
        }
    }
}

struct GettingEventsGuard<'a> {
    counter: &'a Cell<u32>,
}

impl<'a> GettingEventsGuard<'a> {
    fn raise(counter: &'a Cell<u32>) -> Self {
        counter.set(counter.get() + 1);
        Self { counter }
    }
}

impl Drop for GettingEventsGuard<'_> {
    fn drop(&mut self) {
        self.counter.set(self.counter.get() - 1);
    }
}

/// Builder for installing a [`LoopBridge`] on a host loop.
pub struct LoopBridgeBuilder {
    config: BridgeConfig,
    spawner: Option<Arc<dyn ThreadSpawner>>,
    poll_func: Option<Arc<dyn PollFunc>>,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl LoopBridgeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            spawner: None,
            poll_func: None,
            metrics: None,
        }
    }

    /// Set bridge configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the spawner used for the select thread.
    pub fn spawner(mut self, spawner: Arc<dyn ThreadSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Override the context's default poll primitive.
    pub fn poll_func(mut self, poll_func: Arc<dyn PollFunc>) -> Self {
        self.poll_func = Some(poll_func);
        self
    }

    /// Share an existing metrics instance.
    pub fn metrics(mut self, metrics: Arc<BridgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the bridge and register its observer with `host`.
    pub fn install(
        self,
        host: Rc<dyn HostLoop>,
        context: Box<dyn ForeignContext>,
    ) -> BridgeResult<Rc<LoopBridge>> {
        self.config.validate()?;

        let adapter = match self.poll_func {
            Some(poll_func) => ForeignLoopAdapter::with_poll_func(context, poll_func),
            None => ForeignLoopAdapter::new(context),
        };
        let metrics = self.metrics.unwrap_or_default();

        let mut worker = SelectWorker::new(
            adapter.poll_func(),
            host.waker(),
            &self.config,
            metrics.clone(),
        );
        if let Some(spawner) = self.spawner {
            worker = worker.with_spawner(spawner);
        }

        let bridge = Rc::new(LoopBridge {
            host: host.clone(),
            adapter,
            worker,
            poll_set: RefCell::new(PollSet::with_capacity(self.config.initial_poll_capacity)),
            config: self.config,
            metrics,
            current_level: Cell::new(0),
            acquired_level: Cell::new(None),
            getting_events: Cell::new(0),
            max_priority: Cell::new(0),
            polling_async: Cell::new(false),
            timer: Cell::new(None),
        });

        host.add_observer(Rc::new(BridgeObserver {
            bridge: Rc::downgrade(&bridge),
        }));
        debug!("LoopBridge: Installed run loop observer");

        Ok(bridge)
    }
}

impl Default for LoopBridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
