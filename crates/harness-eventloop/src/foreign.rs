//! The foreign main context and the adapter the bridge drives it through.

use std::sync::Arc;

use tracing::trace;

use crate::poll::{PollFunc, SystemPoll};
use crate::poll_set::{PollDescriptor, PollSet};

/// Priority for urgent foreign sources.
pub const PRIORITY_HIGH: i32 = -100;
/// Default foreign source priority; host loop activity counts as this.
pub const PRIORITY_DEFAULT: i32 = 0;
/// Priority for high-priority idle sources.
pub const PRIORITY_HIGH_IDLE: i32 = 100;
/// Default idle priority.
pub const PRIORITY_DEFAULT_IDLE: i32 = 200;
/// Priority for very low priority background sources.
pub const PRIORITY_LOW: i32 = 300;

/// Result of a foreign `query` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResult {
    /// Number of descriptors the context needs polled. May exceed the
    /// buffer it was given, in which case nothing useful was written.
    pub n_fds: usize,
    /// Milliseconds until the context next needs attention; negative means
    /// no timeout.
    pub timeout_ms: i32,
}

/// A priority-ordered, descriptor-pollable main context with discrete
/// prepare/query/check/dispatch stages.
///
/// All calls are made from the main thread. `dispatch` may re-enter the
/// bridge.
pub trait ForeignContext {
    /// Try to become the owner of the context. Non-blocking.
    fn acquire(&self) -> bool;

    /// Give up ownership obtained with `acquire`.
    fn release(&self);

    /// Start an iteration. Returns the priority of the most urgent ready
    /// source, or `i32::MAX` when none is ready.
    fn prepare(&self) -> i32;

    /// Fill `fds` with the descriptors to poll for sources at or above
    /// `max_priority`. Idempotent without an intervening `dispatch`.
    fn query(&self, max_priority: i32, fds: &mut [PollDescriptor]) -> QueryResult;

    /// Given poll results, report whether any source is ready to dispatch.
    fn check(&self, max_priority: i32, fds: &[PollDescriptor]) -> bool;

    /// Run all ready callbacks.
    fn dispatch(&self);

    /// The context's default blocking-poll primitive.
    fn poll_func(&self) -> Arc<dyn PollFunc> {
        Arc::new(SystemPoll)
    }
}

/// Wraps a [`ForeignContext`] with the buffer management the bridge needs.
pub struct ForeignLoopAdapter {
    context: Box<dyn ForeignContext>,
    poll_func: Arc<dyn PollFunc>,
}

impl ForeignLoopAdapter {
    /// Wrap a context, polling with its own default primitive.
    pub fn new(context: Box<dyn ForeignContext>) -> Self {
        let poll_func = context.poll_func();
        Self { context, poll_func }
    }

    /// Wrap a context with a replacement poll primitive.
    pub fn with_poll_func(context: Box<dyn ForeignContext>, poll_func: Arc<dyn PollFunc>) -> Self {
        Self { context, poll_func }
    }

    /// The poll primitive, shareable with the select thread.
    pub fn poll_func(&self) -> Arc<dyn PollFunc> {
        self.poll_func.clone()
    }

    pub fn acquire(&self) -> bool {
        self.context.acquire()
    }

    pub fn release(&self) {
        self.context.release()
    }

    pub fn prepare(&self) -> i32 {
        self.context.prepare()
    }

    /// Query into `set`, growing it until the context's descriptors fit.
    ///
    /// Returns the context's timeout in milliseconds.
    pub fn query(&self, max_priority: i32, set: &mut PollSet) -> i32 {
        loop {
            let result = self.context.query(max_priority, set.buffer_mut());
            if result.n_fds <= set.capacity() {
                set.set_len(result.n_fds);
                return result.timeout_ms;
            }
            trace!(
                "ForeignLoopAdapter: growing poll buffer {} -> {}",
                set.capacity(),
                result.n_fds
            );
            set.grow_to(result.n_fds);
        }
    }

    pub fn check(&self, max_priority: i32, set: &PollSet) -> bool {
        self.context.check(max_priority, set.as_slice())
    }

    pub fn dispatch(&self) {
        self.context.dispatch()
    }

    /// Run the default poll primitive over `fds`.
    pub fn default_poll(&self, fds: &mut [PollDescriptor], timeout_ms: i32) -> i32 {
        self.poll_func.poll(fds, timeout_ms)
    }
}
