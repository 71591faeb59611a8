//! The host run loop collaborator.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::observer::RunLoopObserver;

/// Handle to a one-shot timer armed on the host loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// Thread-safe wakeup handle for the host loop.
///
/// The select thread uses this to break the host loop out of its wait.
pub trait HostWaker: Send + Sync {
    /// Force the host loop out of a blocked wait.
    fn wake_up(&self);
}

/// An observer-driven host run loop.
///
/// Every method is called from the loop's own thread.
pub trait HostLoop {
    /// Register an observer for phase notifications.
    fn add_observer(&self, observer: Rc<dyn RunLoopObserver>);

    /// Handle that can wake this loop from any thread.
    fn waker(&self) -> Arc<dyn HostWaker>;

    /// Force an immediate wakeup rather than sleeping.
    fn wake_up(&self) {
        self.waker().wake_up()
    }

    /// Arm a one-shot timer that fires (and wakes the loop) after `delay`.
    fn add_timer(&self, delay: Duration) -> TimerToken;

    /// Remove a timer armed with `add_timer`, fired or not.
    fn remove_timer(&self, token: TimerToken);
}
