//! Run loop observer definitions.
//!
//! Observers are notified at specific phases of the host run loop,
//! similar to CFRunLoopObserver.

use crate::phase::RunLoopPhase;

/// Run loop observer trait.
///
/// Called on the host loop's thread, once per observed phase.
pub trait RunLoopObserver {
    /// Get the activity mask (which phases to observe).
    /// Use RunLoopPhase::ALL to observe all phases.
    fn activities(&self) -> u32 {
        RunLoopPhase::ALL
    }

    /// Called when the observed phase is triggered.
    fn on_phase(&self, phase: RunLoopPhase);
}
