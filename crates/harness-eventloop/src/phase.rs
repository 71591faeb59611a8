//! Host run loop phase definitions.
//!
//! Mirrors CFRunLoopActivity: the host loop reports each of these points
//! in its cycle to registered observers, in order, once per iteration.

use serde::{Deserialize, Serialize};

/// Host run loop activity.
///
/// Corresponds to CFRunLoopActivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RunLoopPhase {
    /// Entering the run loop (kCFRunLoopEntry).
    Entry = 1 << 0,

    /// About to process timers (kCFRunLoopBeforeTimers).
    BeforeTimers = 1 << 1,

    /// About to process sources (kCFRunLoopBeforeSources).
    BeforeSources = 1 << 2,

    /// About to sleep (kCFRunLoopBeforeWaiting).
    BeforeWaiting = 1 << 5,

    /// Just woke up from sleep (kCFRunLoopAfterWaiting).
    AfterWaiting = 1 << 6,

    /// Exiting the run loop (kCFRunLoopExit).
    Exit = 1 << 7,
}

impl RunLoopPhase {
    /// All phases as a bitmask.
    pub const ALL: u32 = Self::Entry as u32
        | Self::BeforeTimers as u32
        | Self::BeforeSources as u32
        | Self::BeforeWaiting as u32
        | Self::AfterWaiting as u32
        | Self::Exit as u32;

    /// Check if this phase is included in the given activity mask.
    pub fn matches(&self, activities: u32) -> bool {
        (activities & (*self as u32)) != 0
    }
}

impl std::fmt::Display for RunLoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunLoopPhase::Entry => write!(f, "entry"),
            RunLoopPhase::BeforeTimers => write!(f, "before_timers"),
            RunLoopPhase::BeforeSources => write!(f, "before_sources"),
            RunLoopPhase::BeforeWaiting => write!(f, "before_waiting"),
            RunLoopPhase::AfterWaiting => write!(f, "after_waiting"),
            RunLoopPhase::Exit => write!(f, "exit"),
        }
    }
}
