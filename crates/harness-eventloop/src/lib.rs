//! # Harness Event Loop
//!
//! Runs a priority-ordered, descriptor-pollable main context (GLib style:
//! prepare, query, check, dispatch) inside an observer-driven host run loop
//! (CFRunLoop style) on one main thread, without porting either loop's
//! sources to the other.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                         Host run loop (main thread)                   │
//! │  Entry → BeforeTimers → BeforeSources → BeforeWaiting ┄┄ sleep ┄┄     │
//! │                                   │            │       AfterWaiting → │
//! │                                   │            │            │    Exit │
//! └───────────────────────────────────┼────────────┼────────────┼─────────┘
//!                                     │ observer   │            │
//! ┌───────────────────────────────────▼────────────▼────────────▼─────────┐
//! │  LoopBridge                                                           │
//! │    prepare/query/probe     start_poll ──────┐   collect/check/dispatch│
//! └──────────────┬──────────────────────────────┼─────────────────────────┘
//!                │                              │ PollSet (copied)
//! ┌──────────────▼───────────────┐   ┌──────────▼────────────────────────┐
//! │  ForeignLoopAdapter          │   │  SelectWorker (select thread)     │
//! │    ForeignContext + PollSet  │   │    blocking poll + wakeup pipe    │
//! └──────────────────────────────┘   │    wakes host loop on completion  │
//!                                    └───────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`LoopBridge`]: Phase observer driving the foreign context
//! - [`SelectWorker`]: Background thread for blocking polls
//! - [`ForeignLoopAdapter`]: Foreign stages plus query buffer growth
//! - [`PollSet`]: Descriptor buffer exchanged with the foreign context
//! - [`HostLoop`] / [`ForeignContext`]: The two collaborator traits
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use harness_eventloop::{BridgeConfig, ForeignContext, HostLoop, LoopBridge};
//!
//! fn attach(host: Rc<dyn HostLoop>, context: Box<dyn ForeignContext>) {
//!     let _bridge = LoopBridge::builder()
//!         .config(BridgeConfig::default())
//!         .install(host, context)
//!         .expect("valid config");
//!     // Keep the bridge alive for as long as the host loop runs.
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod foreign;
pub mod host;
pub mod metrics;
pub mod observer;
pub mod phase;
pub mod poll;
pub mod poll_set;
pub mod select_worker;
pub mod wakeup;

// Re-exports
pub use bridge::{LoopBridge, LoopBridgeBuilder};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use foreign::{
    ForeignContext, ForeignLoopAdapter, QueryResult, PRIORITY_DEFAULT, PRIORITY_DEFAULT_IDLE,
    PRIORITY_HIGH, PRIORITY_HIGH_IDLE, PRIORITY_LOW,
};
pub use host::{HostLoop, HostWaker, TimerToken};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use observer::RunLoopObserver;
pub use phase::RunLoopPhase;
pub use poll::{PollFunc, SystemPoll};
pub use poll_set::{
    requests_equal, PollDescriptor, PollSet, DEFAULT_POLL_CAPACITY, POLL_ERR, POLL_HUP, POLL_IN,
    POLL_NVAL, POLL_OUT, POLL_PRI,
};
pub use select_worker::{
    PollStart, SelectThreadState, SelectWorker, StdThreadSpawner, ThreadSpawner,
};
pub use wakeup::WakeupPipe;
