//! Background I/O Lifecycle Core
//!
//! Foundational types for coordinating a chat engine's network I/O with the
//! OS application lifecycle:
//! - lifecycle states, wake triggers and engine event records,
//! - the collaborator interfaces the coordinator drives (engine, OS
//!   background scheduler, reachability, UI dispatch sink),
//! - configuration, errors and the persisted state shared with peer processes.
//!
//! The coordinator itself lives in `bgio-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod engine;
pub mod errors;
pub mod event;
pub mod persist;
pub mod platform;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    BudgetConfig, ChannelConfig, DispatchConfig, FetchConfig, LifecycleConfig, StateConfig,
    WakeConfig,
};
pub use engine::{Engine, EventEmitter};
pub use errors::{LifecycleError, LifecycleResult};
pub use event::{DispatchKey, EventKind, EventRecord};
pub use persist::{FileStateStore, MemoryStateStore, SharedState, StateStore, WakeLogEntry};
pub use platform::{
    AlwaysReachable, BackgroundScheduler, DispatchSink, ExpirationCallback, NetworkMonitor,
    NullSink,
};
pub use types::{
    AppPhase, FetchOutcome, IoState, SystemTimeSource, TaskToken, TimeSource, Timestamp,
    WakeEvent, WakeSource,
};
