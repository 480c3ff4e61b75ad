//! Background I/O Lifecycle Runtime
//!
//! Coordinates a chat engine's network I/O with the OS application
//! lifecycle:
//! - `EventDispatchLoop`: worker thread draining the engine's event emitter
//! - `WakeGate`: collapses bursts of wake triggers into one fetch
//! - `BackgroundFetchCoordinator`: bounded fetch under a background grant
//! - `BackgroundTaskBudget`: stops I/O before the OS suspends the app
//! - `LifecycleCoordinator`: the actor serializing all of the above
//!
//! Collaborator interfaces and configuration live in `bgio-core`.

pub mod budget;
pub mod builder;
pub mod coordinator;
pub mod dispatch;
pub mod fetch;
pub mod gate;
pub mod grant;
pub mod io;
pub mod phase;
pub mod router;
pub mod stats;

pub use budget::{BackgroundTaskBudget, BudgetState, WatchExit};
pub use builder::{CoordinatorBuilder, CoordinatorHandle, FetchTicket};
pub use coordinator::{LifecycleCommand, LifecycleCoordinator};
pub use dispatch::{DispatchSummary, EventDispatchLoop, EventHandler, ExitReason};
pub use fetch::{BackgroundFetchCoordinator, FetchDeps, FetchRendezvous, FetchSignal, FetchWindow};
pub use gate::{WakeGate, WakeGateStats};
pub use grant::{
    BackgroundTaskHandle, GrantReturn, HandleOwner, ReturnedGrant, SettledHook, TaskBroker,
};
pub use io::{ForegroundTransition, IoController};
pub use phase::PhaseTracker;
pub use router::EventRouter;
pub use stats::{CoordinatorStats, StatsSnapshot};

// Re-export core types for convenience
pub use bgio_core::{
    AppPhase, Engine, EventEmitter, EventKind, EventRecord, FetchOutcome, IoState,
    LifecycleConfig, LifecycleError, LifecycleResult, WakeSource,
};
