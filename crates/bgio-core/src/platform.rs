//! OS collaborators
//!
//! Background execution grants, network reachability and the UI-facing
//! dispatch sink.

use crate::event::{DispatchKey, EventRecord};
use crate::types::TaskToken;
use core::time::Duration;

/// Callback the OS invokes shortly before a background grant expires
pub type ExpirationCallback = Box<dyn FnOnce() + Send + 'static>;

/// Background execution grants
///
/// Every token returned by [`begin_background_task`](Self::begin_background_task)
/// must be passed to [`end_background_task`](Self::end_background_task) exactly
/// once.
pub trait BackgroundScheduler: Send + Sync {
    fn begin_background_task(&self, on_expire: ExpirationCallback) -> TaskToken;

    fn end_background_task(&self, token: TaskToken);

    /// Remaining background execution time the OS will grant
    fn background_time_remaining(&self) -> Duration;
}

/// Reachability of the network
pub trait NetworkMonitor: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Monitor that always reports the network as reachable
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl NetworkMonitor for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// UI-facing consumer of drained events
pub trait DispatchSink: Send + Sync {
    fn dispatch(&self, key: DispatchKey, event: &EventRecord);
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DispatchSink for NullSink {
    fn dispatch(&self, _key: DispatchKey, _event: &EventRecord) {}
}
