//! Engine collaborator interface
//!
//! The mail/crypto engine owns its network threads. The coordinator only
//! starts and stops them, passes connectivity hints, runs bounded background
//! fetches and drains the engine's event emitter.

use crate::event::EventRecord;
use core::time::Duration;
use std::sync::Arc;

/// Calls the coordinator makes into the engine.
///
/// `start_io`/`stop_io` are idempotent and only schedule the change; they do
/// not report failure; connectivity problems surface later as events.
/// `stop_io` guarantees that at least one terminal event is emitted, which is
/// what unblocks a pending [`EventEmitter::next_event`].
pub trait Engine: Send + Sync {
    fn start_io(&self);

    fn stop_io(&self);

    /// Hint that the network may be usable again. Never call on the UI thread.
    fn maybe_network(&self);

    /// Hint that the network went away. Never call on the UI thread.
    fn maybe_network_lost(&self);

    /// Emitter for the engine's event stream
    fn event_emitter(&self) -> Arc<dyn EventEmitter>;

    /// Run a bounded fetch, blocking up to `timeout`.
    ///
    /// Returns `true` when the engine finished cleanly within the timeout.
    fn background_fetch(&self, timeout: Duration) -> bool;
}

/// Blocking pull side of the engine's event stream
pub trait EventEmitter: Send + Sync {
    /// Block until the next event.
    ///
    /// Returns `None` only once the emitter is finished for good.
    fn next_event(&self) -> Option<EventRecord>;
}
