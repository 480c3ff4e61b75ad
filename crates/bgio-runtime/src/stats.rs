//! Coordinator counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the coordinator components
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub(crate) events_dispatched: AtomicU64,
    pub(crate) fetches_started: AtomicU64,
    pub(crate) fetches_skipped: AtomicU64,
    pub(crate) fetch_timeouts: AtomicU64,
    pub(crate) handles_released: AtomicU64,
    pub(crate) watchdog_stops: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_dispatched: u64,
    pub fetches_started: u64,
    pub fetches_skipped: u64,
    pub fetch_timeouts: u64,
    pub handles_released: u64,
    pub watchdog_stops: u64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_skipped: self.fetches_skipped.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            handles_released: self.handles_released.load(Ordering::Relaxed),
            watchdog_stops: self.watchdog_stops.load(Ordering::Relaxed),
        }
    }
}
