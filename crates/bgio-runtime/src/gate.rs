//! Wake Deduplication
//!
//! Coalesces bursts of wake triggers (push, OS fetch, reachability) into a
//! single fetch by remembering when the last trigger was accepted.

use bgio_core::{StateConfig, StateStore, Timestamp, WakeEvent, WakeLogEntry};
use core::time::Duration;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use tracing::{debug, trace, warn};

/// Last accepted trigger and the window it opens
#[derive(Debug, Clone, Copy)]
struct WakeWindow {
    last_accepted: Option<Timestamp>,
    window: Duration,
}

impl WakeWindow {
    fn admits(&self, at: Timestamp) -> bool {
        match self.last_accepted {
            None => true,
            Some(last) => at >= last + self.window,
        }
    }

    /// Move the window start forward, never backward
    fn stamp(&mut self, at: Timestamp) {
        self.last_accepted = Some(self.last_accepted.map_or(at, |last| last.max(at)));
    }
}

/// Counters for gate decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeGateStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Accepts at most one wake trigger per window
#[derive(Debug)]
pub struct WakeGate {
    state: Mutex<WakeWindow>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl WakeGate {
    pub fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(WakeWindow {
                last_accepted: None,
                window,
            }),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Decide whether `event` should trigger work.
    ///
    /// The first trigger ever is accepted; later ones only once the window
    /// since the last accepted trigger has fully elapsed.
    pub fn accept(&self, event: WakeEvent) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.admits(event.timestamp) {
            state.last_accepted = Some(event.timestamp);
            self.accepted.fetch_add(1, Ordering::Relaxed);
            debug!(source = %event.source, at = %event.timestamp, "Wake accepted");
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(
                source = %event.source,
                at = %event.timestamp,
                last = ?state.last_accepted,
                "Wake rejected inside window"
            );
            false
        }
    }

    /// Record a lifecycle transition as recent activity without gating it
    pub fn observe(&self, event: WakeEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.stamp(event.timestamp);
        trace!(source = %event.source, at = %event.timestamp, "Wake observed");
    }

    pub fn last_accepted(&self) -> Option<Timestamp> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_accepted
    }

    pub fn stats(&self) -> WakeGateStats {
        WakeGateStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Append `event` to the persisted diagnostic wake log
pub(crate) fn record_wake(
    store: &dyn StateStore,
    config: &StateConfig,
    event: WakeEvent,
    accepted: bool,
) {
    let entry = WakeLogEntry {
        timestamp: event.timestamp,
        source: event.source,
        accepted,
    };
    if let Err(e) = store.record_wake(
        entry,
        event.timestamp,
        config.wake_log_retention(),
        config.wake_log_capacity,
    ) {
        warn!(error = %e, source = %event.source, "Failed to record wake");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgio_core::WakeSource;
    use proptest::prelude::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn push_at(secs: u64) -> WakeEvent {
        WakeEvent::new(WakeSource::RemotePush, Timestamp::new(secs * 1000))
    }

    #[test]
    fn test_window_sequence() {
        let gate = WakeGate::new(WINDOW);
        let decisions: Vec<bool> = [0, 10, 30, 65]
            .into_iter()
            .map(|t| gate.accept(push_at(t)))
            .collect();

        assert_eq!(decisions, vec![true, false, false, true]);
        assert_eq!(gate.last_accepted(), Some(Timestamp::new(65_000)));
        assert_eq!(
            gate.stats(),
            WakeGateStats {
                accepted: 2,
                rejected: 2
            }
        );
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let gate = WakeGate::new(WINDOW);
        assert!(gate.accept(push_at(0)));
        assert!(!gate.accept(WakeEvent::new(
            WakeSource::LocalFetch,
            Timestamp::new(59_999)
        )));
        assert!(gate.accept(push_at(60)));
    }

    #[test]
    fn test_observe_suppresses_following_trigger() {
        let gate = WakeGate::new(WINDOW);
        gate.observe(WakeEvent::new(
            WakeSource::BackgroundEnter,
            Timestamp::new(100_000),
        ));
        assert!(!gate.accept(push_at(130)));
        assert!(gate.accept(push_at(160)));
    }

    #[test]
    fn test_observe_never_moves_backward() {
        let gate = WakeGate::new(WINDOW);
        assert!(gate.accept(push_at(100)));
        gate.observe(WakeEvent::new(
            WakeSource::ForegroundEnter,
            Timestamp::new(10_000),
        ));
        assert_eq!(gate.last_accepted(), Some(Timestamp::new(100_000)));
    }

    proptest! {
        #[test]
        fn prop_accepted_triggers_are_a_window_apart(
            mut times in proptest::collection::vec(0u64..600_000, 1..64)
        ) {
            times.sort_unstable();
            let gate = WakeGate::new(WINDOW);
            let window_ms = WINDOW.as_millis() as u64;
            let mut last: Option<u64> = None;

            for t in times {
                let accepted = gate.accept(WakeEvent::new(
                    WakeSource::RemotePush,
                    Timestamp::new(t),
                ));
                match last {
                    None => prop_assert!(accepted),
                    Some(prev) => prop_assert_eq!(accepted, t >= prev + window_ms),
                }
                if accepted {
                    last = Some(t);
                }
            }
        }
    }
}
