//! Controllable time sources

use bgio_core::{TimeSource, Timestamp};
use core::time::Duration;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::time::Instant;

// ----------------------------------------------------------------------------
// Manual Clock
// ----------------------------------------------------------------------------

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    current_time: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a new clock starting at time 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new clock starting at a specific time
    pub fn new_at(start_millis: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.current_time
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Tokio Clock
// ----------------------------------------------------------------------------

/// Timestamps that follow tokio's clock.
///
/// With `tokio::time::pause` the timestamps advance exactly as the paused
/// runtime clock does, which keeps wake-window decisions in step with the
/// coordinator's sleeps and timeouts.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: Timestamp,
    origin: Instant,
}

impl TokioClock {
    pub fn new(base: Timestamp) -> Self {
        Self {
            base,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new(Timestamp::new(1_700_000_000_000))
    }
}

impl TimeSource for TokioClock {
    fn now(&self) -> Timestamp {
        self.base + self.origin.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new_at(5);
        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now().as_millis(), 15);
        clock.set_millis(1);
        assert_eq!(clock.now().as_millis(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new(Timestamp::new(1_000));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(clock.now().as_millis(), 4_000);
    }
}
