//! Foreground/background tracking

use bgio_core::AppPhase;
use tokio::sync::watch;

/// Current application phase, observable by the watchdog and fetch workers
#[derive(Debug)]
pub struct PhaseTracker {
    tx: watch::Sender<AppPhase>,
}

impl PhaseTracker {
    pub fn new(initial: AppPhase) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Update the phase; returns whether it changed
    pub fn set(&self, phase: AppPhase) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        })
    }

    pub fn current(&self) -> AppPhase {
        *self.tx.borrow()
    }

    pub fn is_foreground(&self) -> bool {
        self.current().is_foreground()
    }

    /// Receiver notified on every phase change
    pub fn subscribe(&self) -> watch::Receiver<AppPhase> {
        self.tx.subscribe()
    }
}
