//! Switchable reachability

use bgio_core::NetworkMonitor;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reachability flag tests can flip
#[derive(Debug)]
pub struct MockNetwork {
    reachable: AtomicBool,
}

impl MockNetwork {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for MockNetwork {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
