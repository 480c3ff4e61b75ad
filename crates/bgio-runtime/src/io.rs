//! Engine I/O Switch
//!
//! Idempotent start/stop of the engine's network I/O, mirrored into the
//! persisted shared state so cooperating processes see the app's intent.

use bgio_core::{Engine, IoState, NetworkMonitor, StateStore, TimeSource, Timestamp};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of [`IoController::enter_foreground`]
#[derive(Debug)]
pub struct ForegroundTransition {
    /// I/O was stopped and has now been started
    pub started: bool,
    /// Reachability probe running on a blocking worker, if the network was up
    pub probe: Option<JoinHandle<()>>,
}

/// Owns the engine's `Stopped`/`Running` I/O state
pub struct IoController {
    engine: Arc<dyn Engine>,
    network: Arc<dyn NetworkMonitor>,
    store: Arc<dyn StateStore>,
    time_source: Arc<dyn TimeSource>,
    state: Mutex<IoState>,
    /// Set by `force_stop`; no start is honoured afterwards
    shut_down: AtomicBool,
    background_since: Mutex<Option<Timestamp>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl IoController {
    pub fn new(
        engine: Arc<dyn Engine>,
        network: Arc<dyn NetworkMonitor>,
        store: Arc<dyn StateStore>,
        time_source: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            engine,
            network,
            store,
            time_source,
            state: Mutex::new(IoState::Stopped),
            shut_down: AtomicBool::new(false),
            background_since: Mutex::new(None),
        }
    }

    pub fn state(&self) -> IoState {
        *lock(&self.state)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Start I/O unless it is already running; returns whether it started
    pub fn start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.is_running() {
            return false;
        }
        if self.is_shut_down() {
            debug!("Ignoring I/O start after shutdown");
            return false;
        }
        self.engine.start_io();
        *state = IoState::Running;
        drop(state);

        self.persist(true);
        info!("Engine I/O started");
        true
    }

    /// Stop I/O if it is running; returns whether it stopped
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.is_running() {
            return false;
        }
        self.engine.stop_io();
        *state = IoState::Stopped;
        drop(state);

        self.persist(false);
        info!("Engine I/O stopped");
        true
    }

    /// Stop I/O regardless of the tracked state and refuse later starts.
    ///
    /// The engine emits a terminal event on every stop, which is what
    /// unblocks a dispatch worker waiting on the emitter.
    pub fn force_stop(&self) {
        let mut state = lock(&self.state);
        self.shut_down.store(true, Ordering::SeqCst);
        self.engine.stop_io();
        *state = IoState::Stopped;
        drop(state);

        self.persist(false);
        debug!("Engine I/O force-stopped");
    }

    /// Resume I/O and nudge the engine if the network is reachable
    pub fn enter_foreground(&self) -> ForegroundTransition {
        *lock(&self.background_since) = None;
        let started = self.start();
        let probe = self.network.is_reachable().then(|| self.network_hint(true));
        ForegroundTransition { started, probe }
    }

    /// Remember when the app left the foreground; I/O keeps running
    pub fn enter_background(&self) -> Timestamp {
        let now = self.time_source.now();
        *lock(&self.background_since) = Some(now);
        debug!(at = %now, io = ?self.state(), "App entered background");
        now
    }

    pub fn background_since(&self) -> Option<Timestamp> {
        *lock(&self.background_since)
    }

    /// Forward a reachability change to the engine on a blocking worker
    pub fn network_hint(&self, reachable: bool) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            if reachable {
                engine.maybe_network();
            } else {
                engine.maybe_network_lost();
            }
        })
    }

    fn persist(&self, running: bool) {
        if let Err(e) = self.store.set_io_running(running) {
            warn!(error = %e, running, "Failed to persist I/O flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgio_core::MemoryStateStore;
    use bgio_harness::{ManualClock, MockEngine, MockNetwork};

    struct Fixture {
        engine: Arc<MockEngine>,
        network: Arc<MockNetwork>,
        store: Arc<MemoryStateStore>,
        io: IoController,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(MockEngine::default());
        let network = Arc::new(MockNetwork::new(true));
        let store = Arc::new(MemoryStateStore::new());
        let io = IoController::new(
            engine.clone(),
            network.clone(),
            store.clone(),
            Arc::new(ManualClock::new_at(42)),
        );
        Fixture {
            engine,
            network,
            store,
            io,
        }
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let f = fixture();

        assert!(f.io.start());
        assert!(!f.io.start());
        assert_eq!(f.engine.start_io_calls(), 1);
        assert!(f.store.is_io_running());

        assert!(f.io.stop());
        assert!(!f.io.stop());
        assert_eq!(f.engine.stop_io_calls(), 1);
        assert!(!f.store.is_io_running());
        assert_eq!(f.io.state(), IoState::Stopped);
    }

    #[test]
    fn test_force_stop_always_reaches_engine() {
        let f = fixture();
        f.io.start();
        f.io.force_stop();
        f.io.force_stop();
        assert_eq!(f.engine.stop_io_calls(), 2);

        assert!(f.io.is_shut_down());
        assert!(!f.io.start());
        assert_eq!(f.engine.start_io_calls(), 1);
        assert_eq!(f.io.state(), IoState::Stopped);
        assert!(!f.store.is_io_running());
    }

    #[tokio::test]
    async fn test_foreground_probes_reachable_network() {
        let f = fixture();
        f.io.enter_background();
        assert_eq!(f.io.background_since(), Some(Timestamp::new(42)));

        let transition = f.io.enter_foreground();
        assert!(transition.started);
        transition.probe.unwrap().await.unwrap();
        assert_eq!(f.engine.maybe_network_calls(), 1);
        assert_eq!(f.io.background_since(), None);

        f.network.set_reachable(false);
        let transition = f.io.enter_foreground();
        assert!(!transition.started);
        assert!(transition.probe.is_none());
        assert_eq!(f.engine.start_io_calls(), 1);
    }

    #[tokio::test]
    async fn test_network_lost_hint() {
        let f = fixture();
        f.io.network_hint(false).await.unwrap();
        assert_eq!(f.engine.maybe_network_lost_calls(), 1);
        assert_eq!(f.engine.maybe_network_calls(), 0);
    }
}
