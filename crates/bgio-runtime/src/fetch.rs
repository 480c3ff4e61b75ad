//! Background Fetch Coordinator
//!
//! Runs one bounded fetch per accepted wake trigger while a background grant
//! is held:
//! 1. skip when a fetch window is already open, the app is in the
//!    foreground, a peer process claims the engine, or the wake gate rejects
//!    the trigger,
//! 2. start I/O and run the engine's bounded fetch,
//! 3. stop I/O again unless the app came to the foreground meanwhile,
//! 4. wait (bounded) for the engine's fetch-done event to be dispatched,
//! 5. give UI updates a short grace period, then release the grant.
//!
//! OS expiration of the grant short-circuits everything and reports new data.
//! Under the coordinator the last step is a hand-back instead of a release:
//! the app may have come to the foreground and left again after step 3, in
//! which case the grant has to keep covering the running I/O.

use crate::gate::{record_wake, WakeGate};
use crate::grant::BackgroundTaskHandle;
use crate::io::IoController;
use crate::phase::PhaseTracker;
use crate::stats::CoordinatorStats;
use bgio_core::{
    Engine, FetchConfig, FetchOutcome, StateConfig, StateStore, TimeSource, Timestamp, WakeEvent,
    WakeSource,
};
use core::time::Duration;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Fetch-Done Rendezvous
// ----------------------------------------------------------------------------

/// Signalled by the dispatch worker whenever a fetch-done event passes
#[derive(Debug)]
pub struct FetchRendezvous {
    generation: watch::Sender<u64>,
}

impl Default for FetchRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchRendezvous {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    pub fn signal(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Start listening; only signals after this call count
    pub fn arm(&self) -> FetchSignal {
        let mut rx = self.generation.subscribe();
        rx.borrow_and_update();
        FetchSignal { rx }
    }
}

/// Armed listener returned by [`FetchRendezvous::arm`]
#[derive(Debug)]
pub struct FetchSignal {
    rx: watch::Receiver<u64>,
}

impl FetchSignal {
    /// Whether a signal arrived within `timeout`
    pub async fn wait(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.rx.changed()).await,
            Ok(Ok(()))
        )
    }
}

// ----------------------------------------------------------------------------
// Fetch Window
// ----------------------------------------------------------------------------

/// One bounded fetch attempt
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub id: Uuid,
    pub started_at: Timestamp,
    pub timeout: Duration,
}

/// Clears the open-window flag when the fetch sequence ends
struct WindowGuard<'a> {
    open: &'a AtomicBool,
}

impl<'a> WindowGuard<'a> {
    fn try_open(open: &'a AtomicBool) -> Option<Self> {
        open.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { open })
    }
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// Shared collaborators for [`BackgroundFetchCoordinator`]
pub struct FetchDeps {
    pub engine: Arc<dyn Engine>,
    pub io: Arc<IoController>,
    pub gate: Arc<WakeGate>,
    pub phase: Arc<PhaseTracker>,
    pub store: Arc<dyn StateStore>,
    pub time_source: Arc<dyn TimeSource>,
    pub rendezvous: Arc<FetchRendezvous>,
    pub stats: Arc<CoordinatorStats>,
}

pub struct BackgroundFetchCoordinator {
    deps: FetchDeps,
    config: FetchConfig,
    state_config: StateConfig,
    window_open: AtomicBool,
}

impl BackgroundFetchCoordinator {
    pub fn new(deps: FetchDeps, config: FetchConfig, state_config: StateConfig) -> Self {
        Self {
            deps,
            config,
            state_config,
            window_open: AtomicBool::new(false),
        }
    }

    pub fn is_window_open(&self) -> bool {
        self.window_open.load(Ordering::SeqCst)
    }

    /// Run the fetch sequence for `source` and release `grant` afterwards
    pub async fn run_fetch(&self, grant: BackgroundTaskHandle, source: WakeSource) -> FetchOutcome {
        let outcome = self.fetch_under(&grant, source).await;
        if !grant.release() {
            debug!(%source, "Grant already released by expiration");
        }
        outcome
    }

    /// Run the fetch sequence while `grant` is held, leaving its release to
    /// the caller
    pub async fn fetch_under(
        &self,
        grant: &BackgroundTaskHandle,
        source: WakeSource,
    ) -> FetchOutcome {
        let event = WakeEvent::new(source, self.deps.time_source.now());

        let Some(_window) = WindowGuard::try_open(&self.window_open) else {
            return self.skip(event, "fetch window already open");
        };
        if self.deps.phase.is_foreground() {
            return self.skip(event, "app is in the foreground");
        }
        if self.deps.store.is_peer_fetching(event.timestamp) {
            return self.skip(event, "peer process is fetching");
        }
        let accepted = self.deps.gate.accept(event);
        record_wake(self.deps.store.as_ref(), &self.state_config, event, accepted);
        if !accepted {
            CoordinatorStats::bump(&self.deps.stats.fetches_skipped);
            debug!(%source, "Fetch skipped: inside wake window");
            return FetchOutcome::NewData;
        }

        let window = FetchWindow {
            id: Uuid::new_v4(),
            started_at: event.timestamp,
            timeout: self.config.timeout(),
        };
        CoordinatorStats::bump(&self.deps.stats.fetches_started);
        info!(window = %window.id, %source, timeout = ?window.timeout, "Background fetch started");

        tokio::select! {
            outcome = self.fetch_steps(&window) => {
                info!(window = %window.id, ?outcome, "Background fetch finished");
                outcome
            }
            _ = grant.expired() => {
                warn!(window = %window.id, "Background grant expired during fetch");
                self.stop_unless_foreground();
                FetchOutcome::NewData
            }
        }
    }

    async fn fetch_steps(&self, window: &FetchWindow) -> FetchOutcome {
        self.deps.io.start();

        let mut done = self.deps.rendezvous.arm();
        let engine = Arc::clone(&self.deps.engine);
        let timeout = window.timeout;
        let clean = match tokio::task::spawn_blocking(move || engine.background_fetch(timeout)).await
        {
            Ok(clean) => clean,
            Err(e) => {
                warn!(window = %window.id, error = %e, "Background fetch worker failed");
                false
            }
        };

        self.stop_unless_foreground();

        if !done.wait(window.timeout).await {
            CoordinatorStats::bump(&self.deps.stats.fetch_timeouts);
            warn!(window = %window.id, "No fetch-done event within timeout");
        }

        tokio::time::sleep(self.config.flush_grace()).await;

        if clean {
            FetchOutcome::NewData
        } else {
            FetchOutcome::Failed
        }
    }

    fn stop_unless_foreground(&self) {
        if !self.deps.phase.is_foreground() {
            self.deps.io.stop();
        }
    }

    fn skip(&self, event: WakeEvent, reason: &'static str) -> FetchOutcome {
        record_wake(self.deps.store.as_ref(), &self.state_config, event, false);
        CoordinatorStats::bump(&self.deps.stats.fetches_skipped);
        debug!(source = %event.source, reason, "Fetch skipped");
        FetchOutcome::NewData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{HandleOwner, TaskBroker};
    use bgio_core::{AppPhase, MemoryStateStore};
    use bgio_harness::{MockEngine, MockNetwork, MockScheduler, TokioClock};

    struct Fixture {
        engine: Arc<MockEngine>,
        scheduler: Arc<MockScheduler>,
        store: Arc<MemoryStateStore>,
        phase: Arc<PhaseTracker>,
        stats: Arc<CoordinatorStats>,
        rendezvous: Arc<FetchRendezvous>,
        broker: TaskBroker,
        fetch: BackgroundFetchCoordinator,
    }

    fn fixture(engine: MockEngine) -> Fixture {
        let engine = Arc::new(engine);
        let scheduler = Arc::new(MockScheduler::default());
        let store = Arc::new(MemoryStateStore::new());
        let phase = Arc::new(PhaseTracker::new(AppPhase::Background));
        let stats = Arc::new(CoordinatorStats::new());
        let rendezvous = Arc::new(FetchRendezvous::new());
        let clock: Arc<dyn TimeSource> = Arc::new(TokioClock::default());
        let io = Arc::new(IoController::new(
            engine.clone(),
            Arc::new(MockNetwork::default()),
            store.clone(),
            clock.clone(),
        ));
        let broker = TaskBroker::new(scheduler.clone(), clock.clone(), stats.clone());
        let fetch = BackgroundFetchCoordinator::new(
            FetchDeps {
                engine: engine.clone(),
                io,
                gate: Arc::new(WakeGate::new(Duration::from_secs(60))),
                phase: phase.clone(),
                store: store.clone(),
                time_source: clock,
                rendezvous: rendezvous.clone(),
                stats: stats.clone(),
            },
            FetchConfig {
                timeout_secs: 20,
                flush_grace_ms: 1000,
            },
            StateConfig::default(),
        );
        Fixture {
            engine,
            scheduler,
            store,
            phase,
            stats,
            rendezvous,
            broker,
            fetch,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_done_signal_is_bounded() {
        let f = fixture(MockEngine::new(bgio_harness::MockEngineConfig::silent()));
        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = f.fetch.run_fetch(grant, WakeSource::RemotePush).await;
        let elapsed = started.elapsed();

        // Rendezvous timeout plus flush grace; the engine fetch itself is instant
        assert!(elapsed >= Duration::from_secs(21), "elapsed {elapsed:?}");
        assert!(
            elapsed <= Duration::from_secs(21) + Duration::from_millis(50),
            "elapsed {elapsed:?}"
        );
        assert_eq!(outcome, FetchOutcome::NewData);
        assert_eq!(f.engine.background_fetch_calls(), 1);
        assert!(!f.engine.is_io_running());
        assert_eq!(f.stats.snapshot().fetch_timeouts, 1);
        assert!(f.scheduler.is_balanced());
        assert!(!f.fetch.is_window_open());
    }

    #[tokio::test]
    async fn test_done_signal_ends_wait() {
        let f = fixture(MockEngine::default());
        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();

        // Stand in for the dispatch worker
        let emitter = f.engine.emitter();
        let rendezvous = f.rendezvous.clone();
        std::thread::spawn(move || {
            use bgio_core::{EventEmitter, EventKind};
            while let Some(event) = emitter.next_event() {
                if event.kind == EventKind::BackgroundFetchDone {
                    rendezvous.signal();
                    return;
                }
            }
        });

        let outcome = f.fetch.run_fetch(grant, WakeSource::LocalFetch).await;
        assert_eq!(outcome, FetchOutcome::NewData);
        assert_eq!(f.stats.snapshot().fetch_timeouts, 0);
        assert_eq!(f.stats.snapshot().fetches_started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_cuts_wait_short() {
        let f = Arc::new(fixture(MockEngine::new(
            bgio_harness::MockEngineConfig::silent(),
        )));
        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();
        let token = grant.token();

        let started = tokio::time::Instant::now();
        let running = Arc::clone(&f);
        let fetch = tokio::spawn(async move {
            running.fetch.run_fetch(grant, WakeSource::RemotePush).await
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(f.scheduler.expire(token));
        let outcome = fetch.await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome, FetchOutcome::NewData);
        assert!(elapsed < Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(!f.engine.is_io_running());
        assert_eq!(f.scheduler.end_count_for(token), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_reports_failure() {
        let f = fixture(MockEngine::new(bgio_harness::MockEngineConfig::failing()));
        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();
        let outcome = f.fetch.run_fetch(grant, WakeSource::RemotePush).await;
        assert_eq!(outcome, FetchOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_skips_fetch() {
        let f = fixture(MockEngine::default());
        f.phase.set(AppPhase::Foreground);
        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();

        let outcome = f.fetch.run_fetch(grant, WakeSource::RemotePush).await;
        assert_eq!(outcome, FetchOutcome::NewData);
        assert_eq!(f.engine.background_fetch_calls(), 0);
        assert_eq!(f.stats.snapshot().fetches_skipped, 1);
        assert!(f.scheduler.is_balanced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_claim_blocks_until_it_expires() {
        let f = fixture(MockEngine::new(bgio_harness::MockEngineConfig::silent()));
        let now = TokioClock::default().now();
        f.store.claim_peer_fetch(now, Duration::from_secs(26)).unwrap();

        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();
        f.fetch.run_fetch(grant, WakeSource::RemotePush).await;
        assert_eq!(f.engine.background_fetch_calls(), 0);

        tokio::time::sleep(Duration::from_secs(27)).await;
        let grant = f.broker.acquire(HandleOwner::Fetch).unwrap();
        f.fetch.run_fetch(grant, WakeSource::RemotePush).await;
        assert_eq!(f.engine.background_fetch_calls(), 1);

        let log = f.store.snapshot().wake_log;
        assert_eq!(log.len(), 2);
        assert!(!log[0].accepted);
        assert!(log[1].accepted);
    }
}
