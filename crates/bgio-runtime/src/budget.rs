//! Background Budget Watchdog
//!
//! After the app leaves the foreground, I/O keeps running on a background
//! grant. The watchdog polls the OS for the remaining background time and
//! stops I/O once it falls below the threshold, leaving a short grace period
//! for in-flight work before the grant is released.
//!
//! A session that ends while the app may be heading back to the background
//! (foregrounded, or stopped for low time) returns its grant to the
//! coordinator rather than ending it; the coordinator decides whether a fresh
//! session takes it over.

use crate::grant::{BackgroundTaskHandle, GrantReturn};
use crate::io::IoController;
use crate::phase::PhaseTracker;
use crate::stats::CoordinatorStats;
use bgio_core::{BackgroundScheduler, BudgetConfig};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

/// Whether a watch session is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Idle,
    Watching,
}

/// How a watch session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    /// App returned to the foreground; I/O left running
    Foregrounded,
    /// Remaining time dropped below the threshold; I/O stopped
    LowTime,
    /// The OS expired the grant first
    Expired,
    Cancelled,
}

struct WatchContext {
    io: Arc<IoController>,
    scheduler: Arc<dyn BackgroundScheduler>,
    phase: Arc<PhaseTracker>,
    stats: Arc<CoordinatorStats>,
    config: BudgetConfig,
}

struct WatchSession {
    cancel: watch::Sender<bool>,
    /// Set once the session has decided to exit and given up its grant
    done: Arc<AtomicBool>,
    task: JoinHandle<WatchExit>,
}

impl WatchSession {
    fn is_live(&self) -> bool {
        !self.done.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

pub struct BackgroundTaskBudget {
    ctx: Arc<WatchContext>,
    returns: Option<GrantReturn>,
    session: Mutex<Option<WatchSession>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl BackgroundTaskBudget {
    pub fn new(
        io: Arc<IoController>,
        scheduler: Arc<dyn BackgroundScheduler>,
        phase: Arc<PhaseTracker>,
        stats: Arc<CoordinatorStats>,
        config: BudgetConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(WatchContext {
                io,
                scheduler,
                phase,
                stats,
                config,
            }),
            returns: None,
            session: Mutex::new(None),
        }
    }

    /// Send grants of foregrounded and low-time sessions back through `returns`
    pub fn with_returns(mut self, returns: GrantReturn) -> Self {
        self.returns = Some(returns);
        self
    }

    pub fn state(&self) -> BudgetState {
        match lock(&self.session).as_ref() {
            Some(session) if session.is_live() => BudgetState::Watching,
            _ => BudgetState::Idle,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.state() == BudgetState::Watching
    }

    /// Start watching with `handle`; returns `false` if a session is running,
    /// in which case `handle` is released immediately.
    ///
    /// A session that is still winding down after giving up its grant does
    /// not count as running and is superseded.
    pub fn begin(&self, handle: BackgroundTaskHandle) -> bool {
        let mut session = lock(&self.session);
        if session.as_ref().is_some_and(WatchSession::is_live) {
            debug!("Budget watchdog already watching");
            handle.release();
            return false;
        }

        let (cancel, cancelled) = watch::channel(false);
        let done = Arc::new(AtomicBool::new(false));
        let ctx = Arc::clone(&self.ctx);
        let returns = self.returns.clone();
        let session_done = Arc::clone(&done);
        let task = tokio::spawn(async move {
            watch_budget(ctx, handle, cancelled, session_done, returns).await
        });
        *session = Some(WatchSession { cancel, done, task });
        info!("Budget watchdog started");
        true
    }

    /// Stop the current session, waiting for it to release its grant
    pub async fn cancel(&self) -> Option<WatchExit> {
        let session = lock(&self.session).take()?;
        session.cancel.send_replace(true);
        Self::join(session.task).await
    }

    /// Wait for the current session to end on its own
    pub async fn wait_idle(&self) -> Option<WatchExit> {
        let session = lock(&self.session).take()?;
        Self::join(session.task).await
    }

    async fn join(task: JoinHandle<WatchExit>) -> Option<WatchExit> {
        match task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(error = %e, "Budget watchdog task failed");
                None
            }
        }
    }
}

async fn watch_budget(
    ctx: Arc<WatchContext>,
    handle: BackgroundTaskHandle,
    mut cancelled: watch::Receiver<bool>,
    done: Arc<AtomicBool>,
    returns: Option<GrantReturn>,
) -> WatchExit {
    let mut phase = ctx.phase.subscribe();
    let threshold = ctx.config.low_time_threshold();

    let exit = loop {
        if ctx.phase.is_foreground() {
            break WatchExit::Foregrounded;
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.config.poll_interval()) => {}
            _ = handle.expired() => break WatchExit::Expired,
            changed = phase.changed() => {
                if changed.is_err() {
                    break WatchExit::Cancelled;
                }
                continue;
            }
            _ = cancelled.changed() => break WatchExit::Cancelled,
        }

        if ctx.phase.is_foreground() {
            break WatchExit::Foregrounded;
        }

        let remaining = ctx.scheduler.background_time_remaining();
        if remaining >= threshold {
            debug!(?remaining, "Background time sufficient");
            continue;
        }

        info!(?remaining, ?threshold, "Background time low, stopping I/O");
        ctx.io.stop();
        CoordinatorStats::bump(&ctx.stats.watchdog_stops);

        tokio::select! {
            _ = tokio::time::sleep(ctx.config.flush_grace()) => {}
            _ = handle.expired() => {}
            _ = cancelled.changed() => {}
        }
        break WatchExit::LowTime;
    };

    if matches!(exit, WatchExit::Expired | WatchExit::Cancelled) && !ctx.phase.is_foreground() {
        ctx.io.stop();
    }
    done.store(true, Ordering::SeqCst);
    match (returns, exit) {
        (Some(returns), WatchExit::Foregrounded | WatchExit::LowTime) => returns.give_back(handle),
        _ => {
            handle.release();
        }
    }
    info!(?exit, "Budget watchdog finished");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{HandleOwner, TaskBroker};
    use bgio_core::{AppPhase, IoState, MemoryStateStore, StateStore};
    use bgio_harness::{
        CallTrace, MockEngine, MockNetwork, MockScheduler, TokioClock, TracedCall,
    };
    use core::time::Duration;

    struct Fixture {
        trace: CallTrace,
        engine: Arc<MockEngine>,
        scheduler: Arc<MockScheduler>,
        store: Arc<MemoryStateStore>,
        phase: Arc<PhaseTracker>,
        io: Arc<IoController>,
        broker: TaskBroker,
        budget: BackgroundTaskBudget,
    }

    fn fixture(scheduler: MockScheduler) -> Fixture {
        let trace = CallTrace::new();
        let engine = Arc::new(MockEngine::default().with_trace(trace.clone()));
        let scheduler = Arc::new(scheduler.with_trace(trace.clone()));
        let store = Arc::new(MemoryStateStore::new());
        let phase = Arc::new(PhaseTracker::new(AppPhase::Background));
        let stats = Arc::new(CoordinatorStats::new());
        let clock = Arc::new(TokioClock::default());
        let io = Arc::new(IoController::new(
            engine.clone(),
            Arc::new(MockNetwork::default()),
            store.clone(),
            clock.clone(),
        ));
        let broker = TaskBroker::new(scheduler.clone(), clock, stats.clone());
        let budget = BackgroundTaskBudget::new(
            io.clone(),
            scheduler.clone(),
            phase.clone(),
            stats,
            BudgetConfig::default(),
        );
        Fixture {
            trace,
            engine,
            scheduler,
            store,
            phase,
            io,
            broker,
            budget,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_time_stops_io_then_releases() {
        let f = fixture(MockScheduler::with_budget(Duration::from_secs(25)));
        f.io.start();

        let handle = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        let token = handle.token();
        assert!(f.budget.begin(handle));
        assert!(f.budget.is_watching());

        assert_eq!(f.budget.wait_idle().await, Some(WatchExit::LowTime));

        // Polls at 3..15s; 10s remain at 15s, so the stop lands on the 18s poll
        let held = f.scheduler.held_for(token).unwrap();
        assert!(held >= Duration::from_secs(15), "held {held:?}");
        assert!(held <= Duration::from_secs(21), "held {held:?}");
        assert_eq!(f.io.state(), IoState::Stopped);
        assert!(!f.store.is_io_running());
        assert_eq!(f.engine.stop_io_calls(), 1);
        assert!(f.scheduler.is_balanced());
        assert!(f.trace.ended_while_running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_background_stops_io_before_release() {
        let f = fixture(MockScheduler::with_fixed_remaining(Duration::from_secs(120)));
        f.io.start();
        let handle = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        let token = handle.token();
        f.budget.begin(handle);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.budget.cancel().await, Some(WatchExit::Cancelled));

        assert_eq!(f.io.state(), IoState::Stopped);
        let stop = f.trace.position(TracedCall::StopIo).unwrap();
        let end = f.trace.position(TracedCall::EndTask(token)).unwrap();
        assert!(stop < end, "calls: {:?}", f.trace.calls());
        assert!(f.scheduler.is_balanced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foregrounded_session_returns_grant_for_takeover() {
        let f = fixture(MockScheduler::with_fixed_remaining(Duration::from_secs(120)));
        let (returns, mut returned) = GrantReturn::channel();
        let budget = BackgroundTaskBudget::new(
            f.io.clone(),
            f.scheduler.clone(),
            f.phase.clone(),
            Arc::new(CoordinatorStats::new()),
            BudgetConfig::default(),
        )
        .with_returns(returns);
        f.io.start();

        let handle = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        let token = handle.token();
        budget.begin(handle);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Foreground and straight back while the session winds down
        f.phase.set(AppPhase::Foreground);
        let grant = returned.recv().await.unwrap();
        f.phase.set(AppPhase::Background);

        assert!(!budget.is_watching());
        assert!(!grant.handle().is_released());
        assert_eq!(f.scheduler.end_count_for(token), 0);

        let (handle, _) = grant.into_parts();
        assert!(budget.begin(handle));
        assert!(budget.is_watching());

        assert_eq!(budget.cancel().await, Some(WatchExit::Cancelled));
        assert_eq!(f.scheduler.end_count_for(token), 1);
        assert!(f.trace.ended_while_running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_time_stop_is_bounded() {
        let f = fixture(MockScheduler::with_budget(Duration::from_secs(11)));
        let config = BudgetConfig::default();
        f.io.start();
        let handle = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        f.budget.begin(handle);

        let started = tokio::time::Instant::now();
        assert_eq!(f.budget.wait_idle().await, Some(WatchExit::LowTime));

        // First poll already sees less than the threshold
        let elapsed = started.elapsed();
        let bound = config.poll_interval() + config.flush_grace() + Duration::from_millis(50);
        assert!(elapsed <= bound, "elapsed {elapsed:?}");
        assert_eq!(f.io.state(), IoState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_ends_watch_without_stopping() {
        let f = fixture(MockScheduler::with_fixed_remaining(Duration::from_secs(120)));
        f.io.start();
        let handle = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        f.budget.begin(handle);

        tokio::time::sleep(Duration::from_secs(4)).await;
        f.phase.set(AppPhase::Foreground);

        assert_eq!(f.budget.wait_idle().await, Some(WatchExit::Foregrounded));
        assert_eq!(f.io.state(), IoState::Running);
        assert!(f.scheduler.is_balanced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_stops_io() {
        let f = fixture(MockScheduler::with_fixed_remaining(Duration::from_secs(120)));
        f.io.start();
        let handle = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        let token = handle.token();
        f.budget.begin(handle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.scheduler.expire(token));

        assert_eq!(f.budget.wait_idle().await, Some(WatchExit::Expired));
        assert_eq!(f.io.state(), IoState::Stopped);
        assert_eq!(f.scheduler.end_count_for(token), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_begin_is_rejected() {
        let f = fixture(MockScheduler::with_fixed_remaining(Duration::from_secs(120)));
        let first = f.broker.acquire(HandleOwner::Watchdog).unwrap();
        assert!(f.budget.begin(first));

        // A separate broker stands in for a second grant source
        let other = TaskBroker::new(
            f.scheduler.clone(),
            Arc::new(TokioClock::default()),
            Arc::new(CoordinatorStats::new()),
        );
        let second = other.acquire(HandleOwner::Watchdog).unwrap();
        let second_token = second.token();
        assert!(!f.budget.begin(second));
        assert_eq!(f.scheduler.end_count_for(second_token), 1);

        assert_eq!(f.budget.cancel().await, Some(WatchExit::Cancelled));
        assert!(f.scheduler.is_balanced());
        assert_eq!(f.budget.state(), BudgetState::Idle);
    }
}
