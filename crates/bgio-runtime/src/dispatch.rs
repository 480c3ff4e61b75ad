//! Event Dispatch Loop
//!
//! A dedicated worker thread pulls events from the engine's blocking emitter
//! and hands them to an [`EventHandler`]. Shutdown is cooperative: the worker
//! checks the stop flag after every pull, so the terminal event produced by
//! the unblocking call is discarded rather than dispatched. The caller
//! unblocks the worker (normally by stopping engine I/O, which emits a
//! terminal event) and waits for it to exit without ever contending with a
//! running handler.

use bgio_core::{EventEmitter, EventRecord, LifecycleError, LifecycleResult};
use core::time::Duration;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Consumer of drained engine events
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &EventRecord);
}

impl<F> EventHandler for F
where
    F: Fn(&EventRecord) + Send + Sync,
{
    fn handle(&self, event: &EventRecord) {
        self(event)
    }
}

/// Why the worker exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    /// The emitter reported end of stream
    #[default]
    EmitterFinished,
    /// The stop flag was observed
    ShutdownRequested,
}

/// What a finished worker reports back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    pub dispatched: u64,
    /// Events pulled after the stop flag was set
    pub dropped: u64,
    pub reason: ExitReason,
}

struct ActiveLoop {
    stopping: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    done: oneshot::Receiver<DispatchSummary>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of the single dispatch worker
#[derive(Default)]
pub struct EventDispatchLoop {
    active: Mutex<Option<ActiveLoop>>,
}

impl EventDispatchLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the worker; a no-op returning `false` while one is active
    pub fn start(
        &self,
        emitter: Arc<dyn EventEmitter>,
        handler: Arc<dyn EventHandler>,
    ) -> LifecycleResult<bool> {
        let mut active = lock(&self.active);
        if let Some(current) = active.as_ref() {
            if !current.finished.load(Ordering::SeqCst) {
                debug!("Dispatch loop already running");
                return Ok(false);
            }
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = oneshot::channel();

        let worker_stopping = Arc::clone(&stopping);
        let worker_finished = Arc::clone(&finished);
        std::thread::Builder::new()
            .name("bgio-dispatch".into())
            .spawn(move || {
                let summary = run_worker(emitter.as_ref(), handler.as_ref(), &worker_stopping);
                worker_finished.store(true, Ordering::SeqCst);
                info!(
                    dispatched = summary.dispatched,
                    reason = ?summary.reason,
                    "Dispatch loop exited"
                );
                let _ = done_tx.send(summary);
            })
            .map_err(|e| LifecycleError::worker(format!("Failed to spawn dispatch worker: {e}")))?;

        *active = Some(ActiveLoop {
            stopping,
            finished,
            done: done_rx,
        });
        info!("Dispatch loop started");
        Ok(true)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|current| !current.finished.load(Ordering::SeqCst))
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    ///
    /// `unblock` runs after the stop flag is set and must make the emitter
    /// return, e.g. by stopping engine I/O. It runs even when no worker is
    /// active.
    pub async fn stop<F>(&self, unblock: F, timeout: Duration) -> LifecycleResult<DispatchSummary>
    where
        F: FnOnce(),
    {
        let current = lock(&self.active).take();
        let Some(current) = current else {
            unblock();
            return Ok(DispatchSummary::default());
        };

        current.stopping.store(true, Ordering::SeqCst);
        unblock();

        match tokio::time::timeout(timeout, current.done).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(_)) => Err(LifecycleError::worker(
                "Dispatch worker exited without reporting",
            )),
            Err(_) => {
                warn!(?timeout, "Dispatch worker did not exit in time");
                Err(LifecycleError::worker(format!(
                    "Dispatch worker still running after {timeout:?}"
                )))
            }
        }
    }
}

fn run_worker(
    emitter: &dyn EventEmitter,
    handler: &dyn EventHandler,
    stopping: &AtomicBool,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    loop {
        let Some(event) = emitter.next_event() else {
            summary.reason = ExitReason::EmitterFinished;
            return summary;
        };

        if stopping.load(Ordering::SeqCst) {
            summary.dropped += 1;
            summary.reason = ExitReason::ShutdownRequested;
            return summary;
        }
        handler.handle(&event);
        summary.dispatched += 1;
    }
}
