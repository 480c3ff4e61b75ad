//! Lifecycle Coordinator Task
//!
//! Single actor that serializes OS lifecycle callbacks:
//! - foreground/background transitions,
//! - wake triggers (remote push, OS background fetch),
//! - reachability changes,
//! - graceful shutdown.
//!
//! Blocking engine work never runs on this task; fetches run on their own
//! tasks and hand their outcome back through a reply channel.
//!
//! Grants come back here when their holder is done. The phase and I/O state
//! are only changed on this task, so the decision to release a returned grant
//! or hand it to a new watchdog session cannot race a lifecycle transition.

use crate::budget::BackgroundTaskBudget;
use crate::dispatch::{DispatchSummary, EventDispatchLoop};
use crate::fetch::BackgroundFetchCoordinator;
use crate::gate::{record_wake, WakeGate};
use crate::grant::{GrantReturn, HandleOwner, ReturnedGrant, TaskBroker};
use crate::io::IoController;
use crate::phase::PhaseTracker;
use crate::router::EventRouter;
use crate::stats::CoordinatorStats;
use bgio_core::{
    AppPhase, Engine, FetchOutcome, LifecycleConfig, LifecycleResult, StateStore, TimeSource,
    WakeEvent, WakeSource,
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Messages accepted by the coordinator task
#[derive(Debug)]
pub enum LifecycleCommand {
    EnterForeground,
    EnterBackground,
    Wake {
        source: WakeSource,
        reply: oneshot::Sender<FetchOutcome>,
    },
    ReachabilityChanged {
        reachable: bool,
    },
    Shutdown {
        reply: oneshot::Sender<LifecycleResult<DispatchSummary>>,
    },
}

// ----------------------------------------------------------------------------
// Coordinator Task
// ----------------------------------------------------------------------------

/// Components the coordinator drives, assembled by the builder
pub(crate) struct CoordinatorParts {
    pub config: LifecycleConfig,
    pub engine: Arc<dyn Engine>,
    pub io: Arc<IoController>,
    pub gate: Arc<WakeGate>,
    pub phase: Arc<PhaseTracker>,
    pub broker: TaskBroker,
    pub fetch: Arc<BackgroundFetchCoordinator>,
    pub budget: BackgroundTaskBudget,
    pub dispatch: EventDispatchLoop,
    pub router: Arc<EventRouter>,
    pub store: Arc<dyn StateStore>,
    pub time_source: Arc<dyn TimeSource>,
    pub stats: Arc<CoordinatorStats>,
    pub returns: GrantReturn,
}

pub struct LifecycleCoordinator {
    parts: CoordinatorParts,
    commands: mpsc::Receiver<LifecycleCommand>,
    returned: mpsc::UnboundedReceiver<ReturnedGrant>,
    fetch_tasks: Vec<JoinHandle<()>>,
}

impl LifecycleCoordinator {
    pub(crate) fn new(
        parts: CoordinatorParts,
        commands: mpsc::Receiver<LifecycleCommand>,
        returned: mpsc::UnboundedReceiver<ReturnedGrant>,
    ) -> Self {
        Self {
            parts,
            commands,
            returned,
            fetch_tasks: Vec::new(),
        }
    }

    /// Start the dispatch worker unless one is already draining events
    pub(crate) fn ensure_dispatching(&self) -> LifecycleResult<bool> {
        self.parts
            .dispatch
            .start(self.parts.engine.event_emitter(), self.parts.router.clone())
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) -> LifecycleResult<()> {
        info!("Lifecycle coordinator running");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(LifecycleCommand::Shutdown { reply }) => {
                        let result = self.shutdown().await;
                        let _ = reply.send(result);
                        info!("Lifecycle coordinator stopped");
                        return Ok(());
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(returned) = self.returned.recv() => self.settle_grant(returned),
            }
        }

        warn!("Coordinator handle dropped without shutdown");
        self.shutdown().await.map(|_| ())
    }

    fn handle_command(&mut self, command: LifecycleCommand) {
        match command {
            LifecycleCommand::EnterForeground => self.enter_foreground(),
            LifecycleCommand::EnterBackground => self.enter_background(),
            LifecycleCommand::Wake { source, reply } => self.wake(source, reply),
            LifecycleCommand::ReachabilityChanged { reachable } => {
                self.reachability_changed(reachable)
            }
            LifecycleCommand::Shutdown { .. } => {
                debug!("Shutdown is handled by the run loop");
            }
        }
    }

    fn enter_foreground(&mut self) {
        self.parts.phase.set(AppPhase::Foreground);
        let event = WakeEvent::new(WakeSource::ForegroundEnter, self.parts.time_source.now());
        self.parts.gate.observe(event);
        record_wake(self.parts.store.as_ref(), &self.parts.config.state, event, true);

        let transition = self.parts.io.enter_foreground();
        if let Err(e) = self.ensure_dispatching() {
            warn!(error = %e, "Could not restart dispatch loop");
        }
        info!(
            started = transition.started,
            probing = transition.probe.is_some(),
            "Entered foreground"
        );
    }

    fn enter_background(&mut self) {
        self.parts.phase.set(AppPhase::Background);
        let at = self.parts.io.enter_background();
        let event = WakeEvent::new(WakeSource::BackgroundEnter, at);
        self.parts.gate.observe(event);
        record_wake(self.parts.store.as_ref(), &self.parts.config.state, event, true);

        if self.parts.budget.is_watching() {
            debug!("Entered background with watchdog already running");
            return;
        }
        // A busy slot means a holder will return its grant here once done
        match self.parts.broker.acquire(HandleOwner::Watchdog) {
            Ok(handle) => {
                self.parts.budget.begin(handle);
            }
            Err(e) => debug!(error = %e, "Watchdog waits for the held grant"),
        }
        info!(io = ?self.parts.io.state(), "Entered background");
    }

    /// Release a grant its holder is done with, or keep it for a new watchdog
    /// session if the app is in the background with I/O running
    fn settle_grant(&mut self, returned: ReturnedGrant) {
        let (handle, on_settled) = returned.into_parts();
        let covers_running_io = !handle.is_released()
            && !self.parts.phase.is_foreground()
            && self.parts.io.state().is_running();

        if covers_running_io {
            info!(
                token = %handle.token(),
                owner = %handle.owner(),
                "Watchdog takes over background grant"
            );
            self.parts.budget.begin(handle);
        } else {
            handle.release();
        }

        if let Some(on_settled) = on_settled {
            on_settled();
        }
    }

    fn wake(&mut self, source: WakeSource, reply: oneshot::Sender<FetchOutcome>) {
        self.fetch_tasks.retain(|task| !task.is_finished());

        let grant = match self.parts.broker.acquire(HandleOwner::Fetch) {
            Ok(grant) => grant,
            Err(e) => {
                let event = WakeEvent::new(source, self.parts.time_source.now());
                record_wake(self.parts.store.as_ref(), &self.parts.config.state, event, false);
                CoordinatorStats::bump(&self.parts.stats.fetches_skipped);
                debug!(%source, error = %e, "Fetch skipped: grant busy");
                let _ = reply.send(FetchOutcome::NewData);
                return;
            }
        };

        let fetch = Arc::clone(&self.parts.fetch);
        let returns = self.parts.returns.clone();
        self.fetch_tasks.push(tokio::spawn(async move {
            let outcome = fetch.fetch_under(&grant, source).await;
            returns.give_back_then(grant, move || {
                if reply.send(outcome).is_err() {
                    debug!(%source, "Fetch outcome receiver dropped");
                }
            });
        }));
    }

    fn reachability_changed(&mut self, reachable: bool) {
        info!(reachable, "Reachability changed");
        if reachable {
            let event = WakeEvent::new(
                WakeSource::ReachabilityRestored,
                self.parts.time_source.now(),
            );
            record_wake(self.parts.store.as_ref(), &self.parts.config.state, event, true);
        }
        let _ = self.parts.io.network_hint(reachable);
    }

    async fn shutdown(&mut self) -> LifecycleResult<DispatchSummary> {
        info!("Coordinator shutting down");

        // I/O goes down first and stays down; grants are only ended after
        let io = Arc::clone(&self.parts.io);
        let stopped = self
            .parts
            .dispatch
            .stop(move || io.force_stop(), self.parts.config.dispatch.stop_timeout())
            .await;

        if let Some(exit) = self.parts.budget.cancel().await {
            debug!(?exit, "Budget watchdog stopped");
        }

        for task in self.fetch_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.returned.close();
        while let Ok(returned) = self.returned.try_recv() {
            returned.release();
        }

        let summary = stopped?;

        info!(
            dispatched = summary.dispatched,
            reason = ?summary.reason,
            "Dispatch loop drained"
        );
        Ok(summary)
    }
}
