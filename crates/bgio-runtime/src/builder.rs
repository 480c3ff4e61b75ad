//! Coordinator Builder API
//!
//! Wires the engine and OS collaborators into a running coordinator and
//! hands back a [`CoordinatorHandle`] whose lifecycle entry points never
//! block the caller.

use crate::budget::BackgroundTaskBudget;
use crate::coordinator::{CoordinatorParts, LifecycleCommand, LifecycleCoordinator};
use crate::dispatch::{DispatchSummary, EventDispatchLoop, EventHandler};
use crate::fetch::{BackgroundFetchCoordinator, FetchDeps, FetchRendezvous};
use crate::gate::{WakeGate, WakeGateStats};
use crate::grant::{GrantReturn, TaskBroker};
use crate::io::IoController;
use crate::phase::PhaseTracker;
use crate::router::EventRouter;
use crate::stats::{CoordinatorStats, StatsSnapshot};
use bgio_core::{
    AlwaysReachable, AppPhase, BackgroundScheduler, DispatchSink, Engine, FetchOutcome, IoState,
    LifecycleConfig, LifecycleError, LifecycleResult, MemoryStateStore, NetworkMonitor, NullSink,
    SharedState, StateStore, SystemTimeSource, TimeSource, WakeSource,
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{info, warn};

// ----------------------------------------------------------------------------
// Coordinator Builder
// ----------------------------------------------------------------------------

/// Builder for a background I/O lifecycle coordinator
pub struct CoordinatorBuilder {
    engine: Arc<dyn Engine>,
    scheduler: Arc<dyn BackgroundScheduler>,
    config: LifecycleConfig,
    network: Arc<dyn NetworkMonitor>,
    store: Arc<dyn StateStore>,
    time_source: Arc<dyn TimeSource>,
    sink: Arc<dyn DispatchSink>,
    handlers: Vec<Arc<dyn EventHandler>>,
    initial_phase: AppPhase,
}

impl CoordinatorBuilder {
    pub fn new(engine: Arc<dyn Engine>, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        Self {
            engine,
            scheduler,
            config: LifecycleConfig::default(),
            network: Arc::new(AlwaysReachable),
            store: Arc::new(MemoryStateStore::new()),
            time_source: Arc::new(SystemTimeSource),
            sink: Arc::new(NullSink),
            handlers: Vec::new(),
            initial_phase: AppPhase::Background,
        }
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    /// Persisted state shared with cooperating processes
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// UI sink receiving every drained event
    pub fn with_sink(mut self, sink: Arc<dyn DispatchSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Extra event consumer, called after the sink
    pub fn add_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Phase the app is in when the coordinator starts
    pub fn with_initial_phase(mut self, phase: AppPhase) -> Self {
        self.initial_phase = phase;
        self
    }

    /// Build the components, start the dispatch worker and the coordinator task
    pub async fn build_and_start(self) -> LifecycleResult<CoordinatorHandle> {
        self.config
            .validate()
            .map_err(LifecycleError::configuration)?;
        info!("Building lifecycle coordinator");

        let stats = Arc::new(CoordinatorStats::new());
        let phase = Arc::new(PhaseTracker::new(self.initial_phase));
        let gate = Arc::new(WakeGate::new(self.config.wake.window()));
        let rendezvous = Arc::new(FetchRendezvous::new());
        let io = Arc::new(IoController::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.network),
            Arc::clone(&self.store),
            Arc::clone(&self.time_source),
        ));

        let broker = TaskBroker::new(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.time_source),
            Arc::clone(&stats),
        );
        let fetch = Arc::new(BackgroundFetchCoordinator::new(
            FetchDeps {
                engine: Arc::clone(&self.engine),
                io: Arc::clone(&io),
                gate: Arc::clone(&gate),
                phase: Arc::clone(&phase),
                store: Arc::clone(&self.store),
                time_source: Arc::clone(&self.time_source),
                rendezvous: Arc::clone(&rendezvous),
                stats: Arc::clone(&stats),
            },
            self.config.fetch.clone(),
            self.config.state.clone(),
        ));
        let (returns, returned) = GrantReturn::channel();
        let budget = BackgroundTaskBudget::new(
            Arc::clone(&io),
            Arc::clone(&self.scheduler),
            Arc::clone(&phase),
            Arc::clone(&stats),
            self.config.budget.clone(),
        )
        .with_returns(returns.clone());
        let router = Arc::new(EventRouter::new(
            rendezvous,
            self.sink,
            self.handlers,
            Arc::clone(&stats),
        ));

        let (command_sender, command_receiver) =
            mpsc::channel(self.config.channels.command_buffer_size);
        let coordinator = LifecycleCoordinator::new(
            CoordinatorParts {
                config: self.config,
                engine: self.engine,
                io: Arc::clone(&io),
                gate: Arc::clone(&gate),
                phase: Arc::clone(&phase),
                broker,
                fetch,
                budget,
                dispatch: EventDispatchLoop::new(),
                router,
                store: Arc::clone(&self.store),
                time_source: self.time_source,
                stats: Arc::clone(&stats),
                returns,
            },
            command_receiver,
            returned,
        );
        coordinator.ensure_dispatching()?;

        let coordinator_task = tokio::spawn(coordinator.run());
        info!(phase = ?phase.current(), "Lifecycle coordinator started");

        Ok(CoordinatorHandle {
            commands: command_sender,
            coordinator_task: Some(coordinator_task),
            io,
            gate,
            phase,
            store: self.store,
            stats,
        })
    }
}

// ----------------------------------------------------------------------------
// Fetch Ticket
// ----------------------------------------------------------------------------

/// Pending outcome of a wake trigger
#[derive(Debug)]
pub struct FetchTicket {
    rx: oneshot::Receiver<FetchOutcome>,
}

impl FetchTicket {
    /// Wait for the fetch to finish.
    ///
    /// A coordinator that went away without answering counts as new data so
    /// the OS does not throttle future wakes.
    pub async fn outcome(self) -> FetchOutcome {
        self.rx.await.unwrap_or(FetchOutcome::NewData)
    }
}

// ----------------------------------------------------------------------------
// Coordinator Handle
// ----------------------------------------------------------------------------

/// Handle to a running coordinator
pub struct CoordinatorHandle {
    commands: mpsc::Sender<LifecycleCommand>,
    coordinator_task: Option<JoinHandle<LifecycleResult<()>>>,
    io: Arc<IoController>,
    gate: Arc<WakeGate>,
    phase: Arc<PhaseTracker>,
    store: Arc<dyn StateStore>,
    stats: Arc<CoordinatorStats>,
}

impl CoordinatorHandle {
    fn submit(&self, command: LifecycleCommand) -> LifecycleResult<()> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                LifecycleError::channel("Coordinator command queue is full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                LifecycleError::channel("Coordinator is not running")
            }
        })
    }

    pub fn enter_foreground(&self) -> LifecycleResult<()> {
        self.submit(LifecycleCommand::EnterForeground)
    }

    pub fn enter_background(&self) -> LifecycleResult<()> {
        self.submit(LifecycleCommand::EnterBackground)
    }

    pub fn reachability_changed(&self, reachable: bool) -> LifecycleResult<()> {
        self.submit(LifecycleCommand::ReachabilityChanged { reachable })
    }

    /// Remote push arrived
    pub fn remote_push(&self) -> LifecycleResult<FetchTicket> {
        self.wake(WakeSource::RemotePush)
    }

    /// The OS granted a background fetch
    pub fn background_fetch(&self) -> LifecycleResult<FetchTicket> {
        self.wake(WakeSource::LocalFetch)
    }

    fn wake(&self, source: WakeSource) -> LifecycleResult<FetchTicket> {
        let (reply, rx) = oneshot::channel();
        self.submit(LifecycleCommand::Wake { source, reply })?;
        Ok(FetchTicket { rx })
    }

    pub fn io_state(&self) -> IoState {
        self.io.state()
    }

    pub fn phase(&self) -> AppPhase {
        self.phase.current()
    }

    pub fn is_running(&self) -> bool {
        self.coordinator_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn wake_stats(&self) -> WakeGateStats {
        self.gate.stats()
    }

    pub fn shared_state(&self) -> SharedState {
        self.store.snapshot()
    }

    /// Stop watchdog and fetches, stop I/O and wait for the dispatch worker
    pub async fn shutdown(&mut self) -> LifecycleResult<DispatchSummary> {
        let Some(task) = self.coordinator_task.take() else {
            return Ok(DispatchSummary::default());
        };
        info!("Shutting down lifecycle coordinator");

        let (reply, rx) = oneshot::channel();
        let result = match self.commands.send(LifecycleCommand::Shutdown { reply }).await {
            Ok(()) => rx
                .await
                .unwrap_or_else(|_| Err(LifecycleError::channel("Coordinator dropped shutdown reply"))),
            Err(_) => Err(LifecycleError::channel("Coordinator is not running")),
        };

        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Coordinator exited with error"),
            Err(e) => warn!(error = %e, "Coordinator task panicked"),
        }

        info!("Lifecycle coordinator shut down");
        result
    }
}
