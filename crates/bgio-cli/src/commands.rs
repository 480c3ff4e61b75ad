//! Command handlers for the bgio CLI

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bgio_core::{
    EventKind, EventRecord, FetchOutcome, FileStateStore, MemoryStateStore, SharedState,
    StateStore,
};
use bgio_harness::{MockEngine, MockEngineConfig, MockScheduler, RecordingSink};
use bgio_runtime::{CoordinatorBuilder, StatsSnapshot};
use serde::Serialize;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Simulation
// ----------------------------------------------------------------------------

/// Knobs for one simulated background session
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub remaining: Duration,
    pub push_gap: Duration,
    pub silent_engine: bool,
}

/// Engine call counts observed during a simulation
#[derive(Debug, Clone, Serialize)]
pub struct EngineCounts {
    pub start_io: u64,
    pub stop_io: u64,
    pub background_fetch: u64,
    pub maybe_network: u64,
}

/// What a simulated session produced
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub push_outcome: FetchOutcome,
    pub local_fetch_outcome: FetchOutcome,
    pub foreground_push_outcome: FetchOutcome,
    pub events_delivered: usize,
    pub tasks_begun: usize,
    pub tasks_balanced: bool,
    pub io_running_at_end: bool,
    pub engine: EngineCounts,
    pub stats: StatsSnapshot,
}

/// Drive a full lifecycle against the simulated engine:
/// background launch by push, a duplicate OS fetch, a foreground visit with
/// incoming events, then a background stint until the watchdog stops I/O.
pub async fn run_simulation(
    config: &AppConfig,
    options: &SimulationOptions,
    store: Arc<dyn StateStore>,
) -> Result<SimulationReport> {
    let engine_config = if options.silent_engine {
        MockEngineConfig::silent()
    } else {
        MockEngineConfig::default()
    };
    let engine = Arc::new(MockEngine::new(engine_config));
    let scheduler = Arc::new(MockScheduler::with_fixed_remaining(options.remaining));
    let sink = Arc::new(RecordingSink::new());

    let mut handle = CoordinatorBuilder::new(engine.clone(), scheduler.clone())
        .with_config(config.lifecycle.clone())
        .with_state_store(store.clone())
        .with_sink(sink.clone())
        .build_and_start()
        .await?;

    info!("Simulating background launch by remote push");
    let push = handle.remote_push()?;
    tokio::time::sleep(options.push_gap).await;
    let local_fetch = handle.background_fetch()?;
    let local_fetch_outcome = local_fetch.outcome().await;
    let push_outcome = push.outcome().await;

    info!("Simulating foreground visit");
    handle.enter_foreground()?;
    let emitter = engine.emitter();
    emitter.push(
        EventRecord::new(EventKind::IncomingMessage, 1)
            .with_chat(10)
            .with_message(100),
    );
    emitter.push(EventRecord::new(EventKind::MessagesChanged, 1).with_chat(10));
    let foreground_push_outcome = handle.remote_push()?.outcome().await;

    info!(remaining = ?options.remaining, "Simulating background stint");
    scheduler.reset_budget(options.remaining);
    let begun_before = scheduler.begin_count();
    handle.enter_background()?;
    let limit = options.remaining + config.lifecycle.budget.flush_grace();
    wait_for_release(&scheduler, begun_before, limit).await?;

    let events_delivered = sink.len();
    let io_running_at_end = store.is_io_running();
    handle.shutdown().await?;

    Ok(SimulationReport {
        push_outcome,
        local_fetch_outcome,
        foreground_push_outcome,
        events_delivered,
        tasks_begun: scheduler.begin_count(),
        tasks_balanced: scheduler.is_balanced(),
        io_running_at_end,
        engine: EngineCounts {
            start_io: engine.start_io_calls(),
            stop_io: engine.stop_io_calls(),
            background_fetch: engine.background_fetch_calls(),
            maybe_network: engine.maybe_network_calls(),
        },
        stats: handle.stats(),
    })
}

/// Wait until a grant newer than `begun_before` was taken and every grant ended
async fn wait_for_release(
    scheduler: &MockScheduler,
    begun_before: usize,
    limit: Duration,
) -> Result<()> {
    tokio::time::timeout(limit, async {
        while scheduler.begin_count() <= begun_before || !scheduler.outstanding().is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .map_err(|_| CliError::Simulation(format!("Background grant still held after {limit:?}")))
}

// ----------------------------------------------------------------------------
// Command Dispatcher
// ----------------------------------------------------------------------------

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Simulate {
                remaining_secs,
                push_gap_ms,
                silent,
            } => {
                let options = SimulationOptions {
                    remaining: Duration::from_secs(remaining_secs),
                    push_gap: Duration::from_millis(push_gap_ms),
                    silent_engine: silent,
                };
                Self::handle_simulate_command(&config, &options, cli.state_file.is_some()).await
            }
            Commands::Status => Self::handle_status_command(&config),
            Commands::Config => Self::handle_config_command(&config),
        }
    }

    async fn handle_simulate_command(
        config: &AppConfig,
        options: &SimulationOptions,
        persist: bool,
    ) -> Result<()> {
        let store: Arc<dyn StateStore> = if persist {
            let path = config.state_file();
            info!(path = %path.display(), "Persisting shared state");
            Arc::new(FileStateStore::open(path)?)
        } else {
            Arc::new(MemoryStateStore::new())
        };

        let report = run_simulation(config, options, store).await?;
        print_report(&report);
        Ok(())
    }

    fn handle_status_command(config: &AppConfig) -> Result<()> {
        let path = config.state_file();
        let state = FileStateStore::load_from_file(&path)?;
        print_status(&path, &state);
        Ok(())
    }

    fn handle_config_command(config: &AppConfig) -> Result<()> {
        print!("{}", config.to_toml()?);
        Ok(())
    }
}

fn print_report(report: &SimulationReport) {
    println!("Lifecycle Simulation");
    println!("====================");
    println!("Remote push:          {}", report.push_outcome);
    println!("OS background fetch:  {}", report.local_fetch_outcome);
    println!("Foreground push:      {}", report.foreground_push_outcome);
    println!("Events delivered:     {}", report.events_delivered);
    println!("I/O running at end:   {}", report.io_running_at_end);

    println!("\nEngine Calls:");
    println!("  start_io:         {}", report.engine.start_io);
    println!("  stop_io:          {}", report.engine.stop_io);
    println!("  background_fetch: {}", report.engine.background_fetch);
    println!("  maybe_network:    {}", report.engine.maybe_network);

    println!("\nBackground Tasks:");
    println!("  begun:    {}", report.tasks_begun);
    println!("  balanced: {}", report.tasks_balanced);

    println!("\nStatistics:");
    println!("  Events Dispatched: {}", report.stats.events_dispatched);
    println!("  Fetches Started:   {}", report.stats.fetches_started);
    println!("  Fetches Skipped:   {}", report.stats.fetches_skipped);
    println!("  Fetch Timeouts:    {}", report.stats.fetch_timeouts);
    println!("  Handles Released:  {}", report.stats.handles_released);
    println!("  Watchdog Stops:    {}", report.stats.watchdog_stops);
}

fn print_status(path: &Path, state: &SharedState) {
    println!("Shared State ({})", path.display());
    println!("==========================");
    println!("I/O running: {}", state.io_running);
    match state.peer_fetching_until {
        Some(until) => println!("Peer fetch claim until: {}", until),
        None => println!("Peer fetch claim: none"),
    }

    println!("\nRecent Wakes:");
    if state.wake_log.is_empty() {
        println!("  None");
    } else {
        for entry in &state.wake_log {
            let verdict = if entry.accepted { "accepted" } else { "skipped" };
            println!("  {} {} ({})", entry.timestamp, entry.source, verdict);
        }
    }
}
