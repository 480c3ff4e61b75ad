//! Simulation runs of the full lifecycle through the CLI entry points

use bgio_cli::{run_simulation, AppConfig, SimulationOptions};
use bgio_core::{
    BudgetConfig, FetchOutcome, FileStateStore, LifecycleConfig, MemoryStateStore, WakeSource,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> AppConfig {
    let mut lifecycle = LifecycleConfig::testing();
    lifecycle.budget = BudgetConfig {
        poll_interval_ms: 100,
        low_time_threshold_secs: 1,
        flush_grace_ms: 100,
    };
    AppConfig {
        lifecycle,
        ..AppConfig::default()
    }
}

fn fast_options() -> SimulationOptions {
    SimulationOptions {
        remaining: Duration::from_secs(2),
        push_gap: Duration::from_millis(200),
        silent_engine: false,
    }
}

#[tokio::test]
async fn test_simulation_balances_every_grant() {
    let report = run_simulation(
        &fast_config(),
        &fast_options(),
        Arc::new(MemoryStateStore::new()),
    )
    .await
    .expect("Simulation failed");

    assert_eq!(report.push_outcome, FetchOutcome::NewData);
    assert_eq!(report.local_fetch_outcome, FetchOutcome::NewData);
    assert_eq!(report.foreground_push_outcome, FetchOutcome::NewData);
    assert_eq!(report.engine.background_fetch, 1);
    // Push fetch, foreground push and watchdog; the OS fetch may add one
    assert!(report.tasks_begun >= 3, "begun {}", report.tasks_begun);
    assert!(report.tasks_balanced);
    assert!(!report.io_running_at_end);
    assert_eq!(report.stats.watchdog_stops, 1);
    assert!(report.events_delivered >= 2);
}

#[tokio::test]
async fn test_silent_engine_still_completes() {
    let options = SimulationOptions {
        silent_engine: true,
        ..fast_options()
    };
    let report = run_simulation(
        &fast_config(),
        &options,
        Arc::new(MemoryStateStore::new()),
    )
    .await
    .expect("Simulation failed");

    assert_eq!(report.push_outcome, FetchOutcome::NewData);
    assert_eq!(report.stats.fetch_timeouts, 1);
    assert!(report.tasks_balanced);
}

#[tokio::test]
async fn test_simulation_persists_shared_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared_state.json");
    let store = Arc::new(FileStateStore::open(&path).unwrap());

    run_simulation(&fast_config(), &fast_options(), store)
        .await
        .expect("Simulation failed");

    let state = FileStateStore::load_from_file(&path).unwrap();
    assert!(!state.io_running);
    assert!(state
        .wake_log
        .iter()
        .any(|e| e.source == WakeSource::RemotePush && e.accepted));
    assert!(state
        .wake_log
        .iter()
        .any(|e| e.source == WakeSource::BackgroundEnter));
}
