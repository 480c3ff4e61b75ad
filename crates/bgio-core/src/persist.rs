//! Persisted shared state
//!
//! A small record shared with cooperating processes (e.g. a notification
//! service extension running against the same engine):
//! - whether the app intends I/O to run,
//! - whether a peer process currently claims the engine for its own fetch,
//! - a diagnostic log of recent wake triggers.

use crate::errors::{LifecycleError, LifecycleResult};
use crate::types::{Timestamp, WakeSource};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// One diagnostic wake log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeLogEntry {
    pub timestamp: Timestamp,
    pub source: WakeSource,
    pub accepted: bool,
}

/// State shared across processes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedState {
    /// The app wants the engine's I/O running
    pub io_running: bool,
    /// A peer process claimed the engine until this time
    pub peer_fetching_until: Option<Timestamp>,
    /// Recent wake triggers, oldest first
    pub wake_log: Vec<WakeLogEntry>,
}

impl SharedState {
    /// Whether an unexpired peer claim exists at `now`
    pub fn peer_fetching(&self, now: Timestamp) -> bool {
        self.peer_fetching_until.is_some_and(|until| now < until)
    }

    /// Append a wake entry and drop whatever falls out of the window
    pub fn push_wake(
        &mut self,
        entry: WakeLogEntry,
        now: Timestamp,
        retention: Duration,
        capacity: usize,
    ) {
        self.wake_log.push(entry);
        self.prune_wake_log(now, retention, capacity);
    }

    /// Remove entries older than `retention` and trim to `capacity`
    pub fn prune_wake_log(&mut self, now: Timestamp, retention: Duration, capacity: usize) {
        let retention_ms = retention.as_millis() as u64;
        self.wake_log
            .retain(|entry| now - entry.timestamp <= retention_ms);

        if self.wake_log.len() > capacity {
            let excess = self.wake_log.len() - capacity;
            self.wake_log.drain(..excess);
        }
    }
}

// ----------------------------------------------------------------------------
// State Store Trait
// ----------------------------------------------------------------------------

/// Storage backend for [`SharedState`]
pub trait StateStore: Send + Sync {
    /// Copy of the current state
    fn snapshot(&self) -> SharedState;

    /// Apply a mutation and persist it
    fn update(&self, apply: &mut dyn FnMut(&mut SharedState)) -> LifecycleResult<()>;

    fn is_io_running(&self) -> bool {
        self.snapshot().io_running
    }

    fn set_io_running(&self, running: bool) -> LifecycleResult<()> {
        self.update(&mut |state| state.io_running = running)
    }

    fn is_peer_fetching(&self, now: Timestamp) -> bool {
        self.snapshot().peer_fetching(now)
    }

    /// Claim the engine for a peer fetch lasting at most `duration`
    fn claim_peer_fetch(&self, now: Timestamp, duration: Duration) -> LifecycleResult<()> {
        self.update(&mut |state| state.peer_fetching_until = Some(now + duration))
    }

    fn release_peer_fetch(&self) -> LifecycleResult<()> {
        self.update(&mut |state| state.peer_fetching_until = None)
    }

    fn record_wake(
        &self,
        entry: WakeLogEntry,
        now: Timestamp,
        retention: Duration,
        capacity: usize,
    ) -> LifecycleResult<()> {
        let mut entry = Some(entry);
        self.update(&mut |state| {
            if let Some(entry) = entry.take() {
                state.push_wake(entry, now, retention, capacity);
            }
        })
    }
}

fn lock_state(state: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// Process-local store, used in tests and when nothing is shared
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<SharedState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SharedState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self) -> SharedState {
        lock_state(&self.state).clone()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut SharedState)) -> LifecycleResult<()> {
        apply(&mut lock_state(&self.state));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// File-Backed Store
// ----------------------------------------------------------------------------

/// JSON file store, rewritten after every mutation
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: Mutex<SharedState>,
}

impl FileStateStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> LifecycleResult<Self> {
        let path = path.into();
        let state = Self::load_from_file(&path)?;
        debug!(path = %path.display(), io_running = state.io_running, "Opened shared state");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read state from `path` without keeping a store around
    pub fn load_from_file(path: &Path) -> LifecycleResult<SharedState> {
        if !path.exists() {
            return Ok(SharedState::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::persistence(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if contents.trim().is_empty() {
            warn!(path = %path.display(), "Shared state file is empty, starting fresh");
            return Ok(SharedState::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, state: &SharedState) -> LifecycleResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, contents)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn snapshot(&self) -> SharedState {
        lock_state(&self.state).clone()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut SharedState)) -> LifecycleResult<()> {
        let mut state = lock_state(&self.state);
        apply(&mut state);
        self.save(&state)
    }
}
