//! Core types for the background I/O lifecycle
//!
//! Newtypes and small state enums shared by the coordinator components and
//! by cooperating processes that read the persisted shared state.

use core::fmt;
use core::ops::{Add, Sub};
use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(other.as_millis() as u64))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add seconds to this timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        Self(self.0.saturating_add(seconds * 1000))
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of timestamps for wake decisions and persisted state.
///
/// Injected so that tests can drive the wake window deterministically.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation of [`TimeSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Lifecycle States
// ----------------------------------------------------------------------------

/// Whether the engine's network I/O is currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IoState {
    #[default]
    Stopped,
    Running,
}

impl IoState {
    pub fn is_running(self) -> bool {
        matches!(self, IoState::Running)
    }
}

/// Application visibility as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AppPhase {
    Foreground,
    #[default]
    Background,
}

impl AppPhase {
    pub fn is_foreground(self) -> bool {
        matches!(self, AppPhase::Foreground)
    }
}

// ----------------------------------------------------------------------------
// Wake Triggers
// ----------------------------------------------------------------------------

/// Origin of a wake trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeSource {
    /// Remote push notification
    RemotePush,
    /// OS-initiated background fetch
    LocalFetch,
    /// Network became reachable again
    ReachabilityRestored,
    /// App returned to the foreground
    ForegroundEnter,
    /// App left the foreground; I/O was running until now
    BackgroundEnter,
}

impl fmt::Display for WakeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WakeSource::RemotePush => "remote_push",
            WakeSource::LocalFetch => "local_fetch",
            WakeSource::ReachabilityRestored => "reachability_restored",
            WakeSource::ForegroundEnter => "foreground_enter",
            WakeSource::BackgroundEnter => "background_enter",
        };
        f.write_str(name)
    }
}

/// A single wake trigger, consumed immediately by the wake gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeEvent {
    pub source: WakeSource,
    pub timestamp: Timestamp,
}

impl WakeEvent {
    pub fn new(source: WakeSource, timestamp: Timestamp) -> Self {
        Self { source, timestamp }
    }
}

// ----------------------------------------------------------------------------
// Fetch Outcome
// ----------------------------------------------------------------------------

/// Result reported back to the OS for a background fetch.
///
/// `Failed` is penalized by the OS scheduler, so every skip path reports
/// `NewData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    NewData,
    Failed,
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::NewData => f.write_str("new_data"),
            FetchOutcome::Failed => f.write_str("failed"),
        }
    }
}

// ----------------------------------------------------------------------------
// Background Task Token
// ----------------------------------------------------------------------------

/// Opaque identifier handed out by the OS for a background execution grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskToken(u64);

impl TaskToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
