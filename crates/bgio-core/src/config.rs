//! Centralized Configuration Management
//!
//! All tunables of the lifecycle coordinator in one serde-friendly tree.
//! Durations are stored as plain integers so the structure maps cleanly
//! onto a TOML file.

use core::time::Duration;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Wake Gate Configuration
// ----------------------------------------------------------------------------

/// Configuration for wake-trigger deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Minimum distance between two accepted wake triggers
    pub window_secs: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self { window_secs: 60 }
    }
}

impl WakeConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

// ----------------------------------------------------------------------------
// Background Fetch Configuration
// ----------------------------------------------------------------------------

/// Configuration for OS-driven background fetches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Bound for the engine fetch and for the fetch-done rendezvous
    pub timeout_secs: u64,
    /// Pause before releasing the grant so queued engine work can flush
    pub flush_grace_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            flush_grace_ms: 1_000,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }
}

// ----------------------------------------------------------------------------
// Background Budget Configuration
// ----------------------------------------------------------------------------

/// Configuration for the background time watchdog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Interval between checks of the remaining background time
    pub poll_interval_ms: u64,
    /// Stop I/O once less than this much background time is left
    pub low_time_threshold_secs: u64,
    /// Pause between stopping I/O and releasing the grant
    pub flush_grace_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            low_time_threshold_secs: 10,
            flush_grace_ms: 3_000,
        }
    }
}

impl BudgetConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn low_time_threshold(&self) -> Duration {
        Duration::from_secs(self.low_time_threshold_secs)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }
}

// ----------------------------------------------------------------------------
// Dispatch Configuration
// ----------------------------------------------------------------------------

/// Configuration for the event dispatch loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for waiting on the dispatch worker to exit
    pub stop_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
        }
    }
}

impl DispatchConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// Shared State Configuration
// ----------------------------------------------------------------------------

/// Configuration for the persisted shared state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Diagnostic wake log entries older than this are pruned
    pub wake_log_retention_secs: u64,
    /// Hard cap on the number of diagnostic wake log entries
    pub wake_log_capacity: usize,
    /// How long a peer process claims the engine when it starts fetching
    pub peer_fetch_claim_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            wake_log_retention_secs: 24 * 60 * 60,
            wake_log_capacity: 1_000,
            peer_fetch_claim_secs: 26,
        }
    }
}

impl StateConfig {
    pub fn wake_log_retention(&self) -> Duration {
        Duration::from_secs(self.wake_log_retention_secs)
    }

    pub fn peer_fetch_claim(&self) -> Duration {
        Duration::from_secs(self.peer_fetch_claim_secs)
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the coordinator's command channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for lifecycle commands (OS callbacks → coordinator)
    pub command_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 64,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-Level Configuration
// ----------------------------------------------------------------------------

/// Complete coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub wake: WakeConfig,
    pub fetch: FetchConfig,
    pub budget: BudgetConfig,
    pub dispatch: DispatchConfig,
    pub state: StateConfig,
    pub channels: ChannelConfig,
}

impl LifecycleConfig {
    /// Short timings for tests; the wake window keeps its production value
    pub fn testing() -> Self {
        Self {
            wake: WakeConfig::default(),
            fetch: FetchConfig {
                timeout_secs: 2,
                flush_grace_ms: 10,
            },
            budget: BudgetConfig {
                poll_interval_ms: 3_000,
                low_time_threshold_secs: 10,
                flush_grace_ms: 3_000,
            },
            dispatch: DispatchConfig {
                stop_timeout_secs: 5,
            },
            state: StateConfig::default(),
            channels: ChannelConfig {
                command_buffer_size: 16,
            },
        }
    }

    /// Check the configuration for values the coordinator cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.wake.window_secs == 0 {
            return Err("wake.window_secs must be greater than zero".to_string());
        }
        if self.fetch.timeout_secs == 0 {
            return Err("fetch.timeout_secs must be greater than zero".to_string());
        }
        if self.budget.poll_interval_ms == 0 {
            return Err("budget.poll_interval_ms must be greater than zero".to_string());
        }
        if self.budget.low_time_threshold() <= self.budget.poll_interval() {
            return Err(format!(
                "budget.low_time_threshold_secs ({}s) must exceed the poll interval ({}ms)",
                self.budget.low_time_threshold_secs, self.budget.poll_interval_ms
            ));
        }
        if self.dispatch.stop_timeout_secs == 0 {
            return Err("dispatch.stop_timeout_secs must be greater than zero".to_string());
        }
        if self.state.wake_log_capacity == 0 {
            return Err("state.wake_log_capacity must be greater than zero".to_string());
        }
        if self.channels.command_buffer_size == 0 {
            return Err("channels.command_buffer_size must be greater than zero".to_string());
        }
        Ok(())
    }
}
