//! Error types for the lifecycle coordinator
//!
//! Nothing in the lifecycle path is allowed to take the process down, so most
//! failures here are reported to the caller of a setup or persistence
//! operation and logged everywhere else.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    #[error("Background task handle already held by {owner}")]
    HandleHeld { owner: String },

    #[error("Worker error: {reason}")]
    Worker { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LifecycleError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        LifecycleError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        LifecycleError::Channel {
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(reason: impl Into<String>) -> Self {
        LifecycleError::Persistence {
            reason: reason.into(),
        }
    }

    /// Create a handle-held error
    pub fn handle_held(owner: impl Into<String>) -> Self {
        LifecycleError::HandleHeld {
            owner: owner.into(),
        }
    }

    /// Create a worker error
    pub fn worker(reason: impl Into<String>) -> Self {
        LifecycleError::Worker {
            reason: reason.into(),
        }
    }
}

pub type LifecycleResult<T> = core::result::Result<T, LifecycleError>;
