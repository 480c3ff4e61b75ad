//! Engine events
//!
//! Records produced by the engine's event emitter. The coordinator drains
//! them once, forwards them and does not retain them.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Event Kind
// ----------------------------------------------------------------------------

/// Kind of engine event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warning,
    Error,
    IncomingMessage,
    IncomingReaction,
    IncomingWebxdcNotify,
    IncomingCall,
    IncomingCallAccepted,
    CallEnded,
    MessagesChanged,
    ConnectivityChanged,
    /// Engine finished a bounded background fetch
    BackgroundFetchDone,
    /// Any event id the coordinator has no special handling for
    Other(i32),
}

impl EventKind {
    /// Events that tell the user something arrived
    pub fn is_incoming(self) -> bool {
        matches!(
            self,
            EventKind::IncomingMessage
                | EventKind::IncomingReaction
                | EventKind::IncomingWebxdcNotify
                | EventKind::IncomingCall
        )
    }
}

// ----------------------------------------------------------------------------
// Event Record
// ----------------------------------------------------------------------------

/// A single event pulled from the engine emitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: EventKind,
    pub account_id: u32,
    pub chat_id: u32,
    pub message_id: u32,
    pub payload: Option<String>,
}

impl EventRecord {
    pub fn new(kind: EventKind, account_id: u32) -> Self {
        Self {
            kind,
            account_id,
            chat_id: 0,
            message_id: 0,
            payload: None,
        }
    }

    pub fn with_chat(mut self, chat_id: u32) -> Self {
        self.chat_id = chat_id;
        self
    }

    pub fn with_message(mut self, message_id: u32) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Key the UI sink uses to route this event
    pub fn key(&self) -> DispatchKey {
        DispatchKey {
            account_id: self.account_id,
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}

// ----------------------------------------------------------------------------
// Dispatch Key
// ----------------------------------------------------------------------------

/// Routing key for the UI-facing dispatch sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchKey {
    pub account_id: u32,
    pub chat_id: u32,
    pub message_id: u32,
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account={} chat={} msg={}",
            self.account_id, self.chat_id, self.message_id
        )
    }
}
