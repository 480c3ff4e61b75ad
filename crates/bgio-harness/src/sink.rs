//! Recording dispatch sink

use bgio_core::{DispatchKey, DispatchSink, EventKind, EventRecord};
use std::sync::Mutex;

/// Sink that keeps every dispatched key and event kind in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<(DispatchKey, EventKind)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<(DispatchKey, EventKind)> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of events of the given kind
    pub fn keys_of(&self, kind: EventKind) -> Vec<DispatchKey> {
        self.received()
            .into_iter()
            .filter(|(_, k)| *k == kind)
            .map(|(key, _)| key)
            .collect()
    }
}

impl DispatchSink for RecordingSink {
    fn dispatch(&self, key: DispatchKey, event: &EventRecord) {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key, event.kind));
    }
}
