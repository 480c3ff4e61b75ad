//! Event routing for the dispatch worker

use crate::dispatch::EventHandler;
use crate::fetch::FetchRendezvous;
use crate::stats::CoordinatorStats;
use bgio_core::{DispatchSink, EventKind, EventRecord};
use std::sync::Arc;
use tracing::trace;

/// Handler installed on the dispatch loop.
///
/// Signals fetch completion, forwards every event to the UI sink and then
/// to any extra handlers, in registration order.
pub struct EventRouter {
    rendezvous: Arc<FetchRendezvous>,
    sink: Arc<dyn DispatchSink>,
    handlers: Vec<Arc<dyn EventHandler>>,
    stats: Arc<CoordinatorStats>,
}

impl EventRouter {
    pub fn new(
        rendezvous: Arc<FetchRendezvous>,
        sink: Arc<dyn DispatchSink>,
        handlers: Vec<Arc<dyn EventHandler>>,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            rendezvous,
            sink,
            handlers,
            stats,
        }
    }
}

impl EventHandler for EventRouter {
    fn handle(&self, event: &EventRecord) {
        CoordinatorStats::bump(&self.stats.events_dispatched);
        trace!(kind = ?event.kind, key = %event.key(), "Dispatching event");

        if event.kind == EventKind::BackgroundFetchDone {
            self.rendezvous.signal();
        }

        self.sink.dispatch(event.key(), event);
        for handler in &self.handlers {
            handler.handle(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgio_harness::RecordingSink;
    use core::time::Duration;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_fetch_done_signals_and_forwards() {
        let rendezvous = Arc::new(FetchRendezvous::new());
        let sink = Arc::new(RecordingSink::new());
        let stats = Arc::new(CoordinatorStats::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let extra: Arc<dyn EventHandler> = Arc::new(move |event: &EventRecord| {
            log.lock().unwrap().push(event.kind);
        });

        let router = EventRouter::new(
            rendezvous.clone(),
            sink.clone(),
            vec![extra],
            stats.clone(),
        );

        let mut signal = rendezvous.arm();
        router.handle(&EventRecord::new(EventKind::IncomingMessage, 1).with_chat(7));
        router.handle(&EventRecord::new(EventKind::BackgroundFetchDone, 0));

        assert!(signal.wait(Duration::from_secs(1)).await);
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.keys_of(EventKind::IncomingMessage)[0].chat_id, 7);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventKind::IncomingMessage, EventKind::BackgroundFetchDone]
        );
        assert_eq!(stats.snapshot().events_dispatched, 2);
    }
}
