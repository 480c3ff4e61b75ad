//! Mock Engine for Testing
//!
//! Simulates the engine's I/O switch, its blocking event emitter and bounded
//! background fetch. Every call is counted.

use crate::trace::{CallTrace, TracedCall};
use bgio_core::{Engine, EventEmitter, EventKind, EventRecord};
use core::time::Duration;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
};
use tracing::debug;

// ----------------------------------------------------------------------------
// Mock Engine Configuration
// ----------------------------------------------------------------------------

/// Configuration for mock engine behavior
#[derive(Debug, Clone)]
pub struct MockEngineConfig {
    /// Value returned from `background_fetch`
    pub fetch_succeeds: bool,
    /// Emit a `BackgroundFetchDone` event at the end of each fetch
    pub emit_fetch_done: bool,
    /// Time a fetch takes (capped by the caller's timeout)
    pub fetch_duration: Duration,
    /// Emit a terminal event on every `stop_io`
    pub emit_on_stop: bool,
}

impl Default for MockEngineConfig {
    fn default() -> Self {
        Self {
            fetch_succeeds: true,
            emit_fetch_done: true,
            fetch_duration: Duration::ZERO,
            emit_on_stop: true,
        }
    }
}

impl MockEngineConfig {
    /// Engine whose fetches never report completion
    pub fn silent() -> Self {
        Self {
            emit_fetch_done: false,
            ..Self::default()
        }
    }

    /// Engine whose fetches fail
    pub fn failing() -> Self {
        Self {
            fetch_succeeds: false,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Emitter
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EmitterQueue {
    events: VecDeque<EventRecord>,
    closed: bool,
}

/// Blocking queue standing in for the engine's event emitter
#[derive(Debug, Default)]
pub struct MockEmitter {
    queue: Mutex<EmitterQueue>,
    available: Condvar,
    pulled: AtomicU64,
}

impl MockEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next `next_event` call
    pub fn push(&self, event: EventRecord) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.events.push_back(event);
        self.available.notify_all();
    }

    /// Finish the stream; `next_event` returns `None` once the queue is empty
    pub fn close(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.closed = true;
        self.available.notify_all();
    }

    /// Number of events still waiting to be pulled
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .len()
    }

    /// Number of events handed out so far
    pub fn pulled(&self) -> u64 {
        self.pulled.load(Ordering::SeqCst)
    }
}

impl EventEmitter for MockEmitter {
    fn next_event(&self) -> Option<EventRecord> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(event) = queue.events.pop_front() {
                self.pulled.fetch_add(1, Ordering::SeqCst);
                return Some(event);
            }
            if queue.closed {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

// ----------------------------------------------------------------------------
// Mock Engine
// ----------------------------------------------------------------------------

/// Counting engine double
#[derive(Debug)]
pub struct MockEngine {
    config: MockEngineConfig,
    emitter: Arc<MockEmitter>,
    io_running: AtomicBool,
    start_io_calls: AtomicU64,
    stop_io_calls: AtomicU64,
    maybe_network_calls: AtomicU64,
    maybe_network_lost_calls: AtomicU64,
    background_fetch_calls: AtomicU64,
    trace: Option<CallTrace>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new(MockEngineConfig::default())
    }
}

impl MockEngine {
    pub fn new(config: MockEngineConfig) -> Self {
        Self {
            config,
            emitter: Arc::new(MockEmitter::new()),
            io_running: AtomicBool::new(false),
            start_io_calls: AtomicU64::new(0),
            stop_io_calls: AtomicU64::new(0),
            maybe_network_calls: AtomicU64::new(0),
            maybe_network_lost_calls: AtomicU64::new(0),
            background_fetch_calls: AtomicU64::new(0),
            trace: None,
        }
    }

    /// Record I/O switches into a trace shared with other doubles
    pub fn with_trace(mut self, trace: CallTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    fn record(&self, call: TracedCall) {
        if let Some(trace) = &self.trace {
            trace.record(call);
        }
    }

    /// Concrete handle on the emitter for pushing events in tests
    pub fn emitter(&self) -> Arc<MockEmitter> {
        Arc::clone(&self.emitter)
    }

    pub fn is_io_running(&self) -> bool {
        self.io_running.load(Ordering::SeqCst)
    }

    pub fn start_io_calls(&self) -> u64 {
        self.start_io_calls.load(Ordering::SeqCst)
    }

    pub fn stop_io_calls(&self) -> u64 {
        self.stop_io_calls.load(Ordering::SeqCst)
    }

    pub fn maybe_network_calls(&self) -> u64 {
        self.maybe_network_calls.load(Ordering::SeqCst)
    }

    pub fn maybe_network_lost_calls(&self) -> u64 {
        self.maybe_network_lost_calls.load(Ordering::SeqCst)
    }

    pub fn background_fetch_calls(&self) -> u64 {
        self.background_fetch_calls.load(Ordering::SeqCst)
    }
}

impl Engine for MockEngine {
    fn start_io(&self) {
        self.start_io_calls.fetch_add(1, Ordering::SeqCst);
        self.io_running.store(true, Ordering::SeqCst);
        self.record(TracedCall::StartIo);
        debug!("mock engine: start_io");
    }

    fn stop_io(&self) {
        self.stop_io_calls.fetch_add(1, Ordering::SeqCst);
        self.io_running.store(false, Ordering::SeqCst);
        self.record(TracedCall::StopIo);
        if self.config.emit_on_stop {
            self.emitter
                .push(EventRecord::new(EventKind::Info, 0).with_payload("io stopped"));
        }
        debug!("mock engine: stop_io");
    }

    fn maybe_network(&self) {
        self.maybe_network_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn maybe_network_lost(&self) {
        self.maybe_network_lost_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn event_emitter(&self) -> Arc<dyn EventEmitter> {
        self.emitter.clone()
    }

    fn background_fetch(&self, timeout: Duration) -> bool {
        self.background_fetch_calls.fetch_add(1, Ordering::SeqCst);
        debug!(?timeout, "mock engine: background_fetch");

        let duration = self.config.fetch_duration.min(timeout);
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }

        if self.config.emit_fetch_done {
            self.emitter
                .push(EventRecord::new(EventKind::BackgroundFetchDone, 0));
        }
        self.config.fetch_succeeds && self.config.fetch_duration <= timeout
    }
}
