//! Mock OS background scheduler
//!
//! Hands out task tokens, keeps their expiration callbacks so tests can fire
//! them, and tracks how many times each token was ended.

use crate::trace::{CallTrace, TracedCall};
use bgio_core::{BackgroundScheduler, ExpirationCallback, TaskToken};
use core::time::Duration;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};
use tokio::time::Instant;
use tracing::debug;

/// How the remaining background time is computed
#[derive(Debug, Clone, Copy)]
enum Remaining {
    Fixed(Duration),
    /// Budget counting down on tokio's clock from `since`
    Countdown { total: Duration, since: Instant },
}

#[derive(Debug, Clone, Default)]
struct TaskRecord {
    end_count: u32,
    begun_at: Option<Instant>,
    ended_at: Option<Instant>,
}

/// Recording implementation of [`BackgroundScheduler`]
pub struct MockScheduler {
    next_id: AtomicU64,
    remaining: Mutex<Remaining>,
    tasks: Mutex<BTreeMap<TaskToken, TaskRecord>>,
    expirations: Mutex<HashMap<TaskToken, ExpirationCallback>>,
    trace: Option<CallTrace>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::with_fixed_remaining(Duration::from_secs(30))
    }
}

impl MockScheduler {
    /// Scheduler that always reports the same remaining time
    pub fn with_fixed_remaining(remaining: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            remaining: Mutex::new(Remaining::Fixed(remaining)),
            tasks: Mutex::new(BTreeMap::new()),
            expirations: Mutex::new(HashMap::new()),
            trace: None,
        }
    }

    /// Record begin/end calls into a trace shared with other doubles
    pub fn with_trace(mut self, trace: CallTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    fn record(&self, call: TracedCall) {
        if let Some(trace) = &self.trace {
            trace.record(call);
        }
    }

    /// Scheduler whose remaining time counts down from now on tokio's clock
    pub fn with_budget(total: Duration) -> Self {
        let scheduler = Self::with_fixed_remaining(total);
        scheduler.reset_budget(total);
        scheduler
    }

    /// Restart the countdown with a fresh budget
    pub fn reset_budget(&self, total: Duration) {
        *lock(&self.remaining) = Remaining::Countdown {
            total,
            since: Instant::now(),
        };
    }

    pub fn set_fixed_remaining(&self, remaining: Duration) {
        *lock(&self.remaining) = Remaining::Fixed(remaining);
    }

    /// Tokens handed out so far
    pub fn begun(&self) -> Vec<TaskToken> {
        lock(&self.tasks).keys().copied().collect()
    }

    pub fn begin_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Total number of `end_background_task` calls
    pub fn end_count(&self) -> u32 {
        lock(&self.tasks).values().map(|t| t.end_count).sum()
    }

    pub fn end_count_for(&self, token: TaskToken) -> u32 {
        lock(&self.tasks)
            .get(&token)
            .map(|t| t.end_count)
            .unwrap_or(0)
    }

    /// Every token begun so far was ended exactly once
    pub fn is_balanced(&self) -> bool {
        lock(&self.tasks).values().all(|t| t.end_count == 1)
    }

    /// Tokens currently begun but not ended
    pub fn outstanding(&self) -> Vec<TaskToken> {
        lock(&self.tasks)
            .iter()
            .filter(|(_, t)| t.end_count == 0)
            .map(|(token, _)| *token)
            .collect()
    }

    /// Time between beginning and ending `token`, if it was ended
    pub fn held_for(&self, token: TaskToken) -> Option<Duration> {
        let tasks = lock(&self.tasks);
        let record = tasks.get(&token)?;
        Some(record.ended_at?.duration_since(record.begun_at?))
    }

    /// Fire the expiration callback the OS would invoke for `token`
    pub fn expire(&self, token: TaskToken) -> bool {
        let callback = lock(&self.expirations).remove(&token);
        match callback {
            Some(callback) => {
                debug!(%token, "mock scheduler: firing expiration");
                callback();
                true
            }
            None => false,
        }
    }

    /// Fire every outstanding expiration callback
    pub fn expire_all(&self) -> usize {
        let callbacks: Vec<_> = lock(&self.expirations).drain().collect();
        let fired = callbacks.len();
        for (_, callback) in callbacks {
            callback();
        }
        fired
    }
}

impl BackgroundScheduler for MockScheduler {
    fn begin_background_task(&self, on_expire: ExpirationCallback) -> TaskToken {
        let token = TaskToken::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.tasks).insert(
            token,
            TaskRecord {
                begun_at: Some(Instant::now()),
                ..TaskRecord::default()
            },
        );
        lock(&self.expirations).insert(token, on_expire);
        self.record(TracedCall::BeginTask(token));
        debug!(%token, "mock scheduler: begin");
        token
    }

    fn end_background_task(&self, token: TaskToken) {
        lock(&self.expirations).remove(&token);
        let mut tasks = lock(&self.tasks);
        let record = tasks.entry(token).or_default();
        record.end_count += 1;
        record.ended_at = Some(Instant::now());
        let end_count = record.end_count;
        drop(tasks);
        self.record(TracedCall::EndTask(token));
        debug!(%token, end_count, "mock scheduler: end");
    }

    fn background_time_remaining(&self) -> Duration {
        match *lock(&self.remaining) {
            Remaining::Fixed(remaining) => remaining,
            Remaining::Countdown { total, since } => total.saturating_sub(since.elapsed()),
        }
    }
}
