//! Cross-double call ordering
//!
//! The engine and scheduler doubles each count their own calls. A shared
//! [`CallTrace`] additionally records the interleaving, which is what the
//! stop-before-release ordering depends on.

use bgio_core::TaskToken;
use std::sync::{Arc, Mutex};

/// One recorded collaborator call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracedCall {
    StartIo,
    StopIo,
    BeginTask(TaskToken),
    EndTask(TaskToken),
}

/// Ordered log shared between doubles
#[derive(Debug, Clone, Default)]
pub struct CallTrace {
    calls: Arc<Mutex<Vec<TracedCall>>>,
}

impl CallTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: TracedCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    pub fn calls(&self) -> Vec<TracedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Position of the first occurrence of `call`
    pub fn position(&self, call: TracedCall) -> Option<usize> {
        self.calls().iter().position(|c| *c == call)
    }

    /// Tasks whose end was recorded while engine I/O was running
    pub fn ended_while_running(&self) -> Vec<TaskToken> {
        let mut running = false;
        let mut ended = Vec::new();
        for call in self.calls() {
            match call {
                TracedCall::StartIo => running = true,
                TracedCall::StopIo => running = false,
                TracedCall::EndTask(token) if running => ended.push(token),
                _ => {}
            }
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_while_running_is_reported() {
        let trace = CallTrace::new();
        let (a, b) = (TaskToken::new(1), TaskToken::new(2));

        trace.record(TracedCall::BeginTask(a));
        trace.record(TracedCall::StartIo);
        trace.record(TracedCall::EndTask(a));
        trace.record(TracedCall::BeginTask(b));
        trace.record(TracedCall::StopIo);
        trace.record(TracedCall::EndTask(b));

        assert_eq!(trace.ended_while_running(), vec![a]);
        assert_eq!(trace.position(TracedCall::StopIo), Some(4));
    }
}
