//! Lifecycle Harness
//!
//! Test doubles for the coordinator's collaborators. Each double records the
//! calls it receives so tests can assert engine call counts and background
//! task balance without a real engine or OS.

pub mod clock;
pub mod engine;
pub mod network;
pub mod scheduler;
pub mod sink;
pub mod trace;

pub use clock::{ManualClock, TokioClock};
pub use engine::{MockEngine, MockEngineConfig, MockEmitter};
pub use network::MockNetwork;
pub use scheduler::MockScheduler;
pub use sink::RecordingSink;
pub use trace::{CallTrace, TracedCall};
