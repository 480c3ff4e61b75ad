//! bgio CLI library
//!
//! Argument parsing, configuration loading and the command handlers behind
//! the `bgio` binary, which exercises the lifecycle coordinator against a
//! simulated engine and OS.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{run_simulation, CommandDispatcher, SimulationOptions, SimulationReport};
pub use config::AppConfig;
pub use error::{CliError, Result};
