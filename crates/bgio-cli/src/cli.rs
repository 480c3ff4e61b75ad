//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Shared state file, overriding the configured location
    #[arg(short, long)]
    pub state_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a background session against the simulated engine
    Simulate {
        /// Background time the simulated OS grants after leaving the foreground
        #[arg(long, default_value_t = 12)]
        remaining_secs: u64,
        /// Delay between the remote push and the OS background fetch
        #[arg(long, default_value_t = 200)]
        push_gap_ms: u64,
        /// Simulated engine never reports fetch completion
        #[arg(long)]
        silent: bool,
    },
    /// Show the persisted shared state
    Status,
    /// Print the effective configuration as TOML
    Config,
}
