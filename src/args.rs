//! Command-line argument definitions for the drover binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Drover - autonomous task execution daemon
#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "Drover - autonomous task execution daemon")]
#[command(
    long_about = "Drover watches a shared task queue, hands claimed tasks to a coding agent, \
and learns durable preferences from user feedback.

USAGE MODES:
  drover                      Run the daemon (coordinator + learning loops)
  drover distill              Run a single rule distillation pass and exit
  drover recover              Reset stale in-progress tasks and exit
  drover config show          Print the effective configuration
  drover config init          Write a default configuration file"
)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (defaults to drover/drover.toml under the user config dir)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Store service URL (overrides the configured store and selects the HTTP backend)
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Enable verbose output (debug-level logging)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon (default when no subcommand is given)
    Run,

    /// Run a single rule distillation pass and print the outcome
    Distill,

    /// Reset tasks stuck in progress past the stale cutoff, then exit
    Recover,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration as TOML
    Show,

    /// Validate the configuration file
    Validate,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
