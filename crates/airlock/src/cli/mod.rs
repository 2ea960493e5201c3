//! Command-line interface for airlock.
//!
//! This module provides the CLI structure and command handlers for the
//! `airlock` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, LastCommand, SendCommand};

/// airlock - Encrypted drone telemetry receiver
///
/// Receives authenticated telemetry over UDP, rejects replayed and stale
/// packets, stores accepted readings, and serves time-windowed queries and
/// aggregates over the history.
#[derive(Debug, Parser)]
#[command(name = "airlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the receiver and query API
    Serve,

    /// Emit encrypted sample telemetry at a receiver
    Send(SendCommand),

    /// Print the most recent stored readings
    Last(LastCommand),

    /// Generate a fresh shared key
    Keygen,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
