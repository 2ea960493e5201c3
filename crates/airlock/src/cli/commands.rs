//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Send command arguments.
#[derive(Debug, Args)]
pub struct SendCommand {
    /// Number of sample packets to send (0 = until stopped)
    #[arg(short = 'n', long, default_value = "10")]
    pub count: u32,

    /// Milliseconds between packets
    #[arg(short, long, default_value = "2000")]
    pub interval_ms: u64,

    /// Receiver address (defaults to the configured transport bind)
    #[arg(short, long)]
    pub target: Option<String>,
}

/// Last command arguments.
#[derive(Debug, Args)]
pub struct LastCommand {
    /// Number of rows to print
    #[arg(default_value = "10")]
    pub count: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// Path to the file to validate (defaults to the standard location)
        file: Option<PathBuf>,
    },
}
