//! Command-line interface for seathold.
//!
//! This module provides the CLI structure for the `seathold` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, SaveCommand, StatusCommand, UpdateCommand};

/// seathold - Hold a cinema seat selection for a limited time
///
/// Saves the seats picked for a showtime and releases them automatically once
/// the hold expires.
#[derive(Debug, Parser)]
#[command(name = "seathold")]
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
    /// Hold a new seat selection, replacing any existing one
    Save(SaveCommand),

    /// Change fields of the held selection
    Update(UpdateCommand),

    /// Print the held selection
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the time left on the hold
    Remaining {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Release the held selection
    Clear,

    /// Wait in the foreground until the hold expires
    Watch,

    /// Show store and database status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
