//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::selection::{SelectionDraft, SelectionPatch};

/// Save command arguments.
#[derive(Debug, Args)]
pub struct SaveCommand {
    /// Showtime the seats belong to
    #[arg(long, value_name = "ID")]
    pub showtime: String,

    /// Seat to hold (repeat for several seats)
    #[arg(short, long = "seat", value_name = "SEAT", required = true)]
    pub seats: Vec<String>,

    /// Movie identifier
    #[arg(long, value_name = "ID")]
    pub movie: Option<String>,

    /// Theater identifier
    #[arg(long, value_name = "ID")]
    pub theater: Option<String>,

    /// Booking identifier, once one exists
    #[arg(long, value_name = "ID")]
    pub booking: Option<String>,

    /// Total price of the held seats
    #[arg(short, long, default_value_t = 0.0)]
    pub amount: f64,
}

impl From<SaveCommand> for SelectionDraft {
    fn from(cmd: SaveCommand) -> Self {
        let mut draft = Self::new(cmd.showtime, cmd.seats).with_amount(cmd.amount);
        if let Some(booking) = cmd.booking {
            draft = draft.with_booking(booking);
        }
        draft.movie_id = cmd.movie;
        draft.theater_id = cmd.theater;
        draft
    }
}

/// Update command arguments. Only the given fields change.
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// Replace the held seats (repeat for several seats)
    #[arg(short, long = "seat", value_name = "SEAT")]
    pub seats: Vec<String>,

    /// New showtime identifier
    #[arg(long, value_name = "ID")]
    pub showtime: Option<String>,

    /// New movie identifier
    #[arg(long, value_name = "ID")]
    pub movie: Option<String>,

    /// New theater identifier
    #[arg(long, value_name = "ID")]
    pub theater: Option<String>,

    /// New booking identifier
    #[arg(long, value_name = "ID")]
    pub booking: Option<String>,

    /// New total price
    #[arg(short, long)]
    pub amount: Option<f64>,
}

impl From<UpdateCommand> for SelectionPatch {
    fn from(cmd: UpdateCommand) -> Self {
        Self {
            seats: (!cmd.seats.is_empty()).then(|| cmd.seats.into_iter().collect()),
            showtime_id: cmd.showtime,
            movie_id: cmd.movie,
            theater_id: cmd.theater,
            booking_id: cmd.booking,
            total_amount: cmd.amount,
        }
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
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

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
