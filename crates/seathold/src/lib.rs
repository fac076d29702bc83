//! `seathold` - Keeps an in-progress cinema seat selection alive for a fixed time
//!
//! This library provides a single-record store with a time-to-live, backed by a
//! local `SQLite` slot, and a timer task that clears the record once it expires.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod bootstrap;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod selection;
pub mod storage;
pub mod store;
pub mod watcher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use selection::{SeatSelection, SelectionDraft, SelectionPatch};
pub use storage::{Storage, StorageStats};
pub use store::SelectionStore;
pub use watcher::{
    wait_for_hold_end, ChannelExpiryHandler, ExpiryEvent, ExpiryHandler, ExpiryWatcher,
    HoldOutcome, LogExpiryHandler, WatcherHandle, WatcherStats,
};
