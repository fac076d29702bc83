//! `seathold` - CLI for the seat selection store
//!
//! This binary saves, inspects and releases the held seat selection, and can
//! wait in the foreground for the hold to expire.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info};

use seathold::bootstrap::{open_storage_with_retry, prepare_directories};
use seathold::cli::{Cli, Command, ConfigCommand, UpdateCommand};
use seathold::{
    init_logging, wait_for_hold_end, Config, HoldOutcome, SeatSelection, SelectionDraft,
    SelectionPatch, SelectionStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        // Configuration commands never touch the database
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        command => {
            let store = open_store(&config).await?;
            run(command, &config, store).await
        }
    }
}

async fn run(command: Command, config: &Config, store: Arc<SelectionStore>) -> anyhow::Result<()> {
    match command {
        Command::Save(save_cmd) => handle_save(&store, save_cmd.into()),
        Command::Update(update_cmd) => handle_update(&store, update_cmd),
        Command::Show { json } => handle_show(&store, json),
        Command::Remaining { json } => handle_remaining(&store, json),
        Command::Clear => handle_clear(&store),
        Command::Watch => handle_watch(store).await,
        Command::Status(status_cmd) => handle_status(config, &store, status_cmd.json),
        Command::Config(config_cmd) => handle_config(config, config_cmd),
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<SelectionStore>> {
    prepare_directories(config).context("failed to prepare data directories")?;

    let storage = open_storage_with_retry(config)
        .await
        .context("database unavailable")?;

    let store = SelectionStore::new(storage, &config.selection)
        .context("failed to load seat selection")?;
    debug!(key = store.key(), "Selection store ready");
    Ok(Arc::new(store))
}

fn handle_save(store: &SelectionStore, draft: SelectionDraft) -> anyhow::Result<()> {
    let selection = store.save(draft).context("failed to save selection")?;
    println!(
        "Holding {} seat(s) for showtime {} until {}",
        selection.seat_count(),
        selection.showtime_id,
        selection.expires_at.to_rfc3339()
    );
    Ok(())
}

fn handle_update(store: &SelectionStore, cmd: UpdateCommand) -> anyhow::Result<()> {
    let patch = SelectionPatch::from(cmd);
    if patch.is_empty() {
        bail!("nothing to update: pass at least one field");
    }

    match store.update(patch).context("failed to update selection")? {
        Some(selection) => {
            println!("Selection updated");
            print_selection(&selection, store);
        }
        None => println!("No active selection; nothing updated"),
    }
    Ok(())
}

fn handle_show(store: &SelectionStore, json: bool) -> anyhow::Result<()> {
    let current = store.current().context("failed to read selection")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&current)?);
        return Ok(());
    }

    match current {
        Some(selection) => print_selection(&selection, store),
        None if store.is_expired() => println!("The hold expired and the seats were released"),
        None => println!("No active selection"),
    }
    Ok(())
}

fn handle_remaining(store: &SelectionStore, json: bool) -> anyhow::Result<()> {
    let remaining = store.remaining_time().context("failed to read selection")?;

    if json {
        let body = serde_json::json!({
            "remaining_seconds": remaining.as_secs(),
            "expires_at": store.deadline(),
            "expired": store.is_expired(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", format_remaining(remaining));
    }
    Ok(())
}

fn handle_clear(store: &SelectionStore) -> anyhow::Result<()> {
    if store.clear().context("failed to clear selection")? {
        println!("Selection released");
    } else {
        println!("No selection to release");
    }
    Ok(())
}

async fn handle_watch(store: Arc<SelectionStore>) -> anyhow::Result<()> {
    let Some(selection) = store.current().context("failed to read selection")? else {
        println!("No active selection");
        return Ok(());
    };

    println!(
        "Watching hold on {} seat(s), {} left (Ctrl-C to stop)",
        selection.seat_count(),
        format_remaining(selection.remaining_at(store.now()).to_std().unwrap_or_default())
    );

    tokio::select! {
        outcome = wait_for_hold_end(store) => match outcome? {
            HoldOutcome::Expired(event) => println!(
                "Hold expired at {}; seats released",
                event.detected_at.to_rfc3339()
            ),
            HoldOutcome::Released => println!("Hold was released before it expired"),
        },
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Interrupted, hold left in place");
        }
    }
    Ok(())
}

fn handle_status(config: &Config, store: &SelectionStore, json: bool) -> anyhow::Result<()> {
    let stats = store.storage_stats().context("failed to read storage stats")?;
    let current = store.current().context("failed to read selection")?;
    let remaining = store.remaining_time()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "storage_key": store.key(),
            "ttl_seconds": config.selection.ttl_seconds,
            "active": current.is_some(),
            "expired": store.is_expired(),
            "remaining_seconds": remaining.as_secs(),
            "total_slots": stats.total_slots,
            "last_write": stats.last_write,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("seathold status");
        println!("---------------");
        println!("Database:      {}", config.database_path().display());
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!("Slots:         {}", stats.total_slots);
        println!("Hold time:     {}", format_remaining(config.ttl()));
        match current {
            Some(selection) => {
                println!(
                    "Selection:     {} seat(s), {}",
                    selection.seat_count(),
                    selection.showtime_id
                );
                println!("Remaining:     {}", format_remaining(remaining));
            }
            None if store.is_expired() => println!("Selection:     expired"),
            None => println!("Selection:     none"),
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Connect attempts:   {}", config.storage.connect_attempts);
                println!(
                    "  Retry delay (ms):   {}",
                    config.storage.connect_retry_delay_ms
                );
                println!();
                println!("[Selection]");
                println!("  TTL (seconds):      {}", config.selection.ttl_seconds);
                println!("  Storage key:        {}", config.selection.storage_key);
                println!("  Max seats:          {}", config.selection.max_seats);
                println!("  Seat id pattern:    {}", config.selection.seat_id_pattern);
                println!();
                println!("[Directories]");
                println!("  Root:               {}", config.data_dir().display());
                for dir in config.upload_dirs() {
                    println!("  Upload:             {}", dir.display());
                }
                println!("  Temp:               {}", config.temp_dir().display());
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_selection(selection: &SeatSelection, store: &SelectionStore) {
    let seats: Vec<&str> = selection.seats.iter().map(String::as_str).collect();
    println!("Showtime:      {}", selection.showtime_id);
    println!("Seats:         {}", seats.join(", "));
    if let Some(movie) = &selection.movie_id {
        println!("Movie:         {movie}");
    }
    if let Some(theater) = &selection.theater_id {
        println!("Theater:       {theater}");
    }
    if let Some(booking) = &selection.booking_id {
        println!("Booking:       {booking}");
    }
    println!("Total:         {:.2}", selection.total_amount);
    println!("Expires:       {}", selection.expires_at.to_rfc3339());
    let remaining = selection.remaining_at(store.now()).to_std().unwrap_or_default();
    println!("Remaining:     {}", format_remaining(remaining));
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}m {:02}s", secs / 60, secs % 60)
}
