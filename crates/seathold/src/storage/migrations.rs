//! Schema versioning for the slot database.
//!
//! Each entry in [`MIGRATIONS`] moves the schema up by one version. Pending
//! steps run in one transaction together with the version bump, so a failed
//! upgrade leaves the database at its previous version.

use std::cmp::Ordering;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The schema version this build writes.
pub const CURRENT_VERSION: i32 = 2;

/// Metadata key holding the schema version.
const VERSION_KEY: &str = "schema_version";

/// Ordered upgrade steps. Version 1 is the base tables from [`SCHEMA_STATEMENTS`].
const MIGRATIONS: &[(i32, &str)] = &[
    (1, ""),
    (
        2,
        "CREATE INDEX IF NOT EXISTS idx_slots_updated_at ON slots(updated_at)",
    ),
];

/// Create the base tables if missing and apply any pending migrations.
///
/// # Errors
///
/// Returns an error if a statement fails, the stored version is unreadable,
/// or the database was written by a newer seathold.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute_batch(statement)?;
    }

    let stored = stored_version(conn)?;
    match stored.cmp(&CURRENT_VERSION) {
        Ordering::Equal => Ok(()),
        Ordering::Less => upgrade(conn, stored),
        Ordering::Greater => Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
            ),
        }),
    }
}

/// The recorded schema version, 0 for a fresh database.
fn stored_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value.map_or(Ok(0), |value| {
        value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("stored schema version is not a number: {value}"),
        })
    })
}

fn record_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn upgrade(conn: &Connection, from: i32) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for (version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > from) {
        debug!(version, "Applying schema migration");
        if !sql.is_empty() {
            tx.execute_batch(sql)?;
        }
    }
    record_version(&tx, CURRENT_VERSION)?;
    tx.commit()?;

    info!(from, to = CURRENT_VERSION, "Database schema upgraded");
    Ok(())
}
