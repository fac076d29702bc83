//! Storage layer for seathold.
//!
//! This module provides `SQLite`-backed key/value slots, the durable
//! equivalent of browser local storage. Each payload is stored with a BLAKE3
//! hash so damaged rows can be told apart from intact ones.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// A single stored key/value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// The slot key.
    pub key: String,
    /// The raw payload, normally JSON.
    pub payload: String,
    /// BLAKE3 hash recorded when the payload was written.
    pub payload_hash: String,
    /// When the slot was last written.
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// Compute the BLAKE3 hash of a payload.
    #[must_use]
    pub fn compute_hash(payload: &str) -> String {
        blake3::hash(payload.as_bytes()).to_hex().to_string()
    }

    /// Whether the payload still matches the hash it was written with.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        Self::compute_hash(&self.payload) == self.payload_hash
    }
}

/// Storage engine for selection slots.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `payload` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put(&self, key: &str, payload: &str) -> Result<()> {
        let hash = Slot::compute_hash(payload);
        let updated_at = Utc::now().to_rfc3339();

        self.conn.execute(
            r"
            INSERT INTO slots (key, payload, payload_hash, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                payload_hash = excluded.payload_hash,
                updated_at = excluded.updated_at
            ",
            params![key, payload, hash, updated_at],
        )?;

        debug!("Wrote slot {} ({} bytes)", key, payload.len());
        Ok(())
    }

    /// Read the slot stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, key: &str) -> Result<Option<Slot>> {
        let slot = self
            .conn
            .query_row(
                "SELECT key, payload, payload_hash, updated_at FROM slots WHERE key = ?1",
                [key],
                Self::row_to_slot,
            )
            .optional()?;
        Ok(slot)
    }

    /// Delete the slot stored under `key`.
    ///
    /// Returns `true` if a slot was deleted, `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM slots WHERE key = ?1", [key])?;
        if affected > 0 {
            debug!("Removed slot {}", key);
        }
        Ok(affected > 0)
    }

    /// Count stored slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM slots", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_slots = self.count()?;

        let last_write: Option<String> = self
            .conn
            .query_row(
                "SELECT updated_at FROM slots ORDER BY updated_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_write = last_write
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_slots,
            last_write,
            db_size_bytes,
        })
    }

    fn row_to_slot(row: &rusqlite::Row) -> rusqlite::Result<Slot> {
        let key: String = row.get(0)?;
        let payload: String = row.get(1)?;
        let payload_hash: String = row.get(2)?;
        let updated_at_str: String = row.get(3)?;

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str).map_or_else(
            |_| {
                warn!("Unparseable updated_at for slot {}: {}", key, updated_at_str);
                Utc::now()
            },
            |dt| dt.with_timezone(&Utc),
        );

        Ok(Slot {
            key,
            payload,
            payload_hash,
            updated_at,
        })
    }

    /// Overwrite a slot's payload without refreshing its hash.
    #[cfg(test)]
    pub(crate) fn corrupt_payload(&self, key: &str, payload: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE slots SET payload = ?2 WHERE key = ?1",
            params![key, payload],
        )?;
        Ok(())
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of stored slots.
    pub total_slots: i64,
    /// Timestamp of the most recent write.
    pub last_write: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
