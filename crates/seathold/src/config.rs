//! Configuration management for seathold.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "seathold";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "selection.db";

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `SEATHOLD_SELECTION__TTL_SECONDS=120`.
const ENV_PREFIX: &str = "SEATHOLD_";

/// Longest hold a selection may be given, in seconds (one day).
pub const MAX_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SEATHOLD_`)
/// 2. TOML config file at `~/.config/seathold/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Seat selection configuration.
    pub selection: SelectionConfig,
    /// Data directory layout.
    pub directories: DirectoryConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/seathold/selection.db`
    pub database_path: Option<PathBuf>,
    /// How many times to try opening the database before giving up.
    pub connect_attempts: u32,
    /// Fixed delay between open attempts in milliseconds.
    pub connect_retry_delay_ms: u64,
}

/// Seat selection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Time-to-live of a saved selection in seconds.
    pub ttl_seconds: u64,
    /// Slot key the selection is stored under.
    pub storage_key: String,
    /// Maximum number of seats in a single selection.
    pub max_seats: usize,
    /// Regex every seat identifier must match.
    pub seat_id_pattern: String,
}

/// Data directory layout, created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Root of the data directory.
    /// Defaults to `~/.local/share/seathold`
    pub root: Option<PathBuf>,
    /// Upload directories relative to the root. Failing to create these is not fatal.
    pub upload_dirs: Vec<PathBuf>,
    /// Temp directory relative to the root. Startup fails if it cannot be created.
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved at runtime
            connect_attempts: 5,
            connect_retry_delay_ms: 5_000,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 10 * 60,
            storage_key: "seat_selection".to_string(),
            max_seats: 10,
            seat_id_pattern: r"^[A-Z]{1,2}[0-9]{1,3}$".to_string(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            root: None,
            upload_dirs: vec![PathBuf::from("uploads/images"), PathBuf::from("uploads/videos")],
            temp_dir: PathBuf::from("temp"),
        }
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_TTL_SECONDS).contains(&self.selection.ttl_seconds) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "ttl_seconds must be between 1 and {MAX_TTL_SECONDS}, got {}",
                    self.selection.ttl_seconds
                ),
            });
        }

        if self.selection.storage_key.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "storage_key cannot be empty".to_string(),
            });
        }

        if self.selection.max_seats == 0 {
            return Err(Error::ConfigValidation {
                message: "max_seats must be greater than 0".to_string(),
            });
        }

        if regex::Regex::new(&self.selection.seat_id_pattern).is_err() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "invalid regex pattern: {}",
                    self.selection.seat_id_pattern
                ),
            });
        }

        if self.storage.connect_attempts == 0 {
            return Err(Error::ConfigValidation {
                message: "connect_attempts must be at least 1".to_string(),
            });
        }

        if self.directories.temp_dir.as_os_str().is_empty() {
            return Err(Error::ConfigValidation {
                message: "temp_dir cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the data root, resolving defaults if not set.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.directories
            .root
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the absolute temp directory.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir().join(&self.directories.temp_dir)
    }

    /// Get the absolute upload directories.
    #[must_use]
    pub fn upload_dirs(&self) -> Vec<PathBuf> {
        let root = self.data_dir();
        self.directories
            .upload_dirs
            .iter()
            .map(|dir| root.join(dir))
            .collect()
    }

    /// Get the selection TTL as a Duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.selection.ttl_seconds)
    }

    /// Get the delay between database open attempts.
    #[must_use]
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.storage.connect_retry_delay_ms)
    }
}
