//! Startup plumbing: data directories and database connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Outcome of [`prepare_directories`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryReport {
    /// Directories that exist after preparation.
    pub ready: Vec<PathBuf>,
    /// Optional directories that could not be created, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl DirectoryReport {
    /// Whether every directory is in place.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Create the upload and temp directories under the data root.
///
/// Upload directories are optional: failures are logged and reported.
///
/// # Errors
///
/// Returns [`Error::DirectoryCreate`] if the temp directory cannot be created.
pub fn prepare_directories(config: &Config) -> Result<DirectoryReport> {
    let mut report = DirectoryReport::default();

    for dir in config.upload_dirs() {
        match ensure_dir(&dir) {
            Ok(()) => report.ready.push(dir),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Could not create upload directory");
                report.failed.push((dir, e.to_string()));
            }
        }
    }

    let temp = config.temp_dir();
    ensure_dir(&temp).map_err(|source| Error::DirectoryCreate {
        path: temp.clone(),
        source,
    })?;
    report.ready.push(temp);

    info!(
        ready = report.ready.len(),
        failed = report.failed.len(),
        "Data directories prepared"
    );
    Ok(report)
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    if path.is_dir() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a directory",
        ))
    }
}

/// Open the configured database, retrying on failure.
///
/// # Errors
///
/// Returns [`Error::StorageUnavailable`] once `storage.connect_attempts`
/// attempts have failed.
pub async fn open_storage_with_retry(config: &Config) -> Result<Storage> {
    let path = config.database_path();
    retry_fixed(
        config.storage.connect_attempts,
        config.connect_retry_delay(),
        || Storage::open(&path),
    )
    .await
}

/// Run `open` up to `attempts` times, sleeping `delay` between failures.
///
/// # Errors
///
/// Returns [`Error::StorageUnavailable`] carrying the last failure.
pub async fn retry_fixed<T, F>(attempts: u32, delay: Duration, mut open: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match open() {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "Database connection established after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                return Err(Error::StorageUnavailable {
                    attempts,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    attempts,
                    error = %e,
                    "Database connection failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
