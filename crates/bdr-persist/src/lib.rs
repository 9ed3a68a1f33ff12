//! Crash-safe JSON file persistence.
//!
//! [`JsonStore`] keeps one serde value in one JSON file. Saves go through a
//! temp file that is fsynced and renamed over the target, so a reader (or a
//! restart after a crash) sees either the previous record or the new one,
//! never a torn write.

#![forbid(unsafe_code)]

pub mod fsync;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fsync::{fsync_dir, fsync_file};

/// Errors from loading or saving a [`JsonStore`].
#[derive(Debug, Error)]
pub enum PersistError {
    /// A filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File or directory the operation touched.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The stored JSON could not be parsed or the value could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;

/// A single JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Addresses `<dir>/<name>.json`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.json")),
        }
    }

    /// Addresses an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored value, or `None` if nothing has been saved yet.
    pub fn try_load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::io(&self.path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Loads the stored value, falling back to `T::default()`.
    ///
    /// Read and parse failures are logged rather than returned.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        match self.try_load() {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(path = %self.path.display(), "no stored value, using default");
                T::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to load stored value, using default");
                T::default()
            }
        }
    }

    /// Atomically replaces the stored value.
    ///
    /// Writes `<file>.tmp`, fsyncs it, renames it over the target and fsyncs
    /// the parent directory.
    pub fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
        }

        let tmp_path = self.tmp_path();
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| PersistError::io(&tmp_path, e))?;
            file.write_all(&bytes)
                .map_err(|e| PersistError::io(&tmp_path, e))?;
            fsync_file(&file).map_err(|e| PersistError::io(&tmp_path, e))?;
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| PersistError::io(&self.path, e))?;

        if let Some(parent) = parent {
            fsync_dir(parent).map_err(|e| PersistError::io(parent, e))?;
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
