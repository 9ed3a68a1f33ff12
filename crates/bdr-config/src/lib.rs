//! Configuration store for the OpenBDR logging host.
//!
//! The host keeps two small JSON files in its home directory (`~/.openbdr` by
//! default): `config.json`, owned by this crate, and `state.json`, owned by
//! `bdr-logs`. [`AgentPaths`] names both; [`ConfigStore`] loads and saves the
//! first one through [`bdr_persist::JsonStore`].

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use bdr_persist::{JsonStore, PersistError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default size threshold before a log file is rotated (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default number of buffered events that forces a flush.
pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 10;

/// Default idle interval after which pending events are flushed.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Default extension of log record files.
pub const DEFAULT_FILE_EXTENSION: &str = "jsonl";

/// Name of the host home directory under the user's home.
pub const HOME_DIR_NAME: &str = ".openbdr";

/// Errors raised by the configuration store.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read or parsed.
    #[error("failed to load config from {}: {source}", path.display())]
    Load {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying persistence error.
        #[source]
        source: PersistError,
    },

    /// The configuration file could not be written.
    #[error("failed to save config to {}: {source}", path.display())]
    Save {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying persistence error.
        #[source]
        source: PersistError,
    },

    /// The configuration parsed but holds unusable values.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Well-known file locations of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    /// Home directory holding config, state and (by default) logs.
    pub home: PathBuf,
    /// `config.json`
    pub config_file: PathBuf,
    /// `state.json`
    pub state_file: PathBuf,
    /// Default log root when the config does not name one.
    pub default_log_dir: PathBuf,
}

impl AgentPaths {
    /// Lays out the well-known files under `home`.
    pub fn from_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            config_file: home.join("config.json"),
            state_file: home.join("state.json"),
            default_log_dir: home.join("logs"),
            home,
        }
    }

    /// `~/.openbdr`, if the user's home directory can be determined.
    pub fn default_home() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(HOME_DIR_NAME))
    }
}

/// Contents of `config.json`.
///
/// Every field is optional on disk; unknown keys are ignored so older hosts
/// can read files written by newer ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// Root of the partitioned log tree. `None` means the home's `logs/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Size in bytes at which the active file is rotated.
    pub max_file_size: u64,
    /// Buffered events that force a flush.
    pub flush_batch_size: usize,
    /// Seconds of inactivity after which pending events are flushed.
    pub flush_interval_secs: u64,
    /// Extension of log record files, without the dot.
    pub file_extension: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

impl HostConfig {
    /// Checks that the tuning values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size == 0 {
            return Err(ConfigError::Invalid("maxFileSize must be positive".to_string()));
        }
        if self.flush_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "flushBatchSize must be positive".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flushIntervalSecs must be positive".to_string(),
            ));
        }
        let ext = self.file_extension.trim_start_matches('.');
        if ext.is_empty() || ext.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "fileExtension {:?} is not a usable extension",
                self.file_extension
            )));
        }
        Ok(())
    }
}

/// The loaded configuration plus the file it lives in.
#[derive(Debug)]
pub struct ConfigStore {
    config: HostConfig,
    paths: AgentPaths,
    store: JsonStore,
}

impl ConfigStore {
    /// Opens the configuration under `paths`, degrading to defaults if the
    /// file is missing, unreadable or invalid.
    pub fn open(paths: AgentPaths) -> Self {
        let store = JsonStore::at(&paths.config_file);
        let config = match Self::read(&store) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "using default configuration");
                HostConfig::default()
            }
        };
        debug!(
            path = %store.path().display(),
            log_dir = ?config.log_dir,
            "loaded configuration"
        );
        Self {
            config,
            paths,
            store,
        }
    }

    fn read(store: &JsonStore) -> Result<HostConfig, ConfigError> {
        let config: HostConfig = store
            .try_load()
            .map_err(|source| ConfigError::Load {
                path: store.path().to_path_buf(),
                source,
            })?
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// The current configuration.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Well-known paths this store was opened with.
    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    /// The effective log root.
    pub fn log_dir(&self) -> &Path {
        self.config
            .log_dir
            .as_deref()
            .unwrap_or(self.paths.default_log_dir.as_path())
    }

    /// Changes the log root and persists the configuration.
    ///
    /// The in-memory value changes even when the save fails, so the running
    /// host keeps using the requested root.
    pub fn set_log_dir(&mut self, log_dir: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let log_dir = log_dir.into();
        info!(log_dir = %log_dir.display(), "log directory changed");
        self.config.log_dir = Some(log_dir);
        self.save()
    }

    /// Writes the configuration to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.store
            .save(&self.config)
            .map_err(|source| ConfigError::Save {
                path: self.store.path().to_path_buf(),
                source,
            })
    }
}
