//! Durable checkpoint of the engine's write position.
//!
//! The checkpoint is read once at startup and rewritten after every rotation,
//! lazy open and flush. It is advisory: on resume the size of the active file
//! is re-measured from disk, never taken from the record.

use std::path::{Path, PathBuf};

use bdr_persist::JsonStore;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LogError, Result};
use crate::event::EventId;
use crate::partition::PartitionKey;

/// Snapshot of where the engine is writing.
///
/// Keys are camelCase so checkpoints written by earlier hosts still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateRecord {
    /// File the engine last wrote to.
    pub current_file: Option<PathBuf>,
    /// Bytes in `current_file` as of the checkpoint.
    pub current_size: u64,
    /// Sequence number of `current_file` within its partition.
    pub file_sequence: u32,
    /// Partition `current_file` belongs to.
    pub last_partition: Option<PartitionKey>,
    /// Identifier of the last event appended.
    pub last_event_id: Option<EventId>,
    /// When the checkpoint was written (local time).
    pub last_updated: Option<NaiveDateTime>,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            current_file: None,
            current_size: 0,
            file_sequence: 1,
            last_partition: None,
            last_event_id: None,
            last_updated: None,
        }
    }
}

/// Loads and saves the [`StateRecord`].
#[derive(Debug, Clone)]
pub struct StateStore {
    store: JsonStore,
}

impl StateStore {
    /// A store backed by the checkpoint file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::at(path),
        }
    }

    /// Checkpoint file path.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Reads the checkpoint.
    ///
    /// Returns `None` when there is no checkpoint or it cannot be read; the
    /// latter is logged and otherwise treated as a fresh start.
    pub fn load(&self) -> Option<StateRecord> {
        match self.try_load() {
            Ok(Some(record)) => {
                debug!(
                    path = %self.path().display(),
                    current_file = ?record.current_file,
                    partition = ?record.last_partition,
                    sequence = record.file_sequence,
                    "loaded state checkpoint"
                );
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable state checkpoint");
                None
            }
        }
    }

    /// Reads the checkpoint, reporting parse and I/O failures.
    pub fn try_load(&self) -> Result<Option<StateRecord>> {
        self.store.try_load().map_err(|source| LogError::StateLoad {
            path: self.path().to_path_buf(),
            source,
        })
    }

    /// Atomically replaces the checkpoint.
    pub fn save(&self, record: &StateRecord) -> Result<()> {
        self.store.save(record).map_err(|source| LogError::StateSave {
            path: self.path().to_path_buf(),
            source,
        })
    }
}
