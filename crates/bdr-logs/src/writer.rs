//! The single active output file.
//!
//! [`LogWriter`] owns at most one open file handle. Files live at
//! `<root>/<partition path>/events_NNN.<ext>` where `NNN` is a sequence
//! number local to the partition. Records are appended as JSON lines and the
//! running size counts the bytes actually handed to the file.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bdr_persist::fsync::{fsync_dir, fsync_file};
use tracing::{debug, error, info, warn};

use crate::error::{LogError, Result};
use crate::partition::{Partition, PartitionKey};

/// Capacity of the in-process write buffer.
const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Why the active file was rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// The wall-clock hour moved on.
    Time,
    /// The active file reached the size threshold.
    Size,
    /// The log root changed.
    ConfigChange,
    /// Requested by an operator.
    Manual,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Time => "time",
            Self::Size => "size",
            Self::ConfigChange => "config_change",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

struct ActiveFile {
    path: PathBuf,
    out: BufWriter<File>,
}

/// Appends records to the active log file and rotates it.
pub struct LogWriter {
    root: PathBuf,
    extension: String,
    /// Partition of the current (or last) file.
    partition: Option<PartitionKey>,
    sequence: u32,
    /// Path of the current file; kept after close so status can report it.
    current_path: Option<PathBuf>,
    active: Option<ActiveFile>,
    size: u64,
}

impl LogWriter {
    /// A writer rooted at `root` with nothing open.
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
            partition: None,
            sequence: 1,
            current_path: None,
            active: None,
            size: 0,
        }
    }

    /// Root of the log tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Changes the root. Takes effect the next time a file is opened.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
    }

    /// Partition of the current file, if any.
    pub fn partition(&self) -> Option<&PartitionKey> {
        self.partition.as_ref()
    }

    /// Sequence number of the current file within its partition.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Bytes in the current file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether a file handle is open.
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Path of the current (or most recently closed) file.
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Where the file for `partition` at the current sequence lives.
    pub fn file_path(&self, partition: &Partition) -> PathBuf {
        self.root.join(partition.path()).join(format!(
            "events_{:03}.{}",
            self.sequence, self.extension
        ))
    }

    /// Adopts a position from a checkpoint without opening anything.
    pub fn restore(
        &mut self,
        partition: Option<PartitionKey>,
        sequence: u32,
        current_path: Option<PathBuf>,
    ) {
        self.partition = partition;
        self.sequence = sequence.max(1);
        self.current_path = current_path;
        self.size = 0;
    }

    /// Reopens an existing file for append, measuring its size from disk.
    pub fn resume(&mut self, path: PathBuf) -> Result<u64> {
        self.close()?;
        self.open(path)?;
        Ok(self.size)
    }

    /// Opens the file for `partition` at the current sequence unless a file
    /// is already open. Returns whether a file was opened.
    pub fn ensure_open(&mut self, partition: &Partition) -> Result<bool> {
        if self.active.is_some() {
            return Ok(false);
        }
        self.partition = Some(partition.key());
        let path = self.file_path(partition);
        self.open(path)?;
        Ok(true)
    }

    /// Closes the current file and opens the next one.
    ///
    /// The sequence restarts at 1 when the partition changes or the root was
    /// reconfigured, and increments otherwise.
    pub fn rotate(&mut self, partition: &Partition, reason: RotationReason) -> Result<PathBuf> {
        if let Err(e) = self.close() {
            // The old file is gone or unwritable; keep going with a new one.
            error!(error = %e, "failed to close log file before rotation");
        }

        let key = partition.key();
        if reason == RotationReason::ConfigChange || self.partition.as_ref() != Some(&key) {
            self.sequence = 1;
        } else {
            self.sequence = self.sequence.saturating_add(1);
        }
        self.partition = Some(key);
        self.size = 0;

        let path = self.file_path(partition);
        self.open(path.clone())?;
        info!(
            path = %path.display(),
            reason = %reason,
            sequence = self.sequence,
            "rotated log file"
        );
        Ok(path)
    }

    /// Appends one record followed by a newline. Returns the bytes written.
    pub fn append(&mut self, record: &[u8]) -> Result<u64> {
        let active = self.active.as_mut().ok_or(LogError::NotOpen)?;
        active
            .out
            .write_all(record)
            .and_then(|()| active.out.write_all(b"\n"))
            .map_err(|source| LogError::Write {
                path: active.path.clone(),
                source,
            })?;
        let written = record.len() as u64 + 1;
        self.size += written;
        Ok(written)
    }

    /// Pushes buffered records to the file and syncs it to disk.
    pub fn flush(&mut self) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active
            .out
            .flush()
            .and_then(|()| fsync_file(active.out.get_ref()))
            .map_err(|source| LogError::Flush {
                path: active.path.clone(),
                source,
            })
    }

    /// Flushes and releases the handle. Safe to call with nothing open.
    pub fn close(&mut self) -> Result<()> {
        let result = self.flush();
        if let Some(active) = self.active.take() {
            debug!(path = %active.path.display(), size = self.size, "closed log file");
        }
        result
    }

    fn open(&mut self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LogError::Rotation {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogError::Rotation {
                path: path.clone(),
                source,
            })?;
        let size = file
            .metadata()
            .map_err(|source| LogError::Rotation {
                path: path.clone(),
                source,
            })?
            .len();

        if size == 0 {
            if let Some(parent) = path.parent() {
                if let Err(e) = fsync_dir(parent) {
                    warn!(dir = %parent.display(), error = %e, "failed to sync partition directory");
                }
            }
        }

        debug!(path = %path.display(), size, "opened log file");
        self.size = size;
        self.current_path = Some(path.clone());
        self.active = Some(ActiveFile {
            path,
            out: BufWriter::with_capacity(WRITE_BUFFER_BYTES, file),
        });
        Ok(())
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("root", &self.root)
            .field("partition", &self.partition)
            .field("sequence", &self.sequence)
            .field("current_path", &self.current_path)
            .field("open", &self.active.is_some())
            .field("size", &self.size)
            .finish()
    }
}
