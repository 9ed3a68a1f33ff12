//! The persistence engine.
//!
//! [`PersistenceEngine`] ties the partition namer, [`LogWriter`] and
//! [`StateStore`] together. Before every write it evaluates, in order:
//!
//! 1. the wall-clock partition differs from the last recorded one: rotate
//!    (time), restarting the sequence at 1;
//! 2. the active file has reached the size threshold: rotate (size), next
//!    sequence in the same partition;
//! 3. no file is open: open the file for the current partition and sequence,
//!    resuming its on-disk size if it already exists.
//!
//! Appends are buffered. The engine fsyncs after `flush_batch_size` events,
//! on explicit [`flush`](PersistenceEngine::flush), on rotation and on close,
//! and rewrites the checkpoint each time so it reflects the durable position.
//!
//! The engine is single-threaded by construction: it is owned by one caller
//! and every operation takes `&mut self`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::error::{LogError, Result};
use crate::event::{Event, EventId};
use crate::partition::Partition;
use crate::state::{StateRecord, StateStore};
use crate::writer::{LogWriter, RotationReason};

/// Default size threshold for rotation (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default number of buffered events that forces a flush.
pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 10;

/// Tuning for [`PersistenceEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root of the partitioned log tree.
    pub root: PathBuf,
    /// Rotate once the active file holds at least this many bytes.
    pub max_file_size: u64,
    /// Flush after this many buffered events.
    pub flush_batch_size: usize,
    /// Extension of record files.
    pub file_extension: String,
}

impl EngineConfig {
    /// Defaults rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
            file_extension: "jsonl".to_string(),
        }
    }

    /// Sets the rotation size threshold.
    #[must_use]
    pub const fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the flush batch size.
    #[must_use]
    pub const fn with_flush_batch_size(mut self, events: usize) -> Self {
        self.flush_batch_size = events;
        self
    }

    /// Sets the record file extension.
    #[must_use]
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }
}

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Identifier of the written event, if it had one.
    pub event_id: Option<EventId>,
    /// File the line landed in.
    pub file: PathBuf,
    /// Bytes appended, including the newline.
    pub bytes: u64,
}

/// Snapshot of the engine for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Root of the log tree.
    pub root: PathBuf,
    /// Current (or most recently closed) file.
    pub active_file: Option<PathBuf>,
    /// Bytes in the active file.
    pub current_size_bytes: u64,
    /// Partition of the current wall-clock hour.
    pub current_partition: String,
    /// Sequence number of the active file.
    pub sequence: u32,
    /// Identifier of the last event written.
    pub last_event_id: Option<EventId>,
}

/// Writes events into the partitioned log tree and keeps the checkpoint.
pub struct PersistenceEngine {
    config: EngineConfig,
    writer: LogWriter,
    state: StateStore,
    clock: Arc<dyn Clock>,
    pending: usize,
    last_event_id: Option<EventId>,
}

impl PersistenceEngine {
    /// Creates the engine and recovers from the checkpoint in `state`.
    ///
    /// If the checkpoint names a file that still exists, lies under the
    /// configured root and belongs to the current wall-clock partition, that
    /// file is reopened for append with its size measured from disk.
    /// Otherwise the checkpoint position is kept only so the first write
    /// rotates away from it.
    pub fn open(config: EngineConfig, state: StateStore, clock: Arc<dyn Clock>) -> Self {
        let writer = LogWriter::new(&config.root, &config.file_extension);
        let mut engine = Self {
            config,
            writer,
            state,
            clock,
            pending: 0,
            last_event_id: None,
        };
        if let Some(record) = engine.state.load() {
            engine.recover(record);
        }
        engine
    }

    fn recover(&mut self, record: StateRecord) {
        self.last_event_id = record.last_event_id;
        let current = self.current_partition();

        let Some(path) = record.current_file else {
            self.writer
                .restore(record.last_partition, record.file_sequence, None);
            return;
        };

        if !path.starts_with(self.writer.root()) {
            info!(
                file = %path.display(),
                root = %self.writer.root().display(),
                "checkpoint file is outside the log root, starting fresh"
            );
            self.writer.restore(None, 1, None);
            return;
        }

        let same_partition = record.last_partition.as_ref() == Some(&current.key());
        self.writer.restore(
            record.last_partition,
            record.file_sequence,
            Some(path.clone()),
        );

        if !same_partition {
            info!(file = %path.display(), "checkpoint belongs to an earlier partition");
            return;
        }
        if !path.exists() {
            debug!(file = %path.display(), "checkpoint file no longer exists");
            return;
        }

        match self.writer.resume(path.clone()) {
            Ok(size) => {
                if size != record.current_size {
                    debug!(
                        file = %path.display(),
                        recorded = record.current_size,
                        on_disk = size,
                        "checkpoint size differs from disk, using disk size"
                    );
                }
                info!(file = %path.display(), size, "resumed log file");
                self.save_state();
            }
            Err(e) => warn!(error = %e, "failed to resume log file"),
        }
    }

    /// Engine tuning.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of events appended since the last successful flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Whether any appended events have not been flushed yet.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Whether a file handle is open.
    pub fn is_open(&self) -> bool {
        self.writer.is_open()
    }

    /// Path of the current (or most recently closed) file.
    pub fn active_file(&self) -> Option<&Path> {
        self.writer.current_path()
    }

    /// Identifier of the last event written.
    pub fn last_event_id(&self) -> Option<&EventId> {
        self.last_event_id.as_ref()
    }

    /// Applies the rotation rules and makes sure a file is open.
    ///
    /// Returns the path of the file the next write will land in.
    pub fn ensure_open(&mut self) -> Result<PathBuf> {
        let partition = self.current_partition();

        if let Some(reason) = self.rotation_due(&partition) {
            self.rotate_to(&partition, reason)?;
        } else if self.writer.ensure_open(&partition)? {
            self.save_state();
        }

        self.writer
            .current_path()
            .map(Path::to_path_buf)
            .ok_or(LogError::NotOpen)
    }

    /// Appends one event as one line.
    pub fn write_event(&mut self, event: &Event) -> Result<WriteReceipt> {
        let line = event.encode()?;
        let file = self.ensure_open()?;

        let bytes = self.writer.append(&line)?;
        self.last_event_id.clone_from(&event.event_id);
        self.pending += 1;
        trace!(
            event_id = ?event.event_id,
            bytes,
            pending = self.pending,
            "appended event"
        );

        if self.pending >= self.config.flush_batch_size {
            self.flush()?;
        }

        Ok(WriteReceipt {
            event_id: event.event_id.clone(),
            file,
            bytes,
        })
    }

    /// Appends events in order, then flushes.
    ///
    /// Stops at the first event that fails; the events before it are still
    /// flushed and the error reports how many were written.
    pub fn write_batch(&mut self, events: &[Event]) -> Result<usize> {
        let mut written = 0;
        let mut failure = None;
        for event in events {
            match self.write_event(event) {
                Ok(_) => written += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let flushed = self.flush();
        if let Some(source) = failure {
            return Err(LogError::BatchIncomplete {
                written,
                source: Box::new(source),
            });
        }
        flushed?;
        Ok(written)
    }

    /// Syncs buffered events to disk and checkpoints the position.
    pub fn flush(&mut self) -> Result<()> {
        let result = self.writer.flush();
        match &result {
            Ok(()) => {
                if self.pending > 0 {
                    debug!(events = self.pending, "flushed events");
                }
                self.pending = 0;
            }
            Err(e) => error!(error = %e, pending = self.pending, "flush failed"),
        }
        self.save_state();
        result
    }

    /// Closes the current file and opens the next one.
    pub fn rotate(&mut self, reason: RotationReason) -> Result<PathBuf> {
        let partition = self.current_partition();
        self.rotate_to(&partition, reason)
    }

    /// Moves the log tree to `root`.
    ///
    /// The current file is closed and a sequence-1 file is opened under the
    /// new root, so no file ever receives writes from two roots.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) -> Result<PathBuf> {
        let root = root.into();
        info!(root = %root.display(), "changing log root");
        self.config.root.clone_from(&root);
        self.writer.set_root(&root);
        self.rotate(RotationReason::ConfigChange)?;
        Ok(root)
    }

    /// Current position, root and partition.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            root: self.config.root.clone(),
            active_file: self.writer.current_path().map(Path::to_path_buf),
            current_size_bytes: self.writer.size(),
            current_partition: self.current_partition().path_string(),
            sequence: self.writer.sequence(),
            last_event_id: self.last_event_id.clone(),
        }
    }

    /// Flushes, releases the file handle and checkpoints.
    ///
    /// The engine stays usable; the next write reopens the file lazily.
    pub fn close(&mut self) -> Result<()> {
        let result = self.writer.close();
        if result.is_ok() {
            self.pending = 0;
        }
        self.save_state();
        result
    }

    /// Closes the engine for good. Nothing can be written afterwards.
    pub fn shutdown(mut self) -> Result<()> {
        info!(pending = self.pending, "shutting down persistence engine");
        self.close()
    }

    fn current_partition(&self) -> Partition {
        Partition::from_datetime(&self.clock.now())
    }

    fn rotation_due(&self, partition: &Partition) -> Option<RotationReason> {
        if self.writer.partition() != Some(&partition.key()) {
            Some(RotationReason::Time)
        } else if self.writer.size() >= self.config.max_file_size {
            Some(RotationReason::Size)
        } else {
            None
        }
    }

    fn rotate_to(&mut self, partition: &Partition, reason: RotationReason) -> Result<PathBuf> {
        let flushed_pending = self.pending;
        let result = self.writer.rotate(partition, reason);
        // The previous file was flushed (or is unrecoverable) either way.
        self.pending = 0;
        if flushed_pending > 0 {
            debug!(events = flushed_pending, "flushed events on rotation");
        }
        self.save_state();
        result
    }

    fn snapshot(&self) -> StateRecord {
        StateRecord {
            current_file: self.writer.current_path().map(Path::to_path_buf),
            current_size: self.writer.size(),
            file_sequence: self.writer.sequence(),
            last_partition: self.writer.partition().cloned(),
            last_event_id: self.last_event_id.clone(),
            last_updated: Some(self.clock.now()),
        }
    }

    fn save_state(&self) {
        if let Err(e) = self.state.save(&self.snapshot()) {
            warn!(error = %e, "failed to save state checkpoint");
        }
    }
}

impl std::fmt::Debug for PersistenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceEngine")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .field("state", &self.state.path())
            .field("pending", &self.pending)
            .field("last_event_id", &self.last_event_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("valid datetime")
    }

    struct Harness {
        dir: TempDir,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: TempDir::new().expect("create temp dir"),
                clock: Arc::new(ManualClock::new(at(10, 0))),
            }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().join("logs")
        }

        fn state(&self) -> StateStore {
            StateStore::new(self.dir.path().join("state.json"))
        }

        fn engine(&self, config: EngineConfig) -> PersistenceEngine {
            PersistenceEngine::open(config, self.state(), self.clock.clone())
        }

        fn default_engine(&self) -> PersistenceEngine {
            self.engine(EngineConfig::new(self.root()))
        }
    }

    fn event(n: u64) -> Event {
        Event::new("test.event")
            .with_id(format!("evt-{n}"))
            .with_payload(json!({"n": n}))
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .expect("read")
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn first_write_opens_sequence_one() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        assert!(!engine.is_open());

        let receipt = engine.write_event(&event(1)).expect("write");
        assert_eq!(
            receipt.file,
            h.root().join("year=2024/month=01/day=15/hour=10/events_001.jsonl")
        );
        assert_eq!(receipt.event_id, Some(EventId::from("evt-1")));
        assert!(engine.is_open());
    }

    #[test]
    fn batch_threshold_triggers_flush() {
        let h = Harness::new();
        let mut engine = h.engine(EngineConfig::new(h.root()).with_flush_batch_size(3));

        engine.write_event(&event(1)).expect("write");
        engine.write_event(&event(2)).expect("write");
        assert_eq!(engine.pending(), 2);

        engine.write_event(&event(3)).expect("write");
        assert_eq!(engine.pending(), 0);
        let path = engine.active_file().expect("file").to_path_buf();
        assert_eq!(lines(&path).len(), 3);
    }

    #[test]
    fn explicit_flush_resets_pending_and_checkpoints() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        engine.write_event(&event(1)).expect("write");
        assert!(engine.has_pending());

        engine.flush().expect("flush");
        assert!(!engine.has_pending());

        let record = h.state().load().expect("record");
        assert_eq!(record.last_event_id, Some(EventId::from("evt-1")));
        assert_eq!(record.current_size, engine.status().current_size_bytes);
        assert_eq!(record.file_sequence, 1);
    }

    #[test]
    fn flush_with_nothing_open_is_ok() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        engine.flush().expect("flush");
        assert!(h.state().load().is_some());
    }

    #[test]
    fn size_threshold_rotates_before_write() {
        let h = Harness::new();
        let mut engine = h.engine(EngineConfig::new(h.root()).with_max_file_size(100));

        let mut files = Vec::new();
        for n in 0..10 {
            files.push(engine.write_event(&event(n)).expect("write").file);
        }
        files.dedup();
        assert!(files.len() > 1);
        assert!(files[1].ends_with("events_002.jsonl"));
    }

    #[test]
    fn hour_change_rotates_to_new_partition() {
        let h = Harness::new();
        let mut engine = h.engine(EngineConfig::new(h.root()).with_max_file_size(50));
        for n in 0..5 {
            engine.write_event(&event(n)).expect("write");
        }
        assert!(engine.status().sequence > 1);

        h.clock.set(at(11, 0));
        let receipt = engine.write_event(&event(99)).expect("write");
        assert_eq!(engine.status().sequence, 1);
        assert!(receipt.file.starts_with(h.root().join("year=2024/month=01/day=15/hour=11")));
    }

    #[test]
    fn set_root_forces_rotation_to_new_root() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        engine.write_event(&event(1)).expect("write");
        let old = engine.active_file().expect("file").to_path_buf();

        let new_root = h.dir.path().join("moved");
        let effective = engine.set_root(&new_root).expect("set_root");
        assert_eq!(effective, new_root);
        assert!(engine.is_open());
        assert!(engine.active_file().expect("file").starts_with(&new_root));
        assert_eq!(engine.status().sequence, 1);

        engine.write_event(&event(2)).expect("write");
        engine.flush().expect("flush");
        let expected = String::from_utf8(event(1).encode().expect("encode")).expect("utf8");
        assert_eq!(lines(&old), vec![expected]);
    }

    #[test]
    fn manual_rotation_increments_sequence() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        engine.write_event(&event(1)).expect("write");

        let path = engine.rotate(RotationReason::Manual).expect("rotate");
        assert!(path.ends_with("events_002.jsonl"));
        assert_eq!(h.state().load().expect("record").file_sequence, 2);
    }

    #[test]
    fn close_then_write_reopens_same_file() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        let first = engine.write_event(&event(1)).expect("write").file;
        engine.close().expect("close");
        assert!(!engine.is_open());

        let second = engine.write_event(&event(2)).expect("write").file;
        assert_eq!(first, second);
        engine.close().expect("close");
        assert_eq!(lines(&first).len(), 2);
    }

    #[test]
    fn batch_writes_and_flushes() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        let events: Vec<Event> = (0..4).map(event).collect();

        assert_eq!(engine.write_batch(&events).expect("batch"), 4);
        assert!(!engine.has_pending());
        let path = engine.active_file().expect("file").to_path_buf();
        assert_eq!(lines(&path).len(), 4);
    }

    #[test]
    fn failed_write_is_reported_and_engine_continues() {
        let h = Harness::new();
        let blocker = h.dir.path().join("blocker");
        fs::write(&blocker, b"").expect("write");
        let mut engine = h.engine(EngineConfig::new(&blocker));

        assert!(matches!(
            engine.write_event(&event(1)),
            Err(LogError::Rotation { .. })
        ));

        engine.set_root(h.root()).expect("set_root");
        engine.write_event(&event(2)).expect("write after recovery");
    }

    #[test]
    fn failed_batch_reports_written_count() {
        let h = Harness::new();
        let blocker = h.dir.path().join("blocker");
        fs::write(&blocker, b"").expect("write");
        let mut engine = h.engine(EngineConfig::new(&blocker));

        let err = engine
            .write_batch(&[event(1), event(2)])
            .expect_err("batch under a file must fail");
        assert!(matches!(err, LogError::BatchIncomplete { written: 0, .. }));
    }

    #[test]
    fn status_reports_position() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        h.clock.advance(TimeDelta::minutes(15));
        let receipt = engine.write_event(&event(7)).expect("write");

        let status = engine.status();
        assert_eq!(status.root, h.root());
        assert_eq!(status.active_file, Some(receipt.file));
        assert_eq!(status.current_size_bytes, receipt.bytes);
        assert_eq!(status.current_partition, "year=2024/month=01/day=15/hour=10");
        assert_eq!(status.sequence, 1);
        assert_eq!(status.last_event_id, Some(EventId::from("evt-7")));
    }

    #[test]
    fn shutdown_makes_events_durable() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        let file = engine.write_event(&event(1)).expect("write").file;
        engine.shutdown().expect("shutdown");

        assert_eq!(lines(&file).len(), 1);
        let record = h.state().load().expect("record");
        assert_eq!(record.current_size, fs::metadata(&file).expect("metadata").len());
    }

    #[test]
    fn event_without_id_clears_last_id() {
        let h = Harness::new();
        let mut engine = h.default_engine();
        engine.write_event(&event(1)).expect("write");
        engine.write_event(&Event::new("anonymous")).expect("write");
        assert_eq!(engine.last_event_id(), None);
    }

    #[test]
    fn unwritable_checkpoint_does_not_stop_logging() {
        let h = Harness::new();
        let blocker = h.dir.path().join("blocker");
        fs::write(&blocker, b"").expect("write blocker");
        let state = StateStore::new(blocker.join("state.json"));
        let mut engine =
            PersistenceEngine::open(EngineConfig::new(h.root()), state, h.clock.clone());

        let first = engine.write_event(&event(1)).expect("write");
        engine.write_event(&event(2)).expect("write");
        engine.flush().expect("flush");
        assert_eq!(lines(&first.file).len(), 2);

        let moved = h.dir.path().join("moved");
        let second = engine.set_root(&moved).expect("set root");
        assert_eq!(second, moved);
        let receipt = engine.write_event(&event(3)).expect("write");
        assert!(receipt.file.starts_with(&moved));
        engine.flush().expect("flush");

        let expected = String::from_utf8(event(3).encode().expect("encode")).expect("utf8");
        assert_eq!(lines(&receipt.file), vec![expected]);
        assert_eq!(engine.last_event_id(), Some(&EventId::from("evt-3")));
        assert!(!blocker.join("state.json").exists());
    }
}
