//! Error types for the event log engine.

use std::io;
use std::path::PathBuf;

use bdr_persist::PersistError;
use thiserror::Error;

/// Errors that can occur while persisting events.
///
/// None of these are fatal to the host: state errors degrade crash recovery,
/// the others fail the single operation that raised them.
#[derive(Debug, Error)]
pub enum LogError {
    /// The state checkpoint exists but could not be read or parsed.
    #[error("failed to load state from {}: {source}", path.display())]
    StateLoad {
        /// Checkpoint file.
        path: PathBuf,
        /// Underlying persistence error.
        #[source]
        source: PersistError,
    },

    /// The state checkpoint could not be written.
    #[error("failed to save state to {}: {source}", path.display())]
    StateSave {
        /// Checkpoint file.
        path: PathBuf,
        /// Underlying persistence error.
        #[source]
        source: PersistError,
    },

    /// A log file or its partition directory could not be created or opened.
    #[error("failed to open log file {}: {source}", path.display())]
    Rotation {
        /// File being opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An event could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event could not be appended to the active file.
    #[error("failed to append to {}: {source}", path.display())]
    Write {
        /// Active file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Buffered events could not be synced to disk.
    #[error("failed to flush {}: {source}", path.display())]
    Flush {
        /// Active file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An append was attempted with no file open.
    #[error("no log file is open")]
    NotOpen,

    /// A batch stopped at a failing event. Events before it were written.
    #[error("batch stopped after {written} events: {source}")]
    BatchIncomplete {
        /// Events of the batch that were appended before the failure.
        written: usize,
        /// Error raised by the failing event.
        #[source]
        source: Box<LogError>,
    },
}

/// Result type alias for log operations.
pub type Result<T> = std::result::Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "read-only filesystem")
    }

    #[test]
    fn error_display_messages() {
        let err = LogError::Rotation {
            path: PathBuf::from("/logs/year=2024/events_001.jsonl"),
            source: io_err(),
        };
        assert_eq!(
            err.to_string(),
            "failed to open log file /logs/year=2024/events_001.jsonl: read-only filesystem"
        );

        let err = LogError::Flush {
            path: PathBuf::from("events_002.jsonl"),
            source: io_err(),
        };
        assert_eq!(
            err.to_string(),
            "failed to flush events_002.jsonl: read-only filesystem"
        );

        assert_eq!(LogError::NotOpen.to_string(), "no log file is open");
    }

    #[test]
    fn batch_error_keeps_source() {
        let err = LogError::BatchIncomplete {
            written: 3,
            source: Box::new(LogError::NotOpen),
        };
        assert_eq!(
            err.to_string(),
            "batch stopped after 3 events: no log file is open"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn serde_error_conversion() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: LogError = json_err.into();
        assert!(err.to_string().starts_with("failed to serialize event"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LogError>();
    }
}
