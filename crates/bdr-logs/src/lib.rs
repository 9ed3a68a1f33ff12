//! # bdr-logs
//!
//! Crash-resilient, partitioned event log for the OpenBDR host.
//!
//! This crate provides:
//!
//! - [`Partition`] and [`PartitionKey`] for hourly Hive-style directories
//! - [`Event`] for records written one JSON object per line
//! - [`StateStore`] for the durable write-position checkpoint
//! - [`LogWriter`] for the single active output file
//! - [`PersistenceEngine`] for rotation, batching and crash recovery
//! - [`Clock`] with [`SystemClock`] and [`ManualClock`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bdr_logs::{EngineConfig, Event, PersistenceEngine, StateStore, SystemClock};
//!
//! # fn main() -> bdr_logs::Result<()> {
//! let config = EngineConfig::new("/var/lib/openbdr/logs");
//! let state = StateStore::new("/var/lib/openbdr/state.json");
//! let mut engine = PersistenceEngine::open(config, state, Arc::new(SystemClock));
//!
//! engine.write_event(&Event::new("navigation.commit").with_id("evt-1"))?;
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod engine;
pub mod error;
pub mod event;
pub mod partition;
pub mod state;
pub mod writer;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    EngineConfig, EngineStatus, PersistenceEngine, WriteReceipt, DEFAULT_FLUSH_BATCH_SIZE,
    DEFAULT_MAX_FILE_SIZE,
};
pub use error::{LogError, Result};
pub use event::{Event, EventId};
pub use partition::{partition_key, partition_path, Partition, PartitionKey};
pub use state::{StateRecord, StateStore};
pub use writer::{LogWriter, RotationReason};
