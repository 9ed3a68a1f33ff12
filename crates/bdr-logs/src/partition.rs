//! Hour-granularity partitions of the log tree.
//!
//! A [`Partition`] names one hour of wall-clock time. It renders both as a
//! Hive-style directory fragment (`year=2024/month=01/day=15/hour=10`) and as
//! a flat [`PartitionKey`] (`2024-01-15-10`) that is compared to decide when
//! the hour has changed.

use std::fmt;
use std::path::PathBuf;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

/// One hour of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
}

impl Partition {
    /// The partition containing `t`.
    pub fn from_datetime<T: Datelike + Timelike>(t: &T) -> Self {
        Self {
            year: t.year(),
            month: t.month(),
            day: t.day(),
            hour: t.hour(),
        }
    }

    /// Directory fragment below the log root.
    pub fn path(&self) -> PathBuf {
        [
            format!("year={:04}", self.year),
            format!("month={:02}", self.month),
            format!("day={:02}", self.day),
            format!("hour={:02}", self.hour),
        ]
        .iter()
        .collect()
    }

    /// Directory fragment with `/` separators on every platform.
    pub fn path_string(&self) -> String {
        format!(
            "year={:04}/month={:02}/day={:02}/hour={:02}",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Flat comparison key.
    pub fn key(&self) -> PartitionKey {
        PartitionKey(format!(
            "{:04}-{:02}-{:02}-{:02}",
            self.year, self.month, self.day, self.hour
        ))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_string())
    }
}

/// Flat partition identifier, as stored in the state checkpoint.
///
/// Zero-padded fields make lexical order match time order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Wraps a key read from elsewhere (e.g. an older checkpoint).
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory fragment of the partition containing `t`.
pub fn partition_path<T: Datelike + Timelike>(t: &T) -> PathBuf {
    Partition::from_datetime(t).path()
}

/// Comparison key of the partition containing `t`.
pub fn partition_key<T: Datelike + Timelike>(t: &T) -> PartitionKey {
    Partition::from_datetime(t).key()
}
