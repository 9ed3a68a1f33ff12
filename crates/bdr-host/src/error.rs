//! Host error types

use bdr_config::ConfigError;
use bdr_logs::LogError;
use thiserror::Error;

/// Host error type
#[derive(Debug, Error)]
pub enum HostError {
    /// Frame was not a JSON object or a field had the wrong shape
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The `type` tag named no known command
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Persistence engine failure
    #[error(transparent)]
    Log(#[from] LogError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host result type
pub type HostResult<T> = Result<T, HostError>;
