//! Command handling
//!
//! [`Host`] owns the persistence engine and the configuration store and
//! turns each [`Request`] into a [`Response`]. Failures never escape: they
//! are logged and reported back to the extension.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bdr_config::{AgentPaths, ConfigStore};
use bdr_logs::{
    Clock, EngineConfig, Event, EventId, LogError, PersistenceEngine, StateStore,
};
use chrono::Local;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{HostError, HostResult};
use crate::protocol::{ConfigUpdate, Request, Response};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Reply body for `GET_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    /// Always true while the host is answering.
    pub connected: bool,
    /// Root of the log tree.
    pub log_dir: PathBuf,
    /// Current (or most recently closed) file.
    pub current_file: Option<PathBuf>,
    /// Bytes in the current file.
    pub current_size: u64,
    /// `current_size` in MiB, two decimals.
    #[serde(rename = "currentSizeMB")]
    pub current_size_mb: f64,
    /// Partition directory of the current hour.
    pub current_partition: String,
    /// Sequence number of the current file.
    pub file_sequence: u32,
    /// Identifier of the last event written.
    pub last_event_id: Option<EventId>,
}

/// The native messaging host.
#[derive(Debug)]
pub struct Host {
    engine: PersistenceEngine,
    config: ConfigStore,
}

impl Host {
    /// Builds a host from an already opened engine and config store.
    pub fn new(engine: PersistenceEngine, config: ConfigStore) -> Self {
        Self { engine, config }
    }

    /// Loads configuration under `paths` and recovers the engine from the
    /// state checkpoint there.
    pub fn open(paths: AgentPaths, clock: Arc<dyn Clock>) -> Self {
        let config = ConfigStore::open(paths);
        let settings = config.config();
        let engine_config = EngineConfig::new(config.log_dir())
            .with_max_file_size(settings.max_file_size)
            .with_flush_batch_size(settings.flush_batch_size)
            .with_file_extension(settings.file_extension.clone());
        let state = StateStore::new(&config.paths().state_file);

        info!(
            log_dir = %config.log_dir().display(),
            state = %state.path().display(),
            "opening persistence engine"
        );
        let engine = PersistenceEngine::open(engine_config, state, clock);
        Self::new(engine, config)
    }

    /// The persistence engine.
    pub fn engine(&self) -> &PersistenceEngine {
        &self.engine
    }

    /// The configuration store.
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// How long buffered events may wait before an idle flush.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.config.config().flush_interval_secs)
    }

    /// Decodes and handles one frame.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Response {
        match Request::parse(frame) {
            Ok(request) => self.handle(request),
            Err(e) => {
                warn!(error = %e, "rejected message");
                Response::error(e.to_string())
            }
        }
    }

    /// Handles one request.
    pub fn handle(&mut self, request: Request) -> Response {
        let kind = request.kind();
        debug!(kind, "handling request");

        match self.dispatch(request) {
            Ok(body) => Response::success(body),
            Err(e) => {
                error!(kind, error = %e, "request failed");
                Response::error(e.to_string())
            }
        }
    }

    fn dispatch(&mut self, request: Request) -> HostResult<Value> {
        match request {
            Request::SessionStart { payload } => self.session_start(payload),
            Request::SessionEnd { payload } => self.session_end(payload),
            Request::LogEvent { event } => {
                self.engine.write_event(&event)?;
                Ok(json!({ "eventId": event.event_id }))
            }
            Request::LogBatch { events } => {
                let count = self.engine.write_batch(&events)?;
                Ok(json!({ "count": count }))
            }
            Request::GetStatus => to_json(self.status()),
            Request::SetConfig { config } => self.set_config(config),
            Request::Flush => {
                self.engine.flush()?;
                Ok(json!({}))
            }
            Request::Ping => Ok(json!({ "pong": true })),
        }
    }

    fn session_start(&mut self, payload: Value) -> HostResult<Value> {
        self.engine.ensure_open()?;
        let receipt = self.engine.write_event(&session_event("session.start", payload))?;
        info!(file = %receipt.file.display(), "session started");
        Ok(json!({ "file": receipt.file }))
    }

    fn session_end(&mut self, payload: Value) -> HostResult<Value> {
        self.engine.write_event(&session_event("session.end", payload))?;
        self.engine.flush()?;
        self.engine.close()?;
        info!("session ended");
        Ok(json!({}))
    }

    fn set_config(&mut self, update: ConfigUpdate) -> HostResult<Value> {
        if let Some(log_dir) = update.log_dir {
            // Only a root the engine could open is saved for the next launch.
            let log_dir = self.engine.set_root(log_dir)?;
            if let Err(e) = self.config.set_log_dir(log_dir) {
                warn!(error = %e, "failed to persist log directory");
            }
        }
        Ok(json!({ "logDir": self.config.log_dir() }))
    }

    /// Where the engine is writing.
    pub fn status(&self) -> StatusReply {
        let status = self.engine.status();
        StatusReply {
            connected: true,
            log_dir: status.root,
            current_file: status.active_file,
            current_size: status.current_size_bytes,
            current_size_mb: size_in_mb(status.current_size_bytes),
            current_partition: status.current_partition,
            file_sequence: status.sequence,
            last_event_id: status.last_event_id,
        }
    }

    /// Flushes if events have been waiting since the last flush.
    pub fn idle_flush(&mut self) {
        if !self.engine.has_pending() {
            return;
        }
        debug!(pending = self.engine.pending(), "idle flush");
        if let Err(e) = self.engine.flush() {
            error!(error = %e, "idle flush failed");
        }
    }

    /// Flushes, checkpoints and releases the log file.
    pub fn shutdown(self) -> Result<(), LogError> {
        self.engine.shutdown()
    }
}

fn session_event(event_type: &str, payload: Value) -> Event {
    let now = Local::now();
    let payload = if payload.is_null() { json!({}) } else { payload };
    Event::new(event_type)
        .with_id(format!("session-{}", now.timestamp_millis()))
        .with_timestamp(now.naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
        .with_payload(payload)
}

fn size_in_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

fn to_json<T: Serialize>(value: T) -> HostResult<Value> {
    serde_json::to_value(value).map_err(HostError::from)
}
