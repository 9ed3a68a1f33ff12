//! Host protocol types
//!
//! Requests are JSON objects tagged by `type`. Replies always carry
//! `success`; failures add an `error` string and successes add
//! command-specific fields next to it.

use std::path::PathBuf;

use bdr_logs::Event;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HostError, HostResult};

/// A command from the browser extension.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// A browsing session began.
    SessionStart {
        /// Session metadata recorded with the start event.
        #[serde(default)]
        payload: Value,
    },
    /// A browsing session ended.
    SessionEnd {
        /// Session metadata recorded with the end event.
        #[serde(default)]
        payload: Value,
    },
    /// Record one event.
    LogEvent {
        /// The event to record.
        #[serde(default)]
        event: Event,
    },
    /// Record several events and flush.
    LogBatch {
        /// Events in order.
        #[serde(default)]
        events: Vec<Event>,
    },
    /// Report where the host is writing.
    GetStatus,
    /// Change host settings.
    SetConfig {
        /// Settings to change.
        #[serde(default)]
        config: ConfigUpdate,
    },
    /// Make buffered events durable.
    Flush,
    /// Liveness check.
    Ping,
}

impl Request {
    /// Decodes one frame.
    ///
    /// Unrecognised `type` values are reported by name.
    pub fn parse(frame: &[u8]) -> HostResult<Self> {
        let value: Value =
            serde_json::from_slice(frame).map_err(|e| HostError::InvalidMessage(e.to_string()))?;
        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => other.to_string(),
            None => "null".to_string(),
        };

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(HostError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|e| HostError::InvalidMessage(e.to_string()))
    }

    /// The wire name of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "SESSION_START",
            Self::SessionEnd { .. } => "SESSION_END",
            Self::LogEvent { .. } => "LOG_EVENT",
            Self::LogBatch { .. } => "LOG_BATCH",
            Self::GetStatus => "GET_STATUS",
            Self::SetConfig { .. } => "SET_CONFIG",
            Self::Flush => "FLUSH",
            Self::Ping => "PING",
        }
    }
}

const KNOWN_TYPES: &[&str] = &[
    "SESSION_START",
    "SESSION_END",
    "LOG_EVENT",
    "LOG_BATCH",
    "GET_STATUS",
    "SET_CONFIG",
    "FLUSH",
    "PING",
];

/// Settings carried by `SET_CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    /// New root for the log tree.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the command succeeded
    pub success: bool,
    /// Command-specific fields
    #[serde(flatten)]
    pub body: Map<String, Value>,
    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Create a success response
    ///
    /// Object fields of `body` are placed next to `success`; anything else
    /// is dropped.
    pub fn success(body: impl Serialize) -> Self {
        let body = match serde_json::to_value(body) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            success: true,
            body,
            error: None,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            body: Map::new(),
            error: Some(message.into()),
        }
    }

    /// Encodes the reply as a frame body.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            serde_json::to_vec(&Self::error(format!("failed to encode reply: {e}")))
                .unwrap_or_else(|_| br#"{"success":false}"#.to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(r#"{"type":"PING"}"#, "PING" ; "ping")]
    #[test_case(r#"{"type":"FLUSH"}"#, "FLUSH" ; "flush")]
    #[test_case(r#"{"type":"GET_STATUS"}"#, "GET_STATUS" ; "status")]
    #[test_case(r#"{"type":"SESSION_START"}"#, "SESSION_START" ; "session start without payload")]
    #[test_case(r#"{"type":"SESSION_END","payload":{"tabs":2}}"#, "SESSION_END" ; "session end")]
    #[test_case(r#"{"type":"LOG_BATCH"}"#, "LOG_BATCH" ; "batch without events")]
    #[test_case(r#"{"type":"SET_CONFIG","config":{}}"#, "SET_CONFIG" ; "empty config")]
    fn parses_known_types(raw: &str, kind: &str) {
        let request = Request::parse(raw.as_bytes()).expect("parse");
        assert_eq!(request.kind(), kind);
    }

    #[test]
    fn log_event_keeps_event_fields() {
        let raw = json!({
            "type": "LOG_EVENT",
            "event": {"eventId": "e1", "eventType": "tab.open", "tabId": 4}
        });
        let request = Request::parse(raw.to_string().as_bytes()).expect("parse");
        assert!(matches!(
            &request,
            Request::LogEvent { event }
                if event.type_name() == Some("tab.open")
                    && event.extra.get("tabId") == Some(&json!(4))
        ));
    }

    #[test]
    fn set_config_reads_log_dir() {
        let request = Request::parse(br#"{"type":"SET_CONFIG","config":{"logDir":"/tmp/bdr"}}"#)
            .expect("parse");
        assert_eq!(
            request,
            Request::SetConfig {
                config: ConfigUpdate {
                    log_dir: Some(PathBuf::from("/tmp/bdr")),
                },
            }
        );
    }

    #[test_case(r#"{"type":"REBOOT"}"#, "Unknown message type: REBOOT" ; "unknown name")]
    #[test_case(r#"{"payload":{}}"#, "Unknown message type: null" ; "missing type")]
    #[test_case(r#"{"type":7}"#, "Unknown message type: 7" ; "numeric type")]
    #[test_case(r#"{"type":"UNKNOWN"}"#, "Unknown message type: UNKNOWN" ; "literal unknown")]
    #[test_case(r#"{"type":"ping"}"#, "Unknown message type: ping" ; "wrong case")]
    fn unknown_types_are_named(raw: &str, message: &str) {
        let err = Request::parse(raw.as_bytes()).expect_err("must fail");
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn every_known_type_parses() {
        for kind in KNOWN_TYPES {
            let raw = json!({ "type": kind });
            let request = Request::parse(raw.to_string().as_bytes()).expect("parse");
            assert_eq!(request.kind(), *kind);
        }
    }

    #[test]
    fn malformed_json_is_invalid() {
        let err = Request::parse(b"{\"type\":").expect_err("must fail");
        assert!(matches!(err, HostError::InvalidMessage(_)));
    }

    #[test]
    fn wrongly_shaped_known_type_is_invalid() {
        let err = Request::parse(br#"{"type":"LOG_BATCH","events":5}"#).expect_err("must fail");
        assert!(matches!(err, HostError::InvalidMessage(_)));
    }

    #[test]
    fn success_flattens_body() {
        let response = Response::success(json!({"pong": true}));
        let value: Value = serde_json::from_slice(&response.encode()).expect("json");
        assert_eq!(value, json!({"success": true, "pong": true}));
    }

    #[test]
    fn error_has_message() {
        let response = Response::error("Unknown message type: X");
        let value: Value = serde_json::from_slice(&response.encode()).expect("json");
        assert_eq!(value, json!({"success": false, "error": "Unknown message type: X"}));
    }

    #[test]
    fn non_object_body_is_dropped() {
        let response = Response::success(42);
        assert!(response.body.is_empty());
    }
}
