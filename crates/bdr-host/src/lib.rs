//! OpenBDR Host
//!
//! Native messaging host for the OpenBDR browser extension. The extension
//! launches the host and exchanges length-prefixed JSON messages with it over
//! stdin/stdout; the host records every event into the partitioned log kept by
//! [`bdr_logs`].
//!
//! ## Protocol
//!
//! Each message is a 32-bit native-endian byte length followed by that many
//! bytes of UTF-8 JSON.
//!
//! Request:
//! ```json
//! {"type": "LOG_EVENT", "event": {"eventId": "e1", "eventType": "tab.open"}}
//! ```
//!
//! Response:
//! ```json
//! {"success": true, "eventId": "e1"}
//! ```
//!
//! Error:
//! ```json
//! {"success": false, "error": "Unknown message type: REBOOT"}
//! ```

pub mod error;
pub mod framing;
pub mod host;
pub mod protocol;
pub mod serve;
pub mod telemetry;

pub use error::{HostError, HostResult};
pub use host::{Host, StatusReply};
pub use protocol::{ConfigUpdate, Request, Response};
pub use serve::{serve, ServeOptions};
