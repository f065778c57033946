//! Envelope and payload types for the control protocol.
//!
//! Both directions use the same wrapper: `{cmd: string, payload: <json>}`.
//! `cmd` is an open string tag so unknown commands can be received, named in
//! the resulting error event, and survive protocol evolution. Payloads are
//! decoded lazily by whichever handler owns the command.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound command tags.
pub const CMD_SCAN: &str = "scan";
pub const CMD_RIP: &str = "rip";
pub const CMD_INTERRUPT: &str = "interrupt";
pub const CMD_EJECT: &str = "eject";
pub const CMD_TIDY: &str = "tidy";

/// Outbound event tags.
pub const EVT_SCAN: &str = "scan";
pub const EVT_RIP_STARTED: &str = "rip-started";
pub const EVT_RIP_PROGRESS: &str = "rip-progress";
pub const EVT_RIP_COMPLETED: &str = "rip-completed";
pub const EVT_RIP_INTERRUPTED: &str = "rip-interrupted";
pub const EVT_EJECT_SUCCESS: &str = "eject-success";
pub const EVT_FREESPACE: &str = "freespace";
pub const EVT_ERROR: &str = "error";

/// Sentinel reported when a progress line carries no parseable percentage.
pub const PERCENT_UNKNOWN: f64 = -1.0;

/// The uniform message wrapper exchanged in both directions.
///
/// An absent `payload` deserializes as `null`; outbound envelopes always
/// serialize the field, `null` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub cmd: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(cmd: impl Into<String>, payload: Value) -> Self {
        Self {
            cmd: cmd.into(),
            payload,
        }
    }

    /// Event envelope with a serialized payload.
    pub fn event<P: Serialize>(cmd: &str, payload: &P) -> Result<Self, serde_json::Error> {
        Ok(Self {
            cmd: cmd.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Event envelope with a `null` payload.
    pub fn empty(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            payload: Value::Null,
        }
    }

    /// `error` event carrying a bare message string.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            cmd: EVT_ERROR.to_string(),
            payload: Value::String(message.into()),
        }
    }

    /// Decode the payload into a command-specific shape.
    pub fn decode_payload<P: DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// One entry of a rip request: which title to rip and the output filename.
///
/// A `rip` payload is an ordered array of these; tracks rip sequentially in
/// the given order. The same shape is echoed back as the payload of
/// `rip-started` / `rip-completed` / `rip-interrupted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RipTrack {
    pub track: u32,
    pub filename: String,
}

/// `rip-progress` payload, derived from one line of ripping-tool output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RipProgress {
    pub track: u32,
    pub bytes: u64,
    pub percent: f64,
}

/// `freespace` payload: byte counts for the output volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsUsage {
    pub total: u64,
    pub free: u64,
}
