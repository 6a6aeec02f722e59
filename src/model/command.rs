//! Outbound command objects and the close payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Activity;
use crate::protocol::Frame;

/// Command name for updating rich presence.
pub const SET_ACTIVITY: &str = "SET_ACTIVITY";

/// Command name for subscribing to an event.
pub const SUBSCRIBE: &str = "SUBSCRIBE";

/// Command name for unsubscribing from an event.
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";

/// A request sent to the peer.
///
/// Serializes to `{ "cmd": ..., "args": ..., "evt": ..., "nonce": ... }`
/// with unset fields omitted. The nonce is normally left empty and filled in
/// when the command is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name.
    pub cmd: String,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub args: Option<Value>,
    /// Event name, for `SUBSCRIBE`/`UNSUBSCRIBE`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub evt: Option<String>,
    /// Correlation identifier.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nonce: Option<String>,
}

impl Command {
    /// Command with no arguments.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: None,
            evt: None,
            nonce: None,
        }
    }

    /// Attach arguments.
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach an explicit nonce.
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// `SET_ACTIVITY` for process `pid`. `None` clears the activity.
    pub fn set_activity(pid: u32, activity: Option<&Activity>) -> Self {
        Self::new(SET_ACTIVITY).with_args(json!({ "pid": pid, "activity": activity }))
    }

    /// `SUBSCRIBE` to `evt`.
    pub fn subscribe(evt: impl Into<String>) -> Self {
        Self {
            evt: Some(evt.into()),
            ..Self::new(SUBSCRIBE)
        }
    }

    /// `UNSUBSCRIBE` from `evt`.
    pub fn unsubscribe(evt: impl Into<String>) -> Self {
        Self {
            evt: Some(evt.into()),
            ..Self::new(UNSUBSCRIBE)
        }
    }
}

/// Payload of a `Close` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosePayload {
    /// Close code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable reason.
    #[serde(default)]
    pub message: String,
}

impl ClosePayload {
    /// Parse the close payload. Non-JSON bodies become the message verbatim.
    pub fn from_frame(frame: &Frame) -> Self {
        frame.parse_json().unwrap_or_else(|_| Self {
            code: 0,
            message: frame.payload_lossy(),
        })
    }
}

/// `data` of an `ERROR` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct ErrorData {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
