//! Handshake message and acknowledgment check.
//!
//! The handshake is the first frame written on every connection:
//! - The protocol version (`v`)
//! - The application's client ID
//!
//! The peer acknowledges with a `DISPATCH`/`READY` frame. Anything else as
//! the first inbound frame means the handshake was rejected.
//!
//! # Example
//!
//! ```
//! use discord_ipc_client::handshake::HandshakeMessage;
//! use discord_ipc_client::protocol::Opcode;
//!
//! let frame = HandshakeMessage::new("945428344806183003").to_frame().unwrap();
//! assert_eq!(frame.opcode, Opcode::Handshake);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IpcError, Result};
use crate::model::ClosePayload;
use crate::protocol::{Frame, Opcode};

/// Protocol version understood by the peer.
pub const PROTOCOL_VERSION: u32 = 1;

/// Command name the peer uses for unsolicited events.
pub const DISPATCH_COMMAND: &str = "DISPATCH";

/// Event name that acknowledges the handshake.
pub const READY_EVENT: &str = "READY";

/// Payload of the `Handshake` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Protocol version.
    pub v: u32,
    /// Application (client) identifier.
    pub client_id: String,
    /// Extra fields forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HandshakeMessage {
    /// Handshake for `client_id` at the default protocol version.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            client_id: client_id.into(),
            extra: Map::new(),
        }
    }

    /// Override the protocol version.
    pub fn with_version(mut self, v: u32) -> Self {
        self.v = v;
        self
    }

    /// Add an optional field to the handshake payload.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Encode as a `Handshake` frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::json(Opcode::Handshake, self)
    }
}

/// Check the peer's first frame after the handshake.
///
/// Returns the parsed READY payload on success so it can be dispatched to
/// listeners afterwards.
pub fn check_acknowledgment(frame: &Frame) -> Result<Value> {
    match frame.opcode {
        Opcode::Frame => {
            let value: Value = frame.parse_json().map_err(|_| {
                IpcError::HandshakeRejected(format!(
                    "acknowledgment is not JSON: {}",
                    frame.payload_lossy()
                ))
            })?;

            let cmd = value.get("cmd").and_then(Value::as_str);
            let evt = value.get("evt").and_then(Value::as_str);
            if cmd == Some(DISPATCH_COMMAND) && evt == Some(READY_EVENT) {
                Ok(value)
            } else {
                Err(IpcError::HandshakeRejected(format!(
                    "expected {DISPATCH_COMMAND}/{READY_EVENT}, got cmd={cmd:?} evt={evt:?}"
                )))
            }
        }
        Opcode::Close => {
            let close = ClosePayload::from_frame(frame);
            Err(IpcError::HandshakeRejected(format!(
                "peer closed connection ({}): {}",
                close.code, close.message
            )))
        }
        other => Err(IpcError::HandshakeRejected(format!(
            "unexpected {other:?} frame before READY"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn test_handshake_payload_format() {
        let frame = HandshakeMessage::new("1234").to_frame().unwrap();
        let parsed: Value = frame.parse_json().unwrap();

        assert_eq!(parsed, json!({ "v": 1, "client_id": "1234" }));
    }

    #[test]
    fn test_handshake_extra_fields() {
        let frame = HandshakeMessage::new("1234")
            .with_version(2)
            .with_field("nonce", json!("abc"))
            .to_frame()
            .unwrap();
        let parsed: Value = frame.parse_json().unwrap();

        assert_eq!(parsed["v"], 2);
        assert_eq!(parsed["nonce"], "abc");
    }

    #[test]
    fn test_ready_acknowledgment_accepted() {
        let payload = json!({
            "cmd": "DISPATCH",
            "evt": "READY",
            "data": { "v": 1, "config": { "cdn_host": "cdn.discordapp.com" } },
            "nonce": null
        });
        let frame = Frame::json(Opcode::Frame, &payload).unwrap();

        assert_eq!(check_acknowledgment(&frame).unwrap(), payload);
    }

    #[test]
    fn test_other_event_rejected() {
        let frame = Frame::json(
            Opcode::Frame,
            &json!({ "cmd": "DISPATCH", "evt": "ERROR", "data": {} }),
        )
        .unwrap();

        assert!(matches!(
            check_acknowledgment(&frame),
            Err(IpcError::HandshakeRejected(_))
        ));
    }

    #[test]
    fn test_close_frame_rejected_with_message() {
        let frame = Frame::json(
            Opcode::Close,
            &json!({ "code": 4000, "message": "Invalid Client ID" }),
        )
        .unwrap();

        let err = check_acknowledgment(&frame).unwrap_err();
        assert!(err.to_string().contains("Invalid Client ID"));
        assert!(err.to_string().contains("4000"));
    }

    #[test]
    fn test_ping_before_ready_rejected() {
        let frame = Frame::new(Opcode::Ping, Bytes::from_static(b"{}"));
        assert!(matches!(
            check_acknowledgment(&frame),
            Err(IpcError::HandshakeRejected(_))
        ));
    }
}
