//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with opcode and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use discord_ipc_client::protocol::{Frame, Opcode};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Opcode::Frame, Bytes::from_static(br#"{"cmd":"DISPATCH"}"#));
//!
//! assert_eq!(frame.opcode(), Opcode::Frame);
//! assert_eq!(frame.payload_len(), 18);
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire_format::{Header, Opcode, HEADER_SIZE};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub opcode: Opcode,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from opcode and payload.
    pub fn new(opcode: Opcode, payload: Bytes) -> Self {
        Self { opcode, payload }
    }

    /// Create a frame whose payload is the JSON encoding of `value`.
    pub fn json<T: Serialize + ?Sized>(opcode: Opcode, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(opcode, Bytes::from(payload)))
    }

    /// Get the opcode.
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Header describing this frame.
    #[inline]
    pub fn header(&self) -> Header {
        Header::new(self.opcode, self.payload.len() as u32)
    }

    /// Deserialize the JSON payload.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Payload as text, lossy. Used for log and error messages.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        build_frame(self.opcode, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Example
///
/// ```
/// use discord_ipc_client::protocol::{build_frame, Opcode};
///
/// let bytes = build_frame(Opcode::Ping, b"{}");
/// assert_eq!(bytes.len(), 8 + 2); // header + payload
/// ```
pub fn build_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(opcode, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
