//! Wire format encoding and decoding.
//!
//! Implements the 8-byte header format:
//! ```text
//! ┌──────────┬──────────┐
//! │ Opcode   │ Length   │
//! │ 4 bytes  │ 4 bytes  │
//! │ uint32 LE│ uint32 LE│
//! └──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. The payload that follows is
//! UTF-8 JSON for every opcode.

use crate::error::{IpcError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

/// Frame kind discriminant.
///
/// Values are fixed by the peer and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// First frame of every connection, carries `{ v, client_id }`.
    Handshake = 0,
    /// Application traffic (commands, replies, events).
    Frame = 1,
    /// Connection teardown, carries `{ code, message }`.
    Close = 2,
    /// Keep-alive probe; answered with `Pong`.
    Ping = 3,
    /// Keep-alive answer.
    Pong = 4,
}

impl Opcode {
    /// Map a raw discriminant to an opcode.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Raw wire value.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Decoded header from wire format.
///
/// The opcode is kept raw so that an unknown kind can be reported by
/// [`Header::validate`] rather than lost during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw opcode value.
    pub opcode: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(opcode: Opcode, payload_length: u32) -> Self {
        Self {
            opcode: opcode.as_u32(),
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use discord_ipc_client::protocol::{Header, Opcode};
    ///
    /// let bytes = Header::new(Opcode::Frame, 100).encode();
    /// assert_eq!(bytes, [1, 0, 0, 0, 100, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.opcode.to_le_bytes());
        buf[4..8].copy_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            opcode: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            payload_length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header and return its opcode.
    ///
    /// Checks:
    /// - Opcode is one of the five known kinds
    /// - Payload length doesn't exceed max
    pub fn validate(&self, max_payload_size: u32) -> Result<Opcode> {
        let opcode = Opcode::from_u32(self.opcode)
            .ok_or_else(|| IpcError::MalformedFrame(format!("Unknown opcode {}", self.opcode)))?;

        if self.payload_length > max_payload_size {
            return Err(IpcError::MalformedFrame(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(Opcode::Close, 42);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = Header {
            opcode: 0x0102_0304,
            payload_length: 0x0506_0708,
        };
        let bytes = header.encode();

        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn test_header_size_is_exactly_8() {
        assert_eq!(HEADER_SIZE, 8);
        assert_eq!(Header::new(Opcode::Handshake, 0).encode().len(), 8);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 7];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_opcode_discriminants_are_fixed() {
        assert_eq!(Opcode::Handshake.as_u32(), 0);
        assert_eq!(Opcode::Frame.as_u32(), 1);
        assert_eq!(Opcode::Close.as_u32(), 2);
        assert_eq!(Opcode::Ping.as_u32(), 3);
        assert_eq!(Opcode::Pong.as_u32(), 4);

        for value in 0..5 {
            assert_eq!(Opcode::from_u32(value).unwrap().as_u32(), value);
        }
        assert!(Opcode::from_u32(5).is_none());
    }

    #[test]
    fn test_validate_unknown_opcode() {
        let header = Header {
            opcode: 9,
            payload_length: 0,
        };
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(matches!(err, IpcError::MalformedFrame(_)));
        assert!(err.to_string().contains("Unknown opcode 9"));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(Opcode::Frame, 1_000_000);
        let err = header.validate(100).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_returns_opcode() {
        let header = Header::new(Opcode::Ping, 10);
        assert_eq!(header.validate(10).unwrap(), Opcode::Ping);
    }
}
