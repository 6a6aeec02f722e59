//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 8 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use discord_ipc_client::protocol::{build_frame, FrameBuffer, Opcode};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(Opcode::Frame, b"{}");
//!
//! assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
//! let frames = buffer.push(&bytes[5..]).unwrap();
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, Opcode, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 8 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { opcode: Opcode, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// A single read may yield zero, one or several frames. Once a push fails
/// the stream is no longer trustworthy and the buffer should be discarded.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 16KB, max payload: 1MiB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` on an unknown opcode or when the declared
    /// payload exceeds `max_payload_size`.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(header) = Header::decode(&self.buffer) else {
                        return Ok(None);
                    };

                    // Validate before consuming so that a huge length never
                    // drives an allocation.
                    let opcode = header.validate(self.max_payload_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);

                    if header.payload_length == 0 {
                        return Ok(Some(Frame::new(opcode, Bytes::new())));
                    }

                    self.state = State::WaitingForPayload {
                        opcode,
                        remaining: header.payload_length,
                    };
                }

                State::WaitingForPayload { opcode, remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;

                    return Ok(Some(Frame::new(opcode, payload)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpcError;
    use crate::protocol::build_frame;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(Opcode::Frame, b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, Opcode::Frame);
        assert_eq!(&frames[0].payload[..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(Opcode::Ping, b"first");
        combined.extend(build_frame(Opcode::Frame, b"second"));
        combined.extend(build_frame(Opcode::Close, b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, Opcode::Ping);
        assert_eq!(frames[1].opcode, Opcode::Frame);
        assert_eq!(frames[2].opcode, Opcode::Close);
        assert_eq!(&frames[2].payload[..], b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = build_frame(Opcode::Frame, b"test");

        let frames = buffer.push(&frame_bytes[..5]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&frame_bytes[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let frame_bytes = build_frame(Opcode::Frame, payload);

        let partial_len = HEADER_SIZE + 10;
        let frames = buffer.push(&frame_bytes[..partial_len]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&frame_bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(Opcode::Pong, b"")).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_max_payload_validation() {
        let mut buffer = FrameBuffer::with_max_payload(100);
        let header = Header::new(Opcode::Frame, 1000);

        let err = buffer.push(&header.encode()).unwrap_err();
        assert!(matches!(err, IpcError::MalformedFrame(_)));
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = 7u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let err = buffer.push(&bytes).unwrap_err();
        assert!(matches!(err, IpcError::MalformedFrame(_)));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = build_frame(Opcode::Frame, b"test");

        buffer.push(&frame_bytes[..HEADER_SIZE]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let frame1 = build_frame(Opcode::Frame, b"first");
        let frame2 = build_frame(Opcode::Frame, b"second");

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"first");

        let frames = buffer.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], b"second");
    }

    #[test]
    fn test_arbitrary_split_points_yield_same_frames() {
        let originals = vec![
            Frame::new(Opcode::Handshake, Bytes::from_static(br#"{"v":1}"#)),
            Frame::new(Opcode::Frame, Bytes::from_static(br#"{"cmd":"DISPATCH"}"#)),
            Frame::new(Opcode::Ping, Bytes::new()),
            Frame::new(Opcode::Close, Bytes::from_static(br#"{"code":1000}"#)),
        ];
        let stream: Vec<u8> = originals.iter().flat_map(|f| f.encode()).collect();

        for chunk_size in 1..=stream.len() {
            let mut buffer = FrameBuffer::new();
            let mut decoded = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                decoded.extend(buffer.push(chunk).unwrap());
            }
            assert_eq!(decoded, originals, "chunk size {chunk_size}");
            assert!(buffer.is_empty());
        }
    }
}
