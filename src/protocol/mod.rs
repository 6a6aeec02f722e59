//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the binary framing shared by both directions:
//! - 8-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{Header, Opcode, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
