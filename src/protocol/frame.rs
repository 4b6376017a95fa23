//! Complete frames held in memory.
//!
//! The connection never buffers whole frames; these helpers exist for
//! building and inspecting raw wire bytes, e.g. when scripting a peer in
//! tests or tools.
//!
//! # Example
//!
//! ```
//! use ws_engine::protocol::{build_frame, parse_frame, FrameHeader, Opcode};
//!
//! let header = FrameHeader::new(true, Opcode::Text, 5, Some([1, 2, 3, 4]));
//! let bytes = build_frame(&header, b"hello");
//!
//! let (frame, used) = parse_frame(&bytes).unwrap();
//! assert_eq!(used, bytes.len());
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::masking::mask;
use super::wire_format::{FrameHeader, Opcode};

/// A complete frame with an unmasked payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    #[inline]
    pub fn is_final(&self) -> bool {
        self.header.fin
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }
}

/// Build a complete frame as a single byte vector.
///
/// The payload is masked with the header's key, if it has one. The header's
/// `payload_len` is written as given, so it may announce more bytes than
/// `payload` holds.
pub fn build_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let (head, head_len) = header.encode();
    let mut buf = Vec::with_capacity(head_len + payload.len());
    buf.extend_from_slice(&head[..head_len]);
    let start = buf.len();
    buf.extend_from_slice(payload);
    if let Some(key) = header.mask {
        mask(&mut buf[start..], key);
    }
    buf
}

/// Parse one complete frame from the front of `buf`.
///
/// Returns the frame with its payload unmasked and the number of bytes
/// consumed, or `None` if `buf` does not hold a whole frame.
pub fn parse_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    let (header, head_len) = FrameHeader::decode(buf)?;
    let len = usize::try_from(header.payload_len).ok()?;
    let end = head_len.checked_add(len)?;
    let body = buf.get(head_len..end)?;

    let mut payload = BytesMut::from(body);
    if let Some(key) = header.mask {
        mask(&mut payload, key);
    }
    Some((Frame::new(header, payload.freeze()), end))
}

/// Parse every complete frame in `buf`, stopping at the first incomplete one.
pub fn parse_frames(mut buf: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some((frame, used)) = parse_frame(buf) {
        frames.push(frame);
        buf = &buf[used..];
    }
    frames
}
