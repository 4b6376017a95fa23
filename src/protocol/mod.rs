//! Protocol module - wire format, masking, and frame parsing.
//!
//! This module implements the RFC 6455 framing layer:
//! - Header encoding/decoding with 7, 16 and 64-bit lengths
//! - Payload masking with a word-at-a-time fast path
//! - Streaming header parser over exact-length reads
//! - Fragmentation tracking and incremental UTF-8 validation

mod fragmentation;
mod frame;
mod frame_reader;
mod masking;
mod utf8;
mod wire_format;

pub use fragmentation::{DataKind, FragmentationTracker};
pub use frame::{build_frame, parse_frame, parse_frames, Frame};
pub use frame_reader::FrameReader;
pub use masking::{mask, mask_at, mask_bytewise, rotate_key};
pub use utf8::{Utf8Rejected, Utf8Validator};
pub use wire_format::{
    bits, CloseCode, FrameHeader, Opcode, DEFAULT_MAX_FRAME_SIZE, LENGTH_16_MARKER,
    LENGTH_64_MARKER, MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE,
};
