//! Wire format encoding and decoding.
//!
//! Implements the RFC 6455 frame header:
//! ```text
//! ┌─┬───┬────────┬─┬─────────┬──────────────────┬──────────┐
//! │F│RSV│ Opcode │M│ Len (7) │ Ext len (0/2/8)  │ Mask (0/4)│
//! │1│ 3 │   4    │1│    7    │ uint16/uint64 BE │  bytes   │
//! └─┴───┴────────┴─┴─────────┴──────────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. A header is between 2 and 14
//! bytes long.

use std::fmt;

/// Largest possible header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_SIZE: usize = 14;

/// Maximum payload of a control frame, and of a frame using the short length form.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Length marker announcing a 16-bit extended length.
pub const LENGTH_16_MARKER: u8 = 126;

/// Length marker announcing a 64-bit extended length.
pub const LENGTH_64_MARKER: u8 = 127;

/// Default maximum payload size of a single frame (1 GB).
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 1_073_741_824;

/// Bit constants for the two fixed header bytes.
pub mod bits {
    /// Final fragment of a message.
    pub const FIN: u8 = 0b1000_0000;
    /// RSV1..RSV3. Must be 0 without negotiated extensions.
    pub const RSV_MASK: u8 = 0b0111_0000;
    /// Opcode nibble.
    pub const OPCODE_MASK: u8 = 0b0000_1111;
    /// Payload is masked (second byte).
    pub const MASK: u8 = 0b1000_0000;
    /// 7-bit payload length (second byte).
    pub const LENGTH_MASK: u8 = 0b0111_1111;
}

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Parse an opcode nibble. Reserved values (3-7, 0xB-0xF) yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Close, ping and pong.
    #[inline]
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x08 != 0
    }

    /// Text and binary. Continuation frames are resolved separately.
    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Continuation => "continuation",
            Opcode::Text => "text",
            Opcode::Binary => "binary",
            Opcode::Close => "close",
            Opcode::Ping => "ping",
            Opcode::Pong => "pong",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close status code carried in the first two bytes of a close payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNSUPPORTED: CloseCode = CloseCode(1003);
    /// Reserved. Never sent on the wire.
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// Reserved. Never sent on the wire.
    pub const ABNORMAL: CloseCode = CloseCode(1006);
    pub const INVALID_PAYLOAD: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    pub const MISSING_EXTENSION: CloseCode = CloseCode(1010);
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);
    pub const SERVICE_RESTART: CloseCode = CloseCode(1012);
    pub const TRY_AGAIN_LATER: CloseCode = CloseCode(1013);
    pub const TLS_HANDSHAKE: CloseCode = CloseCode(1015);

    /// Whether this status may appear in a close frame received from a peer.
    ///
    /// Accepted: 1000-1003, 1007-1015 and the registered/private range
    /// 3000-4999.
    pub fn is_valid(self) -> bool {
        matches!(self.0, 1000..=1003 | 1007..=1015 | 3000..=4999)
    }

    /// Whether this status may be sent by this endpoint.
    ///
    /// 1015 is reserved for reporting TLS failures locally.
    pub fn is_sendable(self) -> bool {
        self.is_valid() && self != CloseCode::TLS_HANDSHAKE
    }

    #[inline]
    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode(code)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded frame header.
///
/// `rsv` holds the three reserved bits shifted down to the low end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv: u8,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Create a header with clear reserved bits.
    pub fn new(fin: bool, opcode: Opcode, payload_len: u64, mask: Option<[u8; 4]>) -> Self {
        Self {
            fin,
            rsv: 0,
            opcode,
            mask,
            payload_len,
        }
    }

    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let length_bytes = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        let mask_bytes = if self.mask.is_some() { 4 } else { 0 };
        2 + length_bytes + mask_bytes
    }

    /// Encode header into a scratch buffer.
    ///
    /// Returns the number of bytes written. The shortest length form is
    /// always used.
    pub fn encode_into(&self, buf: &mut [u8; MAX_HEADER_SIZE]) -> usize {
        let mut first = self.opcode.as_u8() | ((self.rsv & 0x07) << 4);
        if self.fin {
            first |= bits::FIN;
        }
        buf[0] = first;

        let mask_bit = if self.mask.is_some() { bits::MASK } else { 0 };
        let mut pos = 2;
        match self.payload_len {
            len @ 0..=125 => {
                buf[1] = mask_bit | len as u8;
            }
            len @ 126..=0xFFFF => {
                buf[1] = mask_bit | LENGTH_16_MARKER;
                buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                pos = 4;
            }
            len => {
                buf[1] = mask_bit | LENGTH_64_MARKER;
                buf[2..10].copy_from_slice(&len.to_be_bytes());
                pos = 10;
            }
        }

        if let Some(key) = self.mask {
            buf[pos..pos + 4].copy_from_slice(&key);
            pos += 4;
        }
        pos
    }

    /// Encode header to a fresh buffer.
    pub fn encode(&self) -> ([u8; MAX_HEADER_SIZE], usize) {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let len = self.encode_into(&mut buf);
        (buf, len)
    }

    /// Decode a complete header from the front of `buf`.
    ///
    /// Returns the header and the number of bytes it occupies, or `None` if
    /// the buffer is too short or the opcode is reserved. No role or size
    /// checks are done here; the streaming parser in `frame_reader` applies
    /// those.
    ///
    /// # Example
    ///
    /// ```
    /// use ws_engine::protocol::{FrameHeader, Opcode};
    ///
    /// let bytes = [0x81, 0x05];
    /// let (header, used) = FrameHeader::decode(&bytes).unwrap();
    /// assert!(header.fin);
    /// assert_eq!(header.opcode, Opcode::Text);
    /// assert_eq!(header.payload_len, 5);
    /// assert_eq!(used, 2);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < 2 {
            return None;
        }
        let opcode = Opcode::from_u8(buf[0] & bits::OPCODE_MASK)?;
        let fin = buf[0] & bits::FIN != 0;
        let rsv = (buf[0] & bits::RSV_MASK) >> 4;
        let masked = buf[1] & bits::MASK != 0;

        let mut pos = 2;
        let payload_len = match buf[1] & bits::LENGTH_MASK {
            LENGTH_16_MARKER => {
                let ext = buf.get(2..4)?;
                pos = 4;
                u16::from_be_bytes([ext[0], ext[1]]) as u64
            }
            LENGTH_64_MARKER => {
                let ext: [u8; 8] = buf.get(2..10)?.try_into().ok()?;
                pos = 10;
                u64::from_be_bytes(ext)
            }
            len => len as u64,
        };

        let mask = if masked {
            let key: [u8; 4] = buf.get(pos..pos + 4)?.try_into().ok()?;
            pos += 4;
            Some(key)
        } else {
            None
        };

        Some((
            Self {
                fin,
                rsv,
                opcode,
                mask,
                payload_len,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in [
            Opcode::Continuation,
            Opcode::Text,
            Opcode::Binary,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ] {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
    }

    #[test]
    fn test_reserved_opcodes() {
        for value in (0x3..=0x7).chain(0xB..=0xF) {
            assert_eq!(Opcode::from_u8(value), None, "opcode {value:#x}");
        }
    }

    #[test]
    fn test_opcode_classes() {
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());
        assert!(!Opcode::Text.is_control());
        assert!(!Opcode::Continuation.is_control());
        assert!(Opcode::Text.is_data());
        assert!(Opcode::Binary.is_data());
        assert!(!Opcode::Continuation.is_data());
    }

    #[test]
    fn test_close_code_validity() {
        for code in [1000, 1001, 1002, 1003, 1007, 1011, 1015, 3000, 4999] {
            assert!(CloseCode(code).is_valid(), "{code} should be valid");
        }
        for code in [0, 999, 1004, 1005, 1006, 1016, 2000, 2999, 5000, 65535] {
            assert!(!CloseCode(code).is_valid(), "{code} should be invalid");
        }
        assert!(!CloseCode::TLS_HANDSHAKE.is_sendable());
        assert!(CloseCode::GOING_AWAY.is_sendable());
    }

    #[test]
    fn test_encode_short_length() {
        let header = FrameHeader::new(true, Opcode::Text, 5, None);
        let (buf, len) = header.encode();
        assert_eq!(len, 2);
        assert_eq!(&buf[..2], &[0x81, 0x05]);
        assert_eq!(header.encoded_len(), 2);
    }

    #[test]
    fn test_encode_16bit_length() {
        let header = FrameHeader::new(false, Opcode::Binary, 126, None);
        let (buf, len) = header.encode();
        assert_eq!(len, 4);
        assert_eq!(&buf[..4], &[0x02, 126, 0x00, 126]);

        let header = FrameHeader::new(true, Opcode::Binary, 65535, None);
        let (buf, len) = header.encode();
        assert_eq!(len, 4);
        assert_eq!(&buf[..4], &[0x82, 126, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_64bit_length_with_mask() {
        let key = [1, 2, 3, 4];
        let header = FrameHeader::new(true, Opcode::Binary, 65536, Some(key));
        let (buf, len) = header.encode();
        assert_eq!(len, MAX_HEADER_SIZE);
        assert_eq!(buf[1], bits::MASK | LENGTH_64_MARKER);
        assert_eq!(&buf[2..10], &65536u64.to_be_bytes());
        assert_eq!(&buf[10..14], &key);
    }

    #[test]
    fn test_decode_matches_encode() {
        for len in [0u64, 1, 125, 126, 65535, 65536, u32::MAX as u64 + 7] {
            for mask in [None, Some([9, 8, 7, 6])] {
                let header = FrameHeader::new(len % 2 == 0, Opcode::Binary, len, mask);
                let (buf, used) = header.encode();
                let (decoded, consumed) = FrameHeader::decode(&buf[..used]).unwrap();
                assert_eq!(decoded, header);
                assert_eq!(consumed, used);
            }
        }
    }

    #[test]
    fn test_decode_too_short() {
        assert!(FrameHeader::decode(&[]).is_none());
        assert!(FrameHeader::decode(&[0x81]).is_none());
        assert!(FrameHeader::decode(&[0x82, 126, 0x01]).is_none());
        assert!(FrameHeader::decode(&[0x82, 0x85, 1, 2]).is_none());
    }

    #[test]
    fn test_decode_rsv_bits() {
        let (header, _) = FrameHeader::decode(&[0xC1, 0x00]).unwrap();
        assert_eq!(header.rsv, 0b100);
    }

    #[test]
    fn test_decode_reserved_opcode() {
        assert!(FrameHeader::decode(&[0x83, 0x00]).is_none());
    }
}
