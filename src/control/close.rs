//! Close frame payload.
//!
//! A close payload is either empty, or a big-endian status code followed by
//! an optional UTF-8 reason. The whole payload fits a control frame, so the
//! reason is limited to 123 bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WebSocketError};
use crate::protocol::{CloseCode, MAX_CONTROL_PAYLOAD};

/// Longest reason that fits next to a status code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// Decoded close payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClosePayload {
    /// `None` when the peer sent an empty close frame.
    pub code: Option<CloseCode>,
    pub reason: String,
}

impl ClosePayload {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Parse and validate a received close payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload.len() {
            0 => Ok(Self::default()),
            1 => Err(WebSocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "close payload of one byte",
            )),
            _ => {
                let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_valid() {
                    return Err(WebSocketError::protocol(
                        CloseCode::PROTOCOL_ERROR,
                        "invalid close status",
                    ));
                }
                let reason = std::str::from_utf8(&payload[2..]).map_err(|_| {
                    WebSocketError::protocol(CloseCode::INVALID_PAYLOAD, "close reason not utf-8")
                })?;
                Ok(Self::new(code, reason))
            }
        }
    }

    /// Encode the payload of an outgoing close frame.
    pub fn encode(code: CloseCode, reason: &str) -> Result<Bytes> {
        if !code.is_sendable() {
            return Err(WebSocketError::InvalidArgument("close status cannot be sent"));
        }
        if reason.len() > MAX_CLOSE_REASON {
            return Err(WebSocketError::InvalidArgument("close reason too long"));
        }
        let mut buf = BytesMut::with_capacity(2 + reason.len());
        buf.put_u16(code.as_u16());
        buf.put_slice(reason.as_bytes());
        Ok(buf.freeze())
    }
}
