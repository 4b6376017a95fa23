//! Control frames - ping, pong and close.
//!
//! Control frames are handled by the connection as soon as their payload
//! has been read:
//!
//! 1. Ping: reported to `on_control`, answered with a pong echoing the payload
//! 2. Pong: reported to `on_control`, otherwise ignored
//! 3. Close: validated, then either completes a close we started, or is
//!    reported to `on_control` and answered with a close of our own
//!
//! Size and fragmentation limits are enforced earlier, by the header parser.

mod close;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::Opcode;

pub use close::{ClosePayload, MAX_CLOSE_REASON};

/// A received control frame, as reported to the `on_control` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Ping(Bytes),
    Pong(Bytes),
    Close(ClosePayload),
}

impl ControlFrame {
    /// Interpret the unmasked payload of a control frame.
    ///
    /// Returns `Ok(None)` for data opcodes.
    pub fn parse(opcode: Opcode, payload: Bytes) -> Result<Option<Self>> {
        Ok(match opcode {
            Opcode::Ping => Some(ControlFrame::Ping(payload)),
            Opcode::Pong => Some(ControlFrame::Pong(payload)),
            Opcode::Close => Some(ControlFrame::Close(ClosePayload::parse(&payload)?)),
            Opcode::Continuation | Opcode::Text | Opcode::Binary => None,
        })
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            ControlFrame::Ping(_) => Opcode::Ping,
            ControlFrame::Pong(_) => Opcode::Pong,
            ControlFrame::Close(_) => Opcode::Close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebSocketError;
    use crate::protocol::CloseCode;

    #[test]
    fn test_parse_ping_pong() {
        let frame = ControlFrame::parse(Opcode::Ping, Bytes::from_static(b"abc"))
            .unwrap()
            .unwrap();
        assert_eq!(frame, ControlFrame::Ping(Bytes::from_static(b"abc")));
        assert_eq!(frame.opcode(), Opcode::Ping);

        let frame = ControlFrame::parse(Opcode::Pong, Bytes::new()).unwrap().unwrap();
        assert_eq!(frame.opcode(), Opcode::Pong);
    }

    #[test]
    fn test_parse_close() {
        let frame = ControlFrame::parse(Opcode::Close, Bytes::from_static(&[0x03, 0xE8]))
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            ControlFrame::Close(ClosePayload::new(CloseCode::NORMAL, ""))
        );
    }

    #[test]
    fn test_parse_close_invalid() {
        let err = ControlFrame::parse(Opcode::Close, Bytes::from_static(&[0x03])).unwrap_err();
        assert!(matches!(
            err,
            WebSocketError::Protocol {
                code: CloseCode::PROTOCOL_ERROR,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_data_opcode() {
        assert!(ControlFrame::parse(Opcode::Text, Bytes::new())
            .unwrap()
            .is_none());
    }
}
