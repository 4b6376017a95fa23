//! Fragmented message tracking.
//!
//! A message is one text or binary frame followed by zero or more
//! continuation frames, the last of which has FIN set. Control frames may
//! appear between fragments and never change the tracker state.

use super::wire_format::{CloseCode, Opcode};
use crate::error::{Result, WebSocketError};

/// Data kind a frame's payload belongs to after continuation resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Text,
    Binary,
}

impl DataKind {
    #[inline]
    pub fn is_binary(self) -> bool {
        matches!(self, DataKind::Binary)
    }

    /// Opcode used for the first frame of a message of this kind.
    #[inline]
    pub fn opcode(self) -> Opcode {
        match self {
            DataKind::Text => Opcode::Text,
            DataKind::Binary => Opcode::Binary,
        }
    }
}

/// Tracks whether a fragmented message is in progress and its opcode.
#[derive(Debug, Default)]
pub struct FragmentationTracker {
    frag_kind: Option<DataKind>,
}

impl FragmentationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_fragmented(&self) -> bool {
        self.frag_kind.is_some()
    }

    /// Opcode of the message currently being reassembled.
    #[inline]
    pub fn frag_opcode(&self) -> Option<Opcode> {
        self.frag_kind.map(DataKind::opcode)
    }

    /// Apply the sequencing rules to an incoming frame.
    ///
    /// Returns the resolved data kind for data and continuation frames, and
    /// `None` for control frames.
    pub fn on_frame(&mut self, opcode: Opcode, fin: bool) -> Result<Option<DataKind>> {
        match opcode {
            Opcode::Close | Opcode::Ping | Opcode::Pong => {
                if !fin {
                    return Err(WebSocketError::protocol(
                        CloseCode::PROTOCOL_ERROR,
                        "fragmented control frame",
                    ));
                }
                Ok(None)
            }
            Opcode::Text | Opcode::Binary => {
                if self.is_fragmented() {
                    return Err(WebSocketError::protocol(
                        CloseCode::PROTOCOL_ERROR,
                        "data frame inside fragmented message",
                    ));
                }
                let kind = if opcode == Opcode::Text {
                    DataKind::Text
                } else {
                    DataKind::Binary
                };
                if !fin {
                    self.frag_kind = Some(kind);
                }
                Ok(Some(kind))
            }
            Opcode::Continuation => {
                let kind = self.frag_kind.ok_or(WebSocketError::protocol(
                    CloseCode::PROTOCOL_ERROR,
                    "continuation frame without message",
                ))?;
                if fin {
                    self.frag_kind = None;
                }
                Ok(Some(kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(result: Result<Option<DataKind>>) -> CloseCode {
        match result {
            Err(WebSocketError::Protocol { code, .. }) => code,
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_single_frame_message() {
        let mut tracker = FragmentationTracker::new();
        assert_eq!(
            tracker.on_frame(Opcode::Text, true).unwrap(),
            Some(DataKind::Text)
        );
        assert!(!tracker.is_fragmented());
    }

    #[test]
    fn test_fragmented_message() {
        let mut tracker = FragmentationTracker::new();
        assert_eq!(
            tracker.on_frame(Opcode::Binary, false).unwrap(),
            Some(DataKind::Binary)
        );
        assert!(tracker.is_fragmented());
        assert_eq!(tracker.frag_opcode(), Some(Opcode::Binary));

        assert_eq!(
            tracker.on_frame(Opcode::Continuation, false).unwrap(),
            Some(DataKind::Binary)
        );
        assert_eq!(
            tracker.on_frame(Opcode::Continuation, true).unwrap(),
            Some(DataKind::Binary)
        );
        assert!(!tracker.is_fragmented());
        assert_eq!(tracker.frag_opcode(), None);
    }

    #[test]
    fn test_control_between_fragments() {
        let mut tracker = FragmentationTracker::new();
        tracker.on_frame(Opcode::Text, false).unwrap();
        assert_eq!(tracker.on_frame(Opcode::Ping, true).unwrap(), None);
        assert!(tracker.is_fragmented());
        assert_eq!(
            tracker.on_frame(Opcode::Continuation, true).unwrap(),
            Some(DataKind::Text)
        );
    }

    #[test]
    fn test_orphan_continuation() {
        let mut tracker = FragmentationTracker::new();
        assert_eq!(
            code(tracker.on_frame(Opcode::Continuation, true)),
            CloseCode::PROTOCOL_ERROR
        );
    }

    #[test]
    fn test_data_opcode_mid_fragmentation() {
        let mut tracker = FragmentationTracker::new();
        tracker.on_frame(Opcode::Text, false).unwrap();
        assert_eq!(
            code(tracker.on_frame(Opcode::Binary, true)),
            CloseCode::PROTOCOL_ERROR
        );
    }

    #[test]
    fn test_fragmented_control_frame() {
        let mut tracker = FragmentationTracker::new();
        for op in [Opcode::Ping, Opcode::Pong, Opcode::Close] {
            assert_eq!(code(tracker.on_frame(op, false)), CloseCode::PROTOCOL_ERROR);
        }
    }
}
