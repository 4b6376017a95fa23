//! Error types for ws-engine.

use thiserror::Error;

use crate::protocol::CloseCode;

/// Main error type for all WebSocket operations.
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer violated RFC 6455. `code` is the close status sent back.
    #[error("Protocol error ({code}): {reason}")]
    Protocol {
        code: CloseCode,
        reason: &'static str,
    },

    /// An argument passed to the API was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation conflicts with one already in progress.
    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(&'static str),

    /// A queued write was dropped because an earlier write failed or the
    /// connection was torn down.
    #[error("Operation aborted")]
    OperationAborted,

    /// The close timer could not be armed.
    #[error("Timer error: {0}")]
    Timer(&'static str),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl WebSocketError {
    pub(crate) fn protocol(code: CloseCode, reason: &'static str) -> Self {
        WebSocketError::Protocol { code, reason }
    }

    /// Close status associated with this error.
    ///
    /// Protocol violations carry their own status; transport and internal
    /// failures report [`CloseCode::INTERNAL_ERROR`].
    pub fn close_code(&self) -> CloseCode {
        match self {
            WebSocketError::Protocol { code, .. } => *code,
            WebSocketError::ConnectionClosed => CloseCode::NORMAL,
            _ => CloseCode::INTERNAL_ERROR,
        }
    }

    /// Returns true if the error came from the peer breaking the protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self, WebSocketError::Protocol { .. })
    }
}

/// Result type alias using WebSocketError.
pub type Result<T> = std::result::Result<T, WebSocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_mapping() {
        let err = WebSocketError::protocol(CloseCode::INVALID_PAYLOAD, "invalid utf-8");
        assert_eq!(err.close_code(), CloseCode::INVALID_PAYLOAD);
        assert!(err.is_protocol());

        let err = WebSocketError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(err.close_code(), CloseCode::INTERNAL_ERROR);
        assert!(!err.is_protocol());
    }

    #[test]
    fn test_display() {
        let err = WebSocketError::protocol(CloseCode::PROTOCOL_ERROR, "reserved bits set");
        assert_eq!(err.to_string(), "Protocol error (1002): reserved bits set");
    }
}
