//! Connection configuration.
//!
//! All fields have defaults, so a partial JSON document is enough:
//!
//! ```
//! use ws_engine::config::{ConnectionConfig, Role};
//!
//! let config = ConnectionConfig::from_json_str(r#"{"role": "client", "close_timeout_ms": 250}"#).unwrap();
//! assert_eq!(config.role, Role::Client);
//! assert_eq!(config.close_timeout().as_millis(), 250);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Default close handshake timeout.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default largest chunk handed to the reader at once.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Which end of the connection this engine runs.
///
/// Clients mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Whether frames sent by this end carry a mask.
    #[inline]
    pub fn masks_outgoing(self) -> bool {
        matches!(self, Role::Client)
    }

    /// Whether frames received by this end must carry a mask.
    #[inline]
    pub fn expects_masked(self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Configuration for a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub role: Role,
    /// How long a self-initiated close waits for the peer's reply.
    pub close_timeout_ms: u64,
    /// Frames announcing a larger payload are rejected with 1009.
    pub max_frame_size: u64,
    /// Largest chunk returned by a single `read_message` call.
    pub read_chunk_size: usize,
    /// Accept text messages. Rejected kinds close with 1003.
    pub accept_text: bool,
    /// Accept binary messages.
    pub accept_binary: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT.as_millis() as u64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            accept_text: true,
            accept_binary: true,
        }
    }
}

impl ConnectionConfig {
    pub fn server() -> Self {
        Self::default()
    }

    pub fn client() -> Self {
        Self {
            role: Role::Client,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[inline]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.close_timeout(), DEFAULT_CLOSE_TIMEOUT);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
        assert!(config.accept_text && config.accept_binary);
    }

    #[test]
    fn test_role_masking() {
        assert!(Role::Client.masks_outgoing());
        assert!(!Role::Client.expects_masked());
        assert!(!Role::Server.masks_outgoing());
        assert!(Role::Server.expects_masked());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            ConnectionConfig::from_json_str(r#"{"max_frame_size": 1024, "accept_binary": false}"#)
                .unwrap();
        assert_eq!(config.max_frame_size, 1024);
        assert!(!config.accept_binary);
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK_SIZE);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(ConnectionConfig::from_json_str(r#"{"role": "proxy"}"#).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ConnectionConfig::client();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(ConnectionConfig::from_json_str(&json).unwrap(), config);
    }
}
