//! # ws-engine
//!
//! RFC 6455 WebSocket frame engine for a single, already upgraded
//! connection.
//!
//! The engine takes over a byte stream after the HTTP upgrade and handles
//! everything on the frame level: parsing and masking, fragmentation rules,
//! ping/pong, the close handshake, and a write queue that serializes
//! outgoing frames.
//!
//! ## Architecture
//!
//! - **Read path**: [`Connection::read_message`] parses frames from the read
//!   half and yields message data in chunks
//! - **Write path**: a writer task owns the write half and drains a queue of
//!   jobs submitted through [`WriterHandle`]
//! - **Close**: a close timer bounds the handshake, and a close hook runs
//!   exactly once when the connection is torn down
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use ws_engine::{CloseCode, ConnectionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> ws_engine::Result<()> {
//!     let mut conn = ConnectionBuilder::server()
//!         .on_close(|| println!("connection gone"))
//!         .start(upgraded_stream)?;
//!
//!     let mut message = Vec::new();
//!     while let Some(chunk) = conn.read_message().await? {
//!         message.extend_from_slice(&chunk.data);
//!         if chunk.completes_message() {
//!             conn.write_message(Bytes::from(std::mem::take(&mut message)), chunk.is_binary)?
//!                 .await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod slots;
pub mod transport;
pub mod writer;

mod closing;
mod connection;
mod state;

pub use config::{ConnectionConfig, Role};
pub use connection::{Connection, ConnectionBuilder, MessageChunk};
pub use control::{ClosePayload, ControlFrame};
pub use error::{Result, WebSocketError};
pub use protocol::{CloseCode, Opcode};
pub use slots::JobKind;
pub use writer::{WriteCompletion, WriterHandle};
