//! Connection builder and read path.
//!
//! The [`ConnectionBuilder`] provides a fluent API for configuring a
//! connection and its callbacks. [`ConnectionBuilder::start`] then:
//! 1. Splits the stream into read and write halves
//! 2. Spawns the writer task on the write half
//! 3. Calls `on_connect`
//! 4. Returns a [`Connection`] that reads messages from the read half
//!
//! # Example
//!
//! ```ignore
//! use ws_engine::{CloseCode, ConnectionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = ConnectionBuilder::server()
//!         .on_error(|err| tracing::warn!("connection failed: {}", err))
//!         .start(upgraded_stream)?;
//!
//!     while let Some(chunk) = conn.read_message().await? {
//!         println!("{} bytes, last={}", chunk.data.len(), chunk.is_last_chunk);
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{ConnectionConfig, Role};
use crate::control::ControlFrame;
use crate::error::{Result, WebSocketError};
use crate::handler::Callbacks;
use crate::protocol::{
    mask, mask_at, CloseCode, DataKind, FragmentationTracker, FrameHeader, FrameReader,
    Utf8Validator,
};
use crate::state::ConnectionState;
use crate::transport::{BoxedReader, BufferedReader};
use crate::writer::{spawn_writer_task, WriteCompletion, WriterHandle};

/// A piece of a received message.
///
/// Large frames are delivered in several chunks of at most
/// `read_chunk_size` bytes. `is_last_chunk` marks the end of a frame and
/// `is_last_frame` that the frame has FIN set, so a message is complete
/// when both are true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub data: Bytes,
    pub is_last_chunk: bool,
    pub is_last_frame: bool,
    pub is_binary: bool,
}

impl MessageChunk {
    /// Last chunk of the last frame of a message.
    #[inline]
    pub fn completes_message(&self) -> bool {
        self.is_last_chunk && self.is_last_frame
    }
}

/// Data frame whose payload is being delivered.
#[derive(Debug)]
struct InboundFrame {
    header: FrameHeader,
    kind: DataKind,
    remaining: u64,
    offset: u64,
}

/// Builder for configuring and starting a connection.
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    callbacks: Callbacks,
}

impl ConnectionBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            callbacks: Callbacks::new(),
        }
    }

    /// Builder for the accepting end of an upgraded connection.
    pub fn server() -> Self {
        Self::new(ConnectionConfig::server())
    }

    /// Builder for the connecting end. Outgoing frames are masked.
    pub fn client() -> Self {
        Self::new(ConnectionConfig::client())
    }

    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set how long a self-initiated close waits for the peer's reply.
    ///
    /// Default: 5 seconds
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the largest frame payload accepted from the peer.
    ///
    /// Default: 1 GB
    pub fn max_frame_size(mut self, size: u64) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the largest chunk returned by one `read_message` call.
    ///
    /// Default: 64 KB
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Accept or reject text messages. Rejected messages close with 1003.
    pub fn accept_text(mut self, accept: bool) -> Self {
        self.config.accept_text = accept;
        self
    }

    /// Accept or reject binary messages. Rejected messages close with 1003.
    pub fn accept_binary(mut self, accept: bool) -> Self {
        self.config.accept_binary = accept;
        self
    }

    pub fn on_connect<F>(mut self, handler: F) -> Self
    where
        F: Fn(&WriterHandle) + Send + Sync + 'static,
    {
        self.callbacks.set_on_connect(handler);
        self
    }

    /// Register a callback for received pings, pongs and peer-initiated closes.
    ///
    /// Pings are answered automatically after the callback returns. The
    /// close that answers our own close is not reported.
    pub fn on_control<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ControlFrame) + Send + Sync + 'static,
    {
        self.callbacks.set_on_control(handler);
        self
    }

    /// Register a callback for the first fatal error on the connection.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&WebSocketError) + Send + Sync + 'static,
    {
        self.callbacks.set_on_error(handler);
        self
    }

    /// Register a hook that runs once when the connection is torn down.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks.set_close_hook(hook);
        self
    }

    /// Start the connection on a connected stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S>(self, stream: S) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.start_split(reader, writer)
    }

    /// Start the connection on separate read and write halves.
    ///
    /// The reader may already hold bytes that followed the upgrade request.
    pub fn start_split<R, W>(self, reader: R, writer: W) -> Result<Connection>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| {
            WebSocketError::InvalidArgument("connection must be started within a tokio runtime")
        })?;
        let config = self.config;

        let state = Arc::new(ConnectionState::new(config.role, self.callbacks));
        let (writer, writer_task) = spawn_writer_task(
            &runtime,
            writer,
            state.clone(),
            config.close_timeout(),
        );

        let reader: BoxedReader = Box::new(reader);
        let conn = Connection {
            reader: BufferedReader::new(reader),
            frames: FrameReader::new(config.role, config.max_frame_size),
            fragments: FragmentationTracker::new(),
            utf8: Utf8Validator::new(),
            current: None,
            pending_pong: None,
            shutdown: state.subscribe(),
            writer,
            state,
            config,
            finished: false,
            _writer_task: writer_task,
        };

        tracing::debug!("{:?} connection started", conn.config.role);
        conn.state.callbacks().connected(&conn.writer);
        Ok(conn)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::server()
    }
}

/// A running WebSocket connection.
///
/// Use `read_message()` to receive data, and the write methods (or a
/// [`WriterHandle`] from `writer()`) to send.
pub struct Connection {
    reader: BufferedReader<BoxedReader>,
    frames: FrameReader,
    fragments: FragmentationTracker,
    utf8: Utf8Validator,
    current: Option<InboundFrame>,
    /// Auto-reply to the last ping, until it is written.
    pending_pong: Option<WriteCompletion>,
    shutdown: watch::Receiver<bool>,
    writer: WriterHandle,
    state: Arc<ConnectionState>,
    config: ConnectionConfig,
    finished: bool,
    /// Writer task handle.
    _writer_task: JoinHandle<()>,
}

impl Connection {
    /// Create a server-side builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::server()
    }

    /// Read the next chunk of message data.
    ///
    /// Control frames are handled internally while waiting for data: pings
    /// are answered, and a close frame ends the stream.
    ///
    /// Returns:
    /// - `Ok(Some(chunk))` for the next piece of a message
    /// - `Ok(None)` once the connection has ended: close handshake done,
    ///   peer closed the stream between frames, or teardown from elsewhere
    /// - `Err(...)` on a protocol violation or transport failure. `on_error`
    ///   has been called and the connection is being torn down.
    ///
    /// This future is not cancel safe: dropping it mid-frame loses the
    /// position in the stream.
    pub async fn read_message(&mut self) -> Result<Option<MessageChunk>> {
        if self.finished || self.state.is_closed() {
            self.finished = true;
            return Ok(None);
        }

        let mut shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => None,
            result = self.next_chunk() => Some(result),
        };

        match outcome {
            Some(Ok(Some(chunk))) => Ok(Some(chunk)),
            Some(Ok(None)) | None => {
                self.finished = true;
                Ok(None)
            }
            Some(Err(err)) => {
                self.finished = true;
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Start a data frame. See [`WriterHandle::write_message_first_chunk`].
    pub fn write_message_first_chunk(
        &self,
        frame_len: u64,
        chunk: Bytes,
        is_last_frame: bool,
        is_binary: bool,
    ) -> Result<WriteCompletion> {
        self.writer
            .write_message_first_chunk(frame_len, chunk, is_last_frame, is_binary)
    }

    /// Continue the current data frame.
    pub fn write_message_continuation_chunk(&self, chunk: Bytes) -> Result<WriteCompletion> {
        self.writer.write_message_continuation_chunk(chunk)
    }

    /// Write a complete single-frame message.
    pub fn write_message(&self, payload: Bytes, is_binary: bool) -> Result<WriteCompletion> {
        self.writer.write_message(payload, is_binary)
    }

    pub fn write_ping(&self, payload: Bytes) -> Result<WriteCompletion> {
        self.writer.write_ping(payload)
    }

    pub fn write_pong(&self, payload: Bytes) -> Result<WriteCompletion> {
        self.writer.write_pong(payload)
    }

    /// Start the close handshake. See [`WriterHandle::close`].
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<WriteCompletion> {
        self.writer.close(code, reason)
    }

    /// Get a cloneable handle for writing from other tasks.
    pub fn writer(&self) -> WriterHandle {
        self.writer.clone()
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Next data chunk, handling any control frames that come first.
    async fn next_chunk(&mut self) -> Result<Option<MessageChunk>> {
        loop {
            if self.current.is_some() {
                return self.read_data_chunk().await.map(Some);
            }

            let Some(header) = self.frames.read_header(&mut self.reader).await? else {
                return self.on_stream_end();
            };

            match self.fragments.on_frame(header.opcode, header.fin)? {
                Some(kind) => self.begin_data_frame(header, kind)?,
                None => {
                    let payload = self.read_control_payload(&header).await?;
                    if self.handle_control(header, payload).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn begin_data_frame(&mut self, header: FrameHeader, kind: DataKind) -> Result<()> {
        let accepted = match kind {
            DataKind::Text => self.config.accept_text,
            DataKind::Binary => self.config.accept_binary,
        };
        if !accepted {
            return Err(WebSocketError::protocol(
                CloseCode::UNSUPPORTED,
                "unsupported message type",
            ));
        }
        if header.opcode.is_data() {
            self.utf8.reset();
        }
        self.current = Some(InboundFrame {
            header,
            kind,
            remaining: header.payload_len,
            offset: 0,
        });
        Ok(())
    }

    async fn read_data_chunk(&mut self) -> Result<MessageChunk> {
        let (len, key, offset) = match &self.current {
            Some(frame) => (
                frame.remaining.min(self.config.read_chunk_size.max(1) as u64) as usize,
                frame.header.mask,
                frame.offset,
            ),
            None => return Err(WebSocketError::OperationNotPermitted("no frame in progress")),
        };

        let mut data = required(self.reader.read_exactly(len).await?)?;
        if let Some(key) = key {
            mask_at(&mut data, key, offset);
        }

        let Some(frame) = self.current.as_mut() else {
            return Err(WebSocketError::OperationNotPermitted("no frame in progress"));
        };
        frame.remaining -= len as u64;
        frame.offset += len as u64;
        let is_last_chunk = frame.remaining == 0;
        let is_last_frame = frame.header.fin;
        let kind = frame.kind;
        if is_last_chunk {
            self.current = None;
        }

        if kind == DataKind::Text {
            if self.utf8.feed(&data).is_err() {
                return Err(WebSocketError::protocol(
                    CloseCode::INVALID_PAYLOAD,
                    "invalid utf-8 in text message",
                ));
            }
            if is_last_chunk && is_last_frame && !self.utf8.is_complete() {
                return Err(WebSocketError::protocol(
                    CloseCode::INVALID_PAYLOAD,
                    "text message ends inside a utf-8 sequence",
                ));
            }
        }

        Ok(MessageChunk {
            data: data.freeze(),
            is_last_chunk,
            is_last_frame,
            is_binary: kind.is_binary(),
        })
    }

    async fn read_control_payload(&mut self, header: &FrameHeader) -> Result<Bytes> {
        let mut payload = required(self.reader.read_exactly(header.payload_len as usize).await?)?;
        if let Some(key) = header.mask {
            mask(&mut payload, key);
        }
        Ok(payload.freeze())
    }

    /// Returns true if the frame ended the connection.
    async fn handle_control(&mut self, header: FrameHeader, payload: Bytes) -> Result<bool> {
        let Some(frame) = ControlFrame::parse(header.opcode, payload)? else {
            return Ok(false);
        };
        tracing::debug!("received {} frame", frame.opcode());

        match &frame {
            ControlFrame::Close(_) if self.state.is_self_close_pending() => {
                self.state.teardown("close handshake completed");
                Ok(true)
            }
            ControlFrame::Close(close) => {
                tracing::debug!("peer closed with {:?} {:?}", close.code, close.reason);
                self.state.callbacks().control(&frame);
                if let Err(e) = self.writer.queue_final_close(CloseCode::GOING_AWAY, "") {
                    tracing::warn!("could not reply to close: {}", e);
                    self.state.teardown("close reply failed");
                }
                Ok(true)
            }
            ControlFrame::Ping(data) => {
                let data = data.clone();
                self.state.callbacks().control(&frame);
                self.answer_ping(data).await;
                Ok(false)
            }
            ControlFrame::Pong(_) => {
                self.state.callbacks().control(&frame);
                Ok(false)
            }
        }
    }

    /// Queue a pong for the latest ping.
    ///
    /// A pong still waiting in the queue is let out first, so every ping
    /// read gets its own answer.
    async fn answer_ping(&mut self, payload: Bytes) {
        if let Some(previous) = self.pending_pong.take() {
            if let Err(e) = previous.await {
                tracing::debug!("previous pong not written: {}", e);
            }
        }
        match self.writer.queue_pong_reply(payload) {
            Ok(completion) => self.pending_pong = Some(completion),
            Err(e) => tracing::warn!("not answering ping: {}", e),
        }
    }

    /// The stream ended cleanly between two frames.
    fn on_stream_end(&mut self) -> Result<Option<MessageChunk>> {
        if self.fragments.is_fragmented() {
            return Err(unexpected_eof("stream ended inside a fragmented message"));
        }
        if self.state.is_self_close_pending() {
            return Err(unexpected_eof("stream ended during the close handshake"));
        }
        self.state.teardown("peer closed the stream");
        Ok(None)
    }

    /// Report a fatal read error and shut the connection down.
    fn fail(&mut self, err: &WebSocketError) {
        if self.state.is_closed() {
            return;
        }
        self.state.report_error(err);

        match err {
            WebSocketError::Protocol { code, reason } if !self.state.is_self_close_pending() => {
                tracing::warn!("protocol violation ({}): {}", code, reason);
                if let Err(e) = self.writer.queue_final_close(*code, reason) {
                    tracing::warn!("could not send error close: {}", e);
                    self.state.teardown("protocol violation");
                }
            }
            _ => {
                tracing::error!("connection failed: {}", err);
                self.state.teardown("read failed");
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.config.role)
            .field("closed", &self.state.is_closed())
            .field("finished", &self.finished)
            .finish()
    }
}

fn unexpected_eof(msg: &'static str) -> WebSocketError {
    WebSocketError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, msg))
}

/// Payload reads happen after a header, so EOF cuts the frame short.
fn required<T>(part: Option<T>) -> Result<T> {
    part.ok_or_else(|| unexpected_eof("stream ended inside a frame payload"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_configuration() {
        let builder = ConnectionBuilder::client()
            .close_timeout(Duration::from_millis(250))
            .max_frame_size(4096)
            .read_chunk_size(0)
            .accept_text(false);

        assert_eq!(builder.config.role, Role::Client);
        assert_eq!(builder.config.close_timeout(), Duration::from_millis(250));
        assert_eq!(builder.config.max_frame_size, 4096);
        assert_eq!(builder.config.read_chunk_size, 1);
        assert!(!builder.config.accept_text);
        assert!(builder.config.accept_binary);
    }

    #[test]
    fn test_builder_default_is_server() {
        assert_eq!(ConnectionBuilder::default().config.role, Role::Server);
        assert_eq!(Connection::builder().config.role, Role::Server);
    }

    #[tokio::test]
    async fn test_read_buffer_independent_of_chunk_size() {
        let (local, _peer) = tokio::io::duplex(64);
        let conn = ConnectionBuilder::server()
            .read_chunk_size(1)
            .start(local)
            .unwrap();
        assert_eq!(conn.reader.capacity(), crate::transport::DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(conn.config.read_chunk_size, 1);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (local, _peer) = tokio::io::duplex(64);
        let result = ConnectionBuilder::server().start(local);
        assert!(matches!(result, Err(WebSocketError::InvalidArgument(_))));
    }

    #[test]
    fn test_chunk_completes_message() {
        let chunk = MessageChunk {
            data: Bytes::new(),
            is_last_chunk: true,
            is_last_frame: false,
            is_binary: false,
        };
        assert!(!chunk.completes_message());
    }
}
