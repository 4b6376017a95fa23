//! Write job queue and the dedicated writer task.
//!
//! Every write operation builds one [`WriteJob`] and hands it to a writer
//! task over an mpsc channel. The writer task owns the write half of the
//! stream and transmits one job at a time, so jobs never interleave on the
//! wire and complete in submission order.
//!
//! # Architecture
//!
//! ```text
//! write_message_first_chunk ─┐
//! write_ping / write_pong    ─┼─► mpsc::Sender<WriteJob> ─► Writer Task ─► Stream
//! close / internal replies   ─┘
//! ```
//!
//! # Failure
//!
//! When a write fails, the failing job completes with the I/O error,
//! `on_error` fires once, every job still queued completes with
//! [`WebSocketError::OperationAborted`], and the connection is torn down.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::closing::arm_close_timer;
use crate::control::ClosePayload;
use crate::error::{Result, WebSocketError};
use crate::protocol::{mask_at, CloseCode, FrameHeader, Opcode, MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE};
use crate::slots::{JobKind, JobSlots, SlotGuard};
use crate::state::{lock, ConnectionState};

/// Job queue capacity. Slots allow at most one outstanding job per kind,
/// internal replies included, so the queue never fills.
const QUEUE_CAPACITY: usize = 8;

/// What the writer does after a job has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterWrite {
    Continue,
    Teardown,
}

/// One queued write.
#[derive(Debug)]
pub(crate) struct WriteJob {
    kind: JobKind,
    /// Header scratch; `header_len` is 0 for continuation chunks.
    header: [u8; MAX_HEADER_SIZE],
    header_len: usize,
    payload: Bytes,
    /// Payload bytes of the same frame still owed once this job is written.
    frame_remaining: u64,
    after: AfterWrite,
    completion: Option<oneshot::Sender<Result<()>>>,
    slot: Option<SlotGuard>,
}

impl WriteJob {
    fn new(
        slot: SlotGuard,
        header: Option<&FrameHeader>,
        payload: Bytes,
        frame_remaining: u64,
    ) -> Self {
        let mut scratch = [0u8; MAX_HEADER_SIZE];
        let header_len = header.map_or(0, |h| h.encode_into(&mut scratch));
        Self {
            kind: slot.kind(),
            header: scratch,
            header_len,
            payload,
            frame_remaining,
            after: AfterWrite::Continue,
            completion: None,
            slot: Some(slot),
        }
    }

    fn then(mut self, after: AfterWrite) -> Self {
        self.after = after;
        self
    }

    fn with_completion(&mut self) -> WriteCompletion {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        WriteCompletion { rx }
    }

    #[inline]
    fn size(&self) -> usize {
        self.header_len + self.payload.len()
    }

    /// Release the job's slot, then signal its completion.
    fn finish(mut self, result: Result<()>) {
        drop(self.slot.take());
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}

/// Resolves when a submitted write has reached the stream, or has failed.
///
/// Dropping it does not cancel the write.
#[derive(Debug)]
#[must_use = "a write completion does nothing unless awaited"]
pub struct WriteCompletion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Future for WriteCompletion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(WebSocketError::OperationAborted)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Frame being written in pieces through first and continuation chunks.
#[derive(Debug, Default)]
struct OutgoingFrame {
    /// Payload bytes not yet submitted.
    remaining: u64,
    /// Payload bytes already submitted.
    offset: u64,
    mask: Option<[u8; 4]>,
    /// The last frame sent had FIN clear, so the next one is a continuation.
    message_open: bool,
}

/// Handle for submitting writes to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks. Every method
/// checks its arguments and the connection state synchronously; a returned
/// [`WriteCompletion`] means the job was queued.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteJob>,
    slots: JobSlots,
    outgoing: Arc<Mutex<OutgoingFrame>>,
    state: Arc<ConnectionState>,
    close_timeout: Duration,
}

impl WriterHandle {
    /// Start a data frame of `frame_len` payload bytes and write its first chunk.
    ///
    /// The rest of the frame is written with
    /// [`write_message_continuation_chunk`](Self::write_message_continuation_chunk),
    /// which may be called before this write completes. If `is_last_frame`
    /// is false, the next frame started is sent as a continuation of the
    /// same message.
    pub fn write_message_first_chunk(
        &self,
        frame_len: u64,
        chunk: Bytes,
        is_last_frame: bool,
        is_binary: bool,
    ) -> Result<WriteCompletion> {
        self.ensure_writable()?;
        let chunk_len = chunk.len() as u64;
        if chunk_len > frame_len {
            return Err(WebSocketError::InvalidArgument("chunk longer than frame"));
        }
        let slot = self.slots.try_acquire(JobKind::MessageFirstChunk)?;

        let mut outgoing = lock(&self.outgoing);
        if outgoing.remaining > 0 {
            return Err(WebSocketError::OperationNotPermitted(
                "previous frame not completely written",
            ));
        }

        let opcode = if outgoing.message_open {
            Opcode::Continuation
        } else if is_binary {
            Opcode::Binary
        } else {
            Opcode::Text
        };
        let mask = self.new_mask_key();
        let header = FrameHeader::new(is_last_frame, opcode, frame_len, mask);
        let payload = apply_mask(chunk, mask, 0);
        let remaining = frame_len - chunk_len;

        let mut job = WriteJob::new(slot, Some(&header), payload, remaining);
        let completion = job.with_completion();
        self.submit(job)?;

        outgoing.remaining = remaining;
        outgoing.offset = chunk_len;
        outgoing.mask = mask;
        outgoing.message_open = !is_last_frame;
        Ok(completion)
    }

    /// Write more payload bytes of the frame started by the last first chunk.
    ///
    /// Still accepted after `close`, so a frame already started can be
    /// finished before the close frame goes out.
    pub fn write_message_continuation_chunk(&self, chunk: Bytes) -> Result<WriteCompletion> {
        self.ensure_open()?;
        let slot = self.slots.try_acquire(JobKind::ContinuationChunk)?;

        let mut outgoing = lock(&self.outgoing);
        if outgoing.remaining == 0 {
            return Err(WebSocketError::OperationNotPermitted("no frame in progress"));
        }
        let chunk_len = chunk.len() as u64;
        if chunk_len > outgoing.remaining {
            return Err(WebSocketError::InvalidArgument(
                "chunk exceeds remaining frame length",
            ));
        }

        let payload = apply_mask(chunk, outgoing.mask, outgoing.offset);
        let remaining = outgoing.remaining - chunk_len;

        let mut job = WriteJob::new(slot, None, payload, remaining);
        let completion = job.with_completion();
        self.submit(job)?;

        outgoing.remaining = remaining;
        outgoing.offset += chunk_len;
        Ok(completion)
    }

    /// Write a complete single-frame message.
    pub fn write_message(&self, payload: Bytes, is_binary: bool) -> Result<WriteCompletion> {
        self.write_message_first_chunk(payload.len() as u64, payload, true, is_binary)
    }

    pub fn write_ping(&self, payload: Bytes) -> Result<WriteCompletion> {
        self.write_control(JobKind::Ping, Opcode::Ping, payload)
    }

    pub fn write_pong(&self, payload: Bytes) -> Result<WriteCompletion> {
        self.write_control(JobKind::Pong, Opcode::Pong, payload)
    }

    /// Start the close handshake.
    ///
    /// Sends a close frame with `code` and `reason` and arms the close
    /// timer. The connection is torn down when the peer's close frame is
    /// read, or when the timer expires, whichever happens first.
    ///
    /// Fails synchronously, without sending anything, if the arguments are
    /// invalid, a close was already started, or the timer cannot be armed.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<WriteCompletion> {
        self.ensure_open()?;
        let payload = ClosePayload::encode(code, reason)?;
        let slot = self.slots.try_acquire(JobKind::Close)?;
        if self.state.is_self_close_pending() {
            return Err(WebSocketError::OperationNotPermitted("close already in progress"));
        }

        arm_close_timer(&self.state, self.close_timeout)?;
        self.state.begin_self_close();
        tracing::debug!("sending close {}", code);

        let header = FrameHeader::new(true, Opcode::Close, payload.len() as u64, self.new_mask_key());
        let payload = apply_mask(payload, header.mask, 0);
        let mut job = WriteJob::new(slot, Some(&header), payload, 0);
        let completion = job.with_completion();
        self.submit(job)?;
        Ok(completion)
    }

    /// Returns true once the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Returns true while a job of `kind` is queued or being written.
    pub fn is_pending(&self, kind: JobKind) -> bool {
        self.slots.is_busy(kind)
    }

    /// Queue a pong echoing a received ping.
    pub(crate) fn queue_pong_reply(&self, payload: Bytes) -> Result<WriteCompletion> {
        self.ensure_writable()?;
        let slot = self.slots.try_acquire(JobKind::Pong)?;
        let header = FrameHeader::new(true, Opcode::Pong, payload.len() as u64, self.new_mask_key());
        let payload = apply_mask(payload, header.mask, 0);
        let mut job = WriteJob::new(slot, Some(&header), payload, 0);
        let completion = job.with_completion();
        self.submit(job)?;
        Ok(completion)
    }

    /// Queue a close frame after which the connection is torn down.
    ///
    /// Used for replies to a peer's close and for closes caused by protocol
    /// violations. The close timer bounds how long the write may take.
    pub(crate) fn queue_final_close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.ensure_open()?;
        let payload = ClosePayload::encode(code, reason)?;
        let slot = self.slots.try_acquire(JobKind::Close)?;
        arm_close_timer(&self.state, self.close_timeout)?;

        let header = FrameHeader::new(true, Opcode::Close, payload.len() as u64, self.new_mask_key());
        let payload = apply_mask(payload, header.mask, 0);
        let job = WriteJob::new(slot, Some(&header), payload, 0).then(AfterWrite::Teardown);
        self.submit(job)
    }

    fn write_control(&self, kind: JobKind, opcode: Opcode, payload: Bytes) -> Result<WriteCompletion> {
        self.ensure_writable()?;
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::InvalidArgument("control payload exceeds 125 bytes"));
        }
        let slot = self.slots.try_acquire(kind)?;
        let header = FrameHeader::new(true, opcode, payload.len() as u64, self.new_mask_key());
        let payload = apply_mask(payload, header.mask, 0);
        let mut job = WriteJob::new(slot, Some(&header), payload, 0);
        let completion = job.with_completion();
        self.submit(job)?;
        Ok(completion)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(WebSocketError::ConnectionClosed);
        }
        Ok(())
    }

    /// Nothing new may follow our own close frame.
    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.state.is_self_close_pending() {
            return Err(WebSocketError::OperationNotPermitted("close frame already sent"));
        }
        Ok(())
    }

    fn new_mask_key(&self) -> Option<[u8; 4]> {
        self.state
            .role()
            .masks_outgoing()
            .then(rand::random::<[u8; 4]>)
    }

    fn submit(&self, job: WriteJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                WebSocketError::OperationNotPermitted("write queue full")
            }
            mpsc::error::TrySendError::Closed(_) => WebSocketError::ConnectionClosed,
        })
    }
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("role", &self.state.role())
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

/// Mask a payload copy when sending as a client.
fn apply_mask(payload: Bytes, mask: Option<[u8; 4]>, offset: u64) -> Bytes {
    match mask {
        Some(key) => {
            let mut buf = BytesMut::from(&payload[..]);
            mask_at(&mut buf, key, offset);
            buf.freeze()
        }
        None => payload,
    }
}

/// Spawn the writer task and return a handle for submitting jobs.
pub(crate) fn spawn_writer_task<W>(
    runtime: &Handle,
    writer: W,
    state: Arc<ConnectionState>,
    close_timeout: Duration,
) -> (WriterHandle, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let handle = WriterHandle {
        tx,
        slots: JobSlots::new(),
        outgoing: Arc::new(Mutex::new(OutgoingFrame::default())),
        state: state.clone(),
        close_timeout,
    };
    let task = runtime.spawn(writer_loop(rx, writer, state));
    (handle, task)
}

/// Main writer loop - receives jobs and writes them one at a time.
///
/// Jobs that arrive while a frame is only partly written are held back
/// until its continuation chunks have gone out. Once a close frame is on
/// the wire, every later job completes with `OperationAborted`.
async fn writer_loop<W>(mut rx: mpsc::Receiver<WriteJob>, mut writer: W, state: Arc<ConnectionState>)
where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = state.subscribe();
    let mut deferred: VecDeque<WriteJob> = VecDeque::new();
    let mut frame_open = false;
    let mut close_sent = false;

    loop {
        let next = if frame_open { None } else { deferred.pop_front() };
        let job = match next {
            Some(job) => job,
            None => {
                let received = tokio::select! {
                    biased;
                    _ = wait_shutdown(&mut shutdown) => None,
                    job = rx.recv() => job,
                };
                match received {
                    Some(job) => job,
                    None => break,
                }
            }
        };

        if close_sent {
            job.finish(Err(WebSocketError::OperationAborted));
            continue;
        }
        if frame_open && job.kind != JobKind::ContinuationChunk {
            deferred.push_back(job);
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = wait_shutdown(&mut shutdown) => None,
            result = write_job(&mut writer, &job) => Some(result),
        };
        let Some(result) = outcome else {
            job.finish(Err(WebSocketError::OperationAborted));
            break;
        };

        match result {
            Ok(()) => {
                tracing::trace!("wrote {} job ({} bytes)", job.kind, job.size());
                frame_open = job.frame_remaining > 0;
                let after = job.after;
                let kind = job.kind;
                job.finish(Ok(()));
                if after == AfterWrite::Teardown {
                    state.teardown("final close frame written");
                    break;
                }
                if kind == JobKind::Close {
                    close_sent = true;
                    abort_queued(&mut rx, &mut deferred);
                }
            }
            Err(err) => {
                tracing::error!("{} write failed: {}", job.kind, err);
                let reported = WebSocketError::Io(io::Error::new(err.kind(), err.to_string()));
                job.finish(Err(WebSocketError::Io(err)));
                state.report_error(&reported);
                rx.close();
                abort_queued(&mut rx, &mut deferred);
                state.teardown("write failed");
                break;
            }
        }
    }

    rx.close();
    abort_queued(&mut rx, &mut deferred);
    state.teardown("writer stopped");
    let _ = writer.shutdown().await;
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Fail every job that has not been written yet.
fn abort_queued(rx: &mut mpsc::Receiver<WriteJob>, deferred: &mut VecDeque<WriteJob>) {
    let mut aborted = 0usize;
    for job in deferred.drain(..) {
        job.finish(Err(WebSocketError::OperationAborted));
        aborted += 1;
    }
    while let Ok(job) = rx.try_recv() {
        job.finish(Err(WebSocketError::OperationAborted));
        aborted += 1;
    }
    if aborted > 0 {
        tracing::debug!("aborted {} pending write jobs", aborted);
    }
}

/// Write one job's header and payload using scatter/gather I/O.
async fn write_job<W>(writer: &mut W, job: &WriteJob) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = &job.header[..job.header_len];
    let payload = &job.payload[..];
    let total = job.size();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(header, payload, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        written += n;
    }

    writer.flush().await
}

/// IoSlices covering whatever is left after `skip` bytes were written.
fn remaining_slices<'a>(header: &'a [u8], payload: &'a [u8], skip: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);
    if skip < header.len() {
        slices.push(IoSlice::new(&header[skip..]));
    }
    let payload_skip = skip.saturating_sub(header.len());
    if payload_skip < payload.len() {
        slices.push(IoSlice::new(&payload[payload_skip..]));
    }
    slices
}
