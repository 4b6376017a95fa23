//! Per-kind write job slots.
//!
//! At most one write job of each kind may be outstanding on a connection: a
//! second ping submitted while the first is still queued or writing is
//! rejected. A slot is claimed when the job is submitted and released by
//! the [`SlotGuard`] that travels with the job, right before the job's
//! completion is signaled.
//!
//! # Usage
//!
//! [`JobSlots`] is shared between every [`WriterHandle`](crate::writer::WriterHandle)
//! clone of one connection. Slots are lock-free flags.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, WebSocketError};

/// Kind of a write job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Header plus first bytes of a data frame.
    MessageFirstChunk,
    /// More payload bytes of the frame started by the first chunk.
    ContinuationChunk,
    Ping,
    Pong,
    Close,
}

impl JobKind {
    const COUNT: usize = 5;

    #[inline]
    fn index(self) -> usize {
        match self {
            JobKind::MessageFirstChunk => 0,
            JobKind::ContinuationChunk => 1,
            JobKind::Ping => 2,
            JobKind::Pong => 3,
            JobKind::Close => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::MessageFirstChunk => "message",
            JobKind::ContinuationChunk => "continuation",
            JobKind::Ping => "ping",
            JobKind::Pong => "pong",
            JobKind::Close => "close",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot table shared by all handles of one connection.
#[derive(Debug, Clone, Default)]
pub struct JobSlots {
    busy: Arc<[AtomicBool; JobKind::COUNT]>,
}

impl JobSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `kind`.
    ///
    /// Returns `Err(OperationNotPermitted)` if a job of that kind is still
    /// outstanding.
    pub fn try_acquire(&self, kind: JobKind) -> Result<SlotGuard> {
        self.busy[kind.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WebSocketError::OperationNotPermitted("a write of this kind is pending"))?;
        Ok(SlotGuard {
            slots: self.clone(),
            kind,
            released: false,
        })
    }

    #[inline]
    pub fn is_busy(&self, kind: JobKind) -> bool {
        self.busy[kind.index()].load(Ordering::Acquire)
    }

    fn release(&self, kind: JobKind) {
        self.busy[kind.index()].store(false, Ordering::Release);
    }
}

/// Guard that releases a job slot on drop.
pub struct SlotGuard {
    slots: JobSlots,
    kind: JobKind,
    released: bool,
}

impl SlotGuard {
    #[inline]
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Manually release the slot.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.slots.release(self.kind);
            self.released = true;
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotGuard")
            .field("kind", &self.kind)
            .field("released", &self.released)
            .finish()
    }
}
