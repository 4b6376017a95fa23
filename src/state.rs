//! State shared by the reader, the writer task and the close timer.
//!
//! Teardown and error reporting are both at-most-once, guarded by atomic
//! flags, so any of the three parties may trigger them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::closing::CloseTimer;
use crate::config::Role;
use crate::error::WebSocketError;
use crate::handler::Callbacks;

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    role: Role,
    callbacks: Callbacks,
    closed: AtomicBool,
    self_close_pending: AtomicBool,
    error_reported: AtomicBool,
    shutdown: watch::Sender<bool>,
    pub(crate) close_timer: CloseTimer,
}

impl ConnectionState {
    pub(crate) fn new(role: Role, callbacks: Callbacks) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            role,
            callbacks,
            closed: AtomicBool::new(false),
            self_close_pending: AtomicBool::new(false),
            error_reported: AtomicBool::new(false),
            shutdown,
            close_timer: CloseTimer::default(),
        }
    }

    #[inline]
    pub(crate) fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Receiver that observes `true` once teardown has started.
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    #[inline]
    pub(crate) fn is_self_close_pending(&self) -> bool {
        self.self_close_pending.load(Ordering::Acquire)
    }

    /// Record that we sent the first close frame. Returns false if one was
    /// already sent.
    pub(crate) fn begin_self_close(&self) -> bool {
        !self.self_close_pending.swap(true, Ordering::AcqRel)
    }

    /// Deliver `err` to `on_error` unless an error was already reported.
    pub(crate) fn report_error(&self, err: &WebSocketError) {
        if self.error_reported.swap(true, Ordering::AcqRel) {
            tracing::debug!("suppressing further error: {}", err);
            return;
        }
        self.callbacks.error(err);
    }

    #[cfg(test)]
    pub(crate) fn error_reported(&self) -> bool {
        self.error_reported.load(Ordering::Acquire)
    }

    /// Tear the connection down. Only the first call has any effect.
    ///
    /// Cancels the close timer, wakes the reader and the writer task, and
    /// runs the close hook.
    pub(crate) fn teardown(&self, cause: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!("tearing down {:?} connection: {}", self.role, cause);
        self.close_timer.cancel();
        self.shutdown.send_replace(true);
        self.callbacks.run_close_hook();
        true
    }
}
