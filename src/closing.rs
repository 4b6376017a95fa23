//! Close handshake timer.
//!
//! When this end sends the first close frame, a timer is armed that races
//! the peer's close reply:
//! - reply first: the reader tears the connection down, which cancels the timer
//! - timer first: the timer tears the connection down, whatever I/O is still
//!   in flight
//!
//! The same timer bounds the wait for a close reply or error close that
//! we send, so a peer that stops reading cannot keep the connection alive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{Result, WebSocketError};
use crate::state::{lock, ConnectionState};

/// At most one armed timer per connection.
#[derive(Debug, Default)]
pub(crate) struct CloseTimer {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CloseTimer {
    /// Abort the timer task. Returns true if one was armed.
    pub(crate) fn cancel(&self) -> bool {
        let task = lock(&self.task).take();
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        lock(&self.task).is_some()
    }

    fn replace(&self, task: JoinHandle<()>) {
        if let Some(previous) = lock(&self.task).replace(task) {
            previous.abort();
        }
    }
}

/// Arm the connection's close timer.
///
/// Fails with [`WebSocketError::Timer`] when called outside a tokio runtime.
pub(crate) fn arm_close_timer(state: &Arc<ConnectionState>, timeout: Duration) -> Result<()> {
    let runtime = Handle::try_current()
        .map_err(|_| WebSocketError::Timer("no tokio runtime to run the close timer"))?;

    let weak = Arc::downgrade(state);
    let task = runtime.spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(state) = weak.upgrade() {
            tracing::warn!("close handshake timed out after {:?}", timeout);
            state.teardown("close handshake timed out");
        }
    });
    state.close_timer.replace(task);

    if state.is_closed() {
        state.close_timer.cancel();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::handler::Callbacks;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state_with_hook() -> (Arc<ConnectionState>, Arc<AtomicUsize>) {
        let hooks = Arc::new(AtomicUsize::new(0));
        let mut callbacks = Callbacks::new();
        let h = hooks.clone();
        callbacks.set_close_hook(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(ConnectionState::new(Role::Server, callbacks)), hooks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_teardown() {
        let (state, hooks) = state_with_hook();
        arm_close_timer(&state, Duration::from_millis(100)).unwrap();
        assert!(state.close_timer.is_armed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(state.is_closed());
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_timer() {
        let (state, hooks) = state_with_hook();
        arm_close_timer(&state, Duration::from_millis(100)).unwrap();

        state.teardown("reply received");
        assert!(!state.close_timer.is_armed());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_arm_without_runtime_fails() {
        let (state, _) = state_with_hook();
        let result = arm_close_timer(&state, Duration::from_millis(10));
        assert!(matches!(result, Err(WebSocketError::Timer(_))));
        assert!(!state.close_timer.is_armed());
    }

    #[test]
    fn test_cancel_unarmed() {
        let timer = CloseTimer::default();
        assert!(!timer.cancel());
    }
}
