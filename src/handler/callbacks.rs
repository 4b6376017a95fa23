//! Connection callbacks.
//!
//! Each callback is optional. `on_connect` runs when the connection starts,
//! `on_control` for every control frame, `on_error` at most once. The close
//! hook runs exactly once, at teardown.

use std::sync::Mutex;

use crate::control::ControlFrame;
use crate::error::WebSocketError;
use crate::state::lock;
use crate::writer::WriterHandle;

/// Called once the connection is running, with a handle for writing.
pub type ConnectHandler = Box<dyn Fn(&WriterHandle) + Send + Sync + 'static>;

/// Called for every ping and pong received, and for a close the peer starts.
pub type ControlHandler = Box<dyn Fn(&ControlFrame) + Send + Sync + 'static>;

/// Called once, for the first fatal error on the connection.
pub type ErrorHandler = Box<dyn Fn(&WebSocketError) + Send + Sync + 'static>;

/// Called once when the connection is torn down, whatever the cause.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// The set of callbacks registered on a connection.
#[derive(Default)]
pub struct Callbacks {
    on_connect: Option<ConnectHandler>,
    on_control: Option<ControlHandler>,
    on_error: Option<ErrorHandler>,
    close_hook: Mutex<Option<CloseHook>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_connect<F>(&mut self, handler: F)
    where
        F: Fn(&WriterHandle) + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(handler));
    }

    pub fn set_on_control<F>(&mut self, handler: F)
    where
        F: Fn(&ControlFrame) + Send + Sync + 'static,
    {
        self.on_control = Some(Box::new(handler));
    }

    pub fn set_on_error<F>(&mut self, handler: F)
    where
        F: Fn(&WebSocketError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(handler));
    }

    pub fn set_close_hook<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *lock(&self.close_hook) = Some(Box::new(hook));
    }

    pub(crate) fn connected(&self, writer: &WriterHandle) {
        if let Some(handler) = &self.on_connect {
            handler(writer);
        }
    }

    pub(crate) fn control(&self, frame: &ControlFrame) {
        if let Some(handler) = &self.on_control {
            handler(frame);
        }
    }

    pub(crate) fn error(&self, err: &WebSocketError) {
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }

    /// Run the close hook if it has not run yet.
    pub(crate) fn run_close_hook(&self) {
        let hook = lock(&self.close_hook).take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_control", &self.on_control.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("close_hook", &lock(&self.close_hook).is_some())
            .finish()
    }
}
