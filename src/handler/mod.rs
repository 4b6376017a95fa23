//! Handler module - user callbacks attached to a connection.
//!
//! Provides [`Callbacks`], filled in through
//! [`ConnectionBuilder`](crate::ConnectionBuilder):
//!
//! ```ignore
//! use ws_engine::ConnectionBuilder;
//!
//! let conn = ConnectionBuilder::server()
//!     .on_control(|frame| tracing::debug!("control: {:?}", frame))
//!     .on_error(|err| tracing::warn!("connection failed: {}", err))
//!     .on_close(|| tracing::debug!("connection gone"))
//!     .start(stream)?;
//! ```

mod callbacks;

pub use callbacks::{Callbacks, CloseHook, ConnectHandler, ControlHandler, ErrorHandler};
