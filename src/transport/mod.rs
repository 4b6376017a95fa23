//! Transport module - the byte stream under the frame engine.
//!
//! The engine splits a connected stream into a read half, driven by the
//! frame parser through [`BufferedReader`], and a write half owned by the
//! writer task.

mod buffered;

use tokio::io::AsyncRead;

pub use buffered::{BufferedReader, DEFAULT_READ_BUFFER_SIZE};

/// Type-erased read half.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
