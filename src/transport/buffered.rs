//! Buffered read side of the connection.
//!
//! The frame parser only ever asks for an exact number of bytes. EOF is
//! reported differently depending on where it lands:
//! - before the first byte of a read: `Ok(None)`, the peer closed cleanly
//! - after some bytes were read: `UnexpectedEof`, the peer cut a frame short
//!
//! # Example
//!
//! ```ignore
//! use ws_engine::transport::BufferedReader;
//!
//! let mut reader = BufferedReader::new(stream);
//! let header: Option<[u8; 2]> = reader.read_array().await?;
//! ```

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Default capacity of the internal read buffer (64KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Exact-length reader over any `AsyncRead`.
pub struct BufferedReader<R> {
    inner: BufReader<R>,
    #[cfg(test)]
    capacity: usize,
}

impl<R: AsyncRead + Unpin> BufferedReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(DEFAULT_READ_BUFFER_SIZE, reader)
    }

    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity, reader),
            #[cfg(test)]
            capacity,
        }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read exactly `N` bytes into a fixed array.
    pub async fn read_array<const N: usize>(&mut self) -> io::Result<Option<[u8; N]>> {
        let mut buf = [0u8; N];
        if self.fill(&mut buf).await? {
            Ok(Some(buf))
        } else {
            Ok(None)
        }
    }

    /// Read exactly `n` bytes into a freshly allocated buffer.
    pub async fn read_exactly(&mut self, n: usize) -> io::Result<Option<BytesMut>> {
        let mut buf = BytesMut::zeroed(n);
        if self.fill(&mut buf).await? {
            Ok(Some(buf))
        } else {
            Ok(None)
        }
    }

    /// Fill `buf` completely. Returns false on EOF before the first byte.
    async fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame",
                ));
            }
            filled += n;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_exactly_across_writes() {
        let (mut tx, rx) = duplex(64);
        let mut reader = BufferedReader::new(rx);

        tokio::spawn(async move {
            tx.write_all(b"he").await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(b"llo!").await.unwrap();
        });

        let buf = reader.read_exactly(5).await.unwrap().unwrap();
        assert_eq!(&buf[..], b"hello");
        let rest: [u8; 1] = reader.read_array().await.unwrap().unwrap();
        assert_eq!(rest, *b"!");
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let (tx, rx) = duplex(64);
        drop(tx);
        let mut reader = BufferedReader::new(rx);
        assert!(reader.read_array::<2>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_read() {
        let (mut tx, rx) = duplex(64);
        tx.write_all(&[1, 2]).await.unwrap();
        drop(tx);

        let mut reader = BufferedReader::new(rx);
        let err = reader.read_exactly(4).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_zero_length_read() {
        let (_tx, rx) = duplex(64);
        let mut reader = BufferedReader::new(rx);
        let buf = reader.read_exactly(0).await.unwrap().unwrap();
        assert!(buf.is_empty());
    }
}
