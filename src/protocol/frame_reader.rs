//! Streaming frame header parser.
//!
//! Implements a state machine where each state consumes one exact-length
//! read from the stream:
//! - `Header`: FIN, RSV and opcode (1 byte)
//! - `FirstLength`: mask bit and 7-bit length (1 byte)
//! - `ExtendedLength`: 16 or 64-bit big-endian length (2 or 8 bytes)
//! - `MaskKey`: masking key (4 bytes)
//!
//! Payload bytes are not read here. The connection pulls them in chunks
//! once the header is known.

use std::io;

use tokio::io::AsyncRead;

use super::wire_format::{
    bits, CloseCode, FrameHeader, Opcode, LENGTH_16_MARKER, LENGTH_64_MARKER,
    MAX_CONTROL_PAYLOAD,
};
use crate::config::Role;
use crate::error::{Result, WebSocketError};
use crate::transport::BufferedReader;

/// State machine for header parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the first header byte.
    Header,
    /// First byte parsed, waiting for mask bit and length.
    FirstLength { fin: bool, opcode: Opcode },
    /// Waiting for a 2 or 8 byte extended length.
    ExtendedLength {
        fin: bool,
        opcode: Opcode,
        masked: bool,
        width: usize,
    },
    /// Length known, waiting for the masking key.
    MaskKey {
        fin: bool,
        opcode: Opcode,
        payload_len: u64,
    },
    /// Header complete.
    Done(FrameHeader),
}

/// Header parser bound to one connection's role and size limit.
#[derive(Debug)]
pub struct FrameReader {
    role: Role,
    max_frame_size: u64,
    state: State,
}

impl FrameReader {
    pub fn new(role: Role, max_frame_size: u64) -> Self {
        Self {
            role,
            max_frame_size,
            state: State::Header,
        }
    }

    /// Read and validate the next frame header.
    ///
    /// Returns:
    /// - `Ok(Some(header))` once a complete header was read
    /// - `Ok(None)` if the stream ended cleanly between frames
    /// - `Err(...)` on a protocol violation or a stream cut mid-header
    pub async fn read_header<R>(
        &mut self,
        reader: &mut BufferedReader<R>,
    ) -> Result<Option<FrameHeader>>
    where
        R: AsyncRead + Unpin,
    {
        self.state = State::Header;
        loop {
            self.state = match self.state {
                State::Header => {
                    let Some([byte]) = reader.read_array::<1>().await? else {
                        return Ok(None);
                    };
                    self.parse_first_byte(byte)?
                }
                State::FirstLength { fin, opcode } => {
                    let [byte] = required(reader.read_array::<1>().await?)?;
                    self.parse_length_byte(fin, opcode, byte)?
                }
                State::ExtendedLength {
                    fin,
                    opcode,
                    masked,
                    width,
                } => {
                    let payload_len = if width == 2 {
                        let ext = required(reader.read_array::<2>().await?)?;
                        u16::from_be_bytes(ext) as u64
                    } else {
                        let ext = required(reader.read_array::<8>().await?)?;
                        u64::from_be_bytes(ext)
                    };
                    if payload_len & (1 << 63) != 0 {
                        return Err(WebSocketError::protocol(
                            CloseCode::PROTOCOL_ERROR,
                            "payload length has most significant bit set",
                        ));
                    }
                    self.after_length(fin, opcode, masked, payload_len)
                }
                State::MaskKey {
                    fin,
                    opcode,
                    payload_len,
                } => {
                    let key = required(reader.read_array::<4>().await?)?;
                    State::Done(FrameHeader::new(fin, opcode, payload_len, Some(key)))
                }
                State::Done(header) => {
                    self.state = State::Header;
                    self.validate(&header)?;
                    tracing::trace!(
                        "frame header: opcode={} fin={} len={} masked={}",
                        header.opcode,
                        header.fin,
                        header.payload_len,
                        header.mask.is_some()
                    );
                    return Ok(Some(header));
                }
            };
        }
    }

    fn parse_first_byte(&self, byte: u8) -> Result<State> {
        if byte & bits::RSV_MASK != 0 {
            return Err(WebSocketError::protocol(
                CloseCode::PROTOCOL_ERROR,
                "reserved bits set",
            ));
        }
        let opcode = Opcode::from_u8(byte & bits::OPCODE_MASK).ok_or(WebSocketError::protocol(
            CloseCode::PROTOCOL_ERROR,
            "reserved opcode",
        ))?;
        Ok(State::FirstLength {
            fin: byte & bits::FIN != 0,
            opcode,
        })
    }

    fn parse_length_byte(&self, fin: bool, opcode: Opcode, byte: u8) -> Result<State> {
        let masked = byte & bits::MASK != 0;
        if masked != self.role.expects_masked() {
            let reason = if masked {
                "masked frame from server"
            } else {
                "unmasked frame from client"
            };
            return Err(WebSocketError::protocol(CloseCode::PROTOCOL_ERROR, reason));
        }

        Ok(match byte & bits::LENGTH_MASK {
            LENGTH_16_MARKER => State::ExtendedLength {
                fin,
                opcode,
                masked,
                width: 2,
            },
            LENGTH_64_MARKER => State::ExtendedLength {
                fin,
                opcode,
                masked,
                width: 8,
            },
            len => self.after_length(fin, opcode, masked, len as u64),
        })
    }

    fn after_length(&self, fin: bool, opcode: Opcode, masked: bool, payload_len: u64) -> State {
        if masked {
            State::MaskKey {
                fin,
                opcode,
                payload_len,
            }
        } else {
            State::Done(FrameHeader::new(fin, opcode, payload_len, None))
        }
    }

    fn validate(&self, header: &FrameHeader) -> Result<()> {
        if header.opcode.is_control() {
            if !header.fin {
                return Err(WebSocketError::protocol(
                    CloseCode::PROTOCOL_ERROR,
                    "fragmented control frame",
                ));
            }
            if header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WebSocketError::protocol(
                    CloseCode::PROTOCOL_ERROR,
                    "control frame payload too long",
                ));
            }
        } else if header.payload_len > self.max_frame_size {
            return Err(WebSocketError::protocol(
                CloseCode::MESSAGE_TOO_BIG,
                "frame exceeds maximum size",
            ));
        }
        Ok(())
    }
}

/// Past the first byte of a header, EOF cuts the frame short.
fn required<T>(part: Option<T>) -> Result<T> {
    part.ok_or_else(|| {
        WebSocketError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended inside a frame header",
        ))
    })
}
