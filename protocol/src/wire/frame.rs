//! Length-prefixed framing.
//!
//! ```text
//! +------------------+---------------------------+
//! | Length (4B BE)   | Body (UTF-8 JSON, Length) |
//! +------------------+---------------------------+
//! ```
//!
//! Decoding is all-or-nothing. A caller either gets a whole, parsed message
//! or a [`FramingError`]; a half-read body is never surfaced. The length is
//! checked against the configured maximum before a single body byte is
//! allocated.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::config::{FRAME_HEADER_LEN, MAX_FRAME_BYTES};

/// Everything that can go wrong turning bytes into a message or back.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame of {size} bytes exceeds limit of {max}")]
    Oversized { size: usize, max: usize },

    #[error("zero-length frame")]
    Empty,

    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("connection closed before a complete frame arrived")]
    ConnectionClosed,

    #[error("timed out during {operation} after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("frame body is not valid JSON for this message: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

fn timeout_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Frame codec with a size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl FrameCodec {
    /// `max_frame_bytes` is clamped to what a `u32` header can express.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes: max_frame_bytes.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn check_len(&self, len: usize) -> Result<(), FramingError> {
        if len == 0 {
            return Err(FramingError::Empty);
        }
        if len > self.max_frame_bytes {
            return Err(FramingError::Oversized {
                size: len,
                max: self.max_frame_bytes,
            });
        }
        Ok(())
    }

    /// Serialize `message` into one complete frame.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, FramingError> {
        let body = serde_json::to_vec(message)?;
        self.check_len(body.len())?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one complete frame held in memory.
    ///
    /// The buffer must contain exactly one frame: trailing bytes are as
    /// wrong as missing ones.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, FramingError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FramingError::Truncated {
                expected: FRAME_HEADER_LEN,
                got: bytes.len(),
            });
        }
        let (header, body) = bytes.split_at(FRAME_HEADER_LEN);
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        self.check_len(len)?;
        if body.len() != len {
            return Err(FramingError::Truncated {
                expected: len,
                got: body.len(),
            });
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Read exactly one frame from a stream, each read bounded by `io_timeout`.
    pub async fn read_frame<T, R>(&self, reader: &mut R, io_timeout: Duration) -> Result<T, FramingError>
    where
        T: DeserializeOwned,
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; FRAME_HEADER_LEN];
        read_exact_timed(reader, &mut header, io_timeout, "read length").await?;

        let len = u32::from_be_bytes(header) as usize;
        self.check_len(len)?;

        let mut body = vec![0u8; len];
        read_exact_timed(reader, &mut body, io_timeout, "read body").await?;

        Ok(serde_json::from_slice(&body)?)
    }

    /// Write one frame and flush, each step bounded by `io_timeout`.
    pub async fn write_frame<T, W>(
        &self,
        writer: &mut W,
        message: &T,
        io_timeout: Duration,
    ) -> Result<(), FramingError>
    where
        T: Serialize,
        W: AsyncWrite + Unpin,
    {
        let frame = self.encode(message)?;
        timeout(io_timeout, writer.write_all(&frame))
            .await
            .map_err(|_| FramingError::Timeout {
                operation: "write frame",
                timeout_ms: timeout_ms(io_timeout),
            })??;
        timeout(io_timeout, writer.flush())
            .await
            .map_err(|_| FramingError::Timeout {
                operation: "flush",
                timeout_ms: timeout_ms(io_timeout),
            })??;
        Ok(())
    }
}

/// `read_exact` that reports how much arrived when the peer hangs up early.
async fn read_exact_timed<R>(
    reader: &mut R,
    buf: &mut [u8],
    io_timeout: Duration,
    operation: &'static str,
) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
{
    let fill = async {
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Ok::<usize, std::io::Error>(filled);
            }
            filled += n;
        }
        Ok(filled)
    };

    let filled = timeout(io_timeout, fill)
        .await
        .map_err(|_| FramingError::Timeout {
            operation,
            timeout_ms: timeout_ms(io_timeout),
        })??;

    match filled {
        n if n == buf.len() => Ok(()),
        0 if operation == "read length" => Err(FramingError::ConnectionClosed),
        got => Err(FramingError::Truncated {
            expected: buf.len(),
            got,
        }),
    }
}
