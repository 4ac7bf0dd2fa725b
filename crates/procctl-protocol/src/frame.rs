//! Response framing.
//!
//! The server answers with one of two shapes, chosen by the command:
//!
//! ```text
//! payload frame:  [u32 big-endian length][length bytes]
//! status line:    UTF-8 text terminated by '\n'
//! ```
//!
//! A payload frame with length zero marks a failed `update`; it is followed
//! by a status line carrying the error. An encoded snapshot is never empty,
//! so the marker cannot be confused with data.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, or direct indexing. Length conversions that
//! could overflow are checked and reported as `FrameError::TooLarge`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length value that marks a failed update.
pub const FAILURE_MARKER: u32 = 0;

/// Prefix of every error status line.
pub const ERROR_PREFIX: &str = "Error: ";

/// Read chunk size when receiving payloads.
const READ_CHUNK: usize = 64 * 1024;

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Connection closed")]
    Closed,

    #[error("Truncated transfer: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Line is not valid UTF-8")]
    NotUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats an error status line body.
pub fn error_status(message: impl std::fmt::Display) -> String {
    format!("{ERROR_PREFIX}{message}")
}

/// Returns true if a status line reports an error.
pub fn is_error_status(line: &str) -> bool {
    line.starts_with(ERROR_PREFIX)
}

// ============================================================================
// Writing
// ============================================================================

/// Writes one length-prefixed payload frame and flushes.
pub async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Writes a failure marker frame followed by an error status line.
pub async fn write_failure<W>(writer: &mut W, message: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u32(FAILURE_MARKER).await?;
    write_status(writer, message).await
}

/// Writes one status line and flushes.
///
/// Embedded line breaks are replaced so the reply stays a single line.
pub async fn write_status<W>(writer: &mut W, line: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let line = line.replace(['\r', '\n'], " ");
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Reading
// ============================================================================

/// Reads one `\n`-terminated line of at most `max` bytes.
///
/// Returns `Ok(None)` on a clean EOF before any byte. A final line without a
/// terminator is accepted. The terminator (and a preceding `\r`) is removed.
pub async fn read_line<R>(reader: &mut R, max: usize) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if read == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\n") && buf.len() > max {
        return Err(FrameError::TooLarge {
            size: buf.len(),
            max,
        });
    }

    let line = String::from_utf8(buf).map_err(|_| FrameError::NotUtf8)?;
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads a status line, treating EOF as a closed connection.
pub async fn read_status<R>(reader: &mut R, max: usize) -> Result<String, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    read_line(reader, max).await?.ok_or(FrameError::Closed)
}

/// Reads a length prefix.
pub async fn read_length<R>(reader: &mut R) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_u32().await {
        Ok(len) => Ok(len),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Closed),
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Reads exactly `len` payload bytes.
///
/// Keeps reading until the declared length has arrived; if the peer closes
/// first the result is `FrameError::Truncated` with the byte counts.
pub async fn read_payload<R>(reader: &mut R, len: u32, max: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let expected = usize::try_from(len).map_err(|_| FrameError::TooLarge {
        size: usize::MAX,
        max,
    })?;
    if expected > max {
        return Err(FrameError::TooLarge {
            size: expected,
            max,
        });
    }

    let mut payload = Vec::with_capacity(expected);
    let mut chunk = vec![0u8; READ_CHUNK.min(expected.max(1))];

    while payload.len() < expected {
        let want = (expected - payload.len()).min(chunk.len());
        let Some(buf) = chunk.get_mut(..want) else {
            return Err(FrameError::Truncated {
                expected,
                received: payload.len(),
            });
        };
        let n = reader.read(buf).await?;
        if n == 0 {
            return Err(FrameError::Truncated {
                expected,
                received: payload.len(),
            });
        }
        payload.extend_from_slice(buf.get(..n).unwrap_or_default());
    }

    Ok(payload)
}
