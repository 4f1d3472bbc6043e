//! Length-prefixed frame codec
//!
//! Frame layout: `u32` big-endian payload length followed by that many bytes
//! of UTF-8 text. Works over any tokio `AsyncRead`/`AsyncWrite`.

use crate::protocol::ProtocolError;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single payload
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Fill `buf` completely. `Ok(false)` means the stream ended before the
/// first byte; ending part way through is an error.
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]).await {
            Ok(0) if offset == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes", offset, buf.len()),
                ))
            }
            Ok(n) => offset += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Read one frame. `Ok(None)` on clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    if !read_exact_or_eof(reader, &mut header).await? {
        return Ok(None);
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload).await? && len > 0 {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended after frame header",
        )));
    }

    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        });
    }

    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}
