//! Async read/write of multipart frames over a byte stream.
//!
//! Shared by the server's router transport and the requester's dealer
//! transport. Enabled with the `tokio` feature.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HdbusError, Result};
use crate::protocol::frame::{self, FRAME_HEADER_LEN};

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<Bytes>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(HdbusError::Transport(format!("read header failed: {e}"))),
    }

    let len = frame::body_len(&header)?;
    if len > max_frame_bytes {
        return Err(HdbusError::Transport(format!(
            "frame of {len} bytes exceeds limit of {max_frame_bytes}"
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| HdbusError::Transport(format!("read body failed: {e}")))?;

    frame::decode_body(Bytes::from(body)).map(Some)
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, parts: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = frame::encode_frame(parts)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| HdbusError::Transport(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| HdbusError::Transport(format!("flush failed: {e}")))
}
