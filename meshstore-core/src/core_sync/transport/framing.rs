//! Length-prefixed framing for stream sockets
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes.
//! Control frames of the Direct and Relay backends are JSON inside a frame.

use super::{TransportError, TransportResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted from the wire
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Read one frame; `Ok(None)` on a clean EOF before the length prefix
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> TransportResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::Connection(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> TransportResult<()> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(TransportError::Connection(format!(
            "frame of {} bytes exceeds limit of {}",
            data.len(),
            MAX_FRAME_SIZE
        )));
    }

    // Frame the message: 4-byte length prefix + data
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a JSON control frame; EOF is an error here
pub async fn read_json<R, T>(reader: &mut R) -> TransportResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let frame = read_frame(reader)
        .await?
        .ok_or_else(|| TransportError::Connection("connection closed by peer".to_string()))?;
    serde_json::from_slice(&frame)
        .map_err(|e| TransportError::Connection(format!("malformed control frame: {}", e)))
}

pub async fn write_json<W, T>(writer: &mut W, value: &T) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = serde_json::to_vec(value)
        .map_err(|e| TransportError::Connection(format!("unencodable control frame: {}", e)))?;
    write_frame(writer, &data).await
}
