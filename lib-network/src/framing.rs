//! Length-prefixed message framing for mesh transports.
//!
//! Format: `[u32 BE length][payload bytes]`. A frame above 1 MiB is a
//! protocol error; callers must close the connection.

use anyhow::{anyhow, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum allowed frame size (1 MiB). Prevents memory exhaustion from a
/// hostile length prefix; the check runs before any allocation.
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Send a length-prefixed frame over an async stream.
pub async fn send_framed<S>(stream: &mut S, data: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_BYTES {
        return Err(anyhow!("frame too large: {} > {}", data.len(), MAX_FRAME_BYTES));
    }
    stream.write_u32(data.len() as u32).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Receive a length-prefixed frame from an async stream.
pub async fn recv_framed<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(anyhow!("frame too large: {} > {}", len, MAX_FRAME_BYTES));
    }
    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await?;
    Ok(buffer)
}
