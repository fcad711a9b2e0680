//! Transport abstractions for camera sessions
//!
//! A transport moves whole packets between two devices. Socket transports
//! delimit packets with a 4-byte little-endian length prefix; what the packet
//! contains (fragment header or raw stream frame) is the session's business.

use crate::frame::{HEADER_LEN, MAX_TOTAL_LEN};
use async_trait::async_trait;
use dcamera_core::{DCameraError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest packet a socket transport accepts
pub const MAX_WIRE_PACKET: usize = HEADER_LEN + MAX_TOTAL_LEN;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read one complete packet
    async fn read_message(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send + Sync {
    /// Write one complete packet
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;

    /// Whether a failed write leaves nothing on the wire
    ///
    /// Byte-stream transports may fail halfway through a length-prefixed
    /// packet, after which the peer can no longer find packet boundaries.
    fn is_atomic(&self) -> bool {
        false
    }
}

/// Read a length-prefixed packet from a byte stream
pub async fn read_prefixed<R: AsyncRead + Unpin + Send>(reader: &mut R, label: &str) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| DCameraError::Transport(format!("{} read length failed: {}", label, e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_WIRE_PACKET {
        return Err(DCameraError::Protocol(format!(
            "{} packet too large: {} bytes",
            label, len
        )));
    }

    let mut data = vec![0u8; len];
    reader
        .read_exact(&mut data)
        .await
        .map_err(|e| DCameraError::Transport(format!("{} read data failed: {}", label, e)))?;

    Ok(data)
}

/// Write a length-prefixed packet to a byte stream and flush it
pub async fn write_prefixed<W: AsyncWrite + Unpin + Send>(
    writer: &mut W,
    data: &[u8],
    label: &str,
) -> Result<()> {
    if data.len() > MAX_WIRE_PACKET {
        return Err(DCameraError::InvalidArgument(format!(
            "{} packet too large: {} bytes",
            label,
            data.len()
        )));
    }

    let len = (data.len() as u32).to_le_bytes();
    writer
        .write_all(&len)
        .await
        .map_err(|e| DCameraError::Transport(format!("{} write length failed: {}", label, e)))?;

    writer
        .write_all(data)
        .await
        .map_err(|e| DCameraError::Transport(format!("{} write data failed: {}", label, e)))?;

    writer
        .flush()
        .await
        .map_err(|e| DCameraError::Transport(format!("{} flush failed: {}", label, e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefixed_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_prefixed(&mut a, b"frame", "test").await.unwrap();
        let data = read_prefixed(&mut b, "test").await.unwrap();
        assert_eq!(data, b"frame");
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(u32::MAX).to_le_bytes()).await.unwrap();
        let err = read_prefixed(&mut b, "test").await.unwrap_err();
        assert!(matches!(err, DCameraError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_closed_stream_is_transport_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_prefixed(&mut b, "test").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
