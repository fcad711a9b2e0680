//! TCP transport implementation for camera sessions
//!
//! Used when the peer device is reachable over an IP network.

use crate::transport::{AsyncReader, AsyncWriter, read_prefixed, write_prefixed};
use async_trait::async_trait;
use dcamera_core::{DCameraError, Result};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// TCP read wrapper
pub struct TcpReadWrapper(pub OwnedReadHalf);

#[async_trait]
impl AsyncReader for TcpReadWrapper {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        read_prefixed(&mut self.0, "TCP").await
    }
}

/// TCP write wrapper
pub struct TcpWriteWrapper(pub OwnedWriteHalf);

#[async_trait]
impl AsyncWriter for TcpWriteWrapper {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        write_prefixed(&mut self.0, data, "TCP").await
    }
}

/// Split a connected stream into session halves
pub fn split(stream: TcpStream) -> Result<(TcpReadWrapper, TcpWriteWrapper)> {
    // Disable Nagle's algorithm for low latency
    stream
        .set_nodelay(true)
        .map_err(|e| DCameraError::Transport(format!("Failed to set TCP_NODELAY: {}", e)))?;
    let (read_half, write_half) = stream.into_split();
    Ok((TcpReadWrapper(read_half), TcpWriteWrapper(write_half)))
}

/// Connect to a listening peer
pub async fn connect(addr: &str) -> Result<(TcpReadWrapper, TcpWriteWrapper)> {
    info!("Connecting session to {}", addr);
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| DCameraError::Transport(format!("Failed to connect to {}: {}", addr, e)))?;
    split(stream)
}

/// Accept one peer on a bound listener
pub async fn accept(listener: &TcpListener) -> Result<(TcpReadWrapper, TcpWriteWrapper)> {
    let (stream, peer) = listener
        .accept()
        .await
        .map_err(|e| DCameraError::Transport(format!("Accept failed: {}", e)))?;
    info!("Session peer connected from {}", peer);
    split(stream)
}
