//! Unix socket transport implementation for camera sessions
//!
//! Used when both ends run on the same host, e.g. a local relay.

use crate::transport::{AsyncReader, AsyncWriter, read_prefixed, write_prefixed};
use async_trait::async_trait;
use dcamera_core::{DCameraError, Result};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// Unix socket read wrapper
pub struct UnixReadWrapper(pub OwnedReadHalf);

#[async_trait]
impl AsyncReader for UnixReadWrapper {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        read_prefixed(&mut self.0, "Unix").await
    }
}

/// Unix socket write wrapper
pub struct UnixWriteWrapper(pub OwnedWriteHalf);

#[async_trait]
impl AsyncWriter for UnixWriteWrapper {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        write_prefixed(&mut self.0, data, "Unix").await
    }
}

/// Split a connected socket into session halves
pub fn split(stream: UnixStream) -> (UnixReadWrapper, UnixWriteWrapper) {
    let (read_half, write_half) = stream.into_split();
    (UnixReadWrapper(read_half), UnixWriteWrapper(write_half))
}

/// Connect to a socket path
pub async fn connect(path: &str) -> Result<(UnixReadWrapper, UnixWriteWrapper)> {
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| DCameraError::Transport(format!("Failed to connect to {}: {}", path, e)))?;
    Ok(split(stream))
}
