//! In-process transport backed by tokio channels
//!
//! Each side of a pair reads what the other side writes. Used by tests and
//! by a relay that runs source and sink in one process.

use crate::transport::{AsyncReader, AsyncWriter};
use async_trait::async_trait;
use dcamera_core::{DCameraError, Result};
use tokio::sync::mpsc;

/// Receiving half of an in-memory link
pub struct MemoryReader(mpsc::Receiver<Vec<u8>>);

#[async_trait]
impl AsyncReader for MemoryReader {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        self.0
            .recv()
            .await
            .ok_or_else(|| DCameraError::Transport("memory peer closed".into()))
    }
}

/// Sending half of an in-memory link
pub struct MemoryWriter(mpsc::Sender<Vec<u8>>);

#[async_trait]
impl AsyncWriter for MemoryWriter {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        self.0
            .send(data.to_vec())
            .await
            .map_err(|_| DCameraError::Transport("memory peer closed".into()))
    }

    fn is_atomic(&self) -> bool {
        true
    }
}

/// One endpoint of a memory link
pub type MemoryEndpoint = (MemoryReader, MemoryWriter);

/// Create two connected endpoints, each buffering up to `capacity` packets
pub fn memory_pair(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        (MemoryReader(b_rx), MemoryWriter(a_tx)),
        (MemoryReader(a_rx), MemoryWriter(b_tx)),
    )
}
