//! In-memory surface queue
//!
//! Stands in for a HAL producer surface: the stream dequeues empty buffers,
//! fills and flushes them, and a consumer takes flushed frames out.

use dcamera_core::{
    BufferFlushConfig, BufferProducer, BufferRequestConfig, DCameraError, NativeBuffer,
    PixelFormat, Result,
};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Default number of buffers a queue hands out at once
pub const DEFAULT_QUEUE_SIZE: u32 = 8;

/// Bytes needed for one frame of the given geometry
pub fn frame_capacity(width: u32, height: u32, format: PixelFormat) -> usize {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Rgba8888 => pixels * 4,
        // JPEG output never exceeds the raw YUV size at these resolutions
        PixelFormat::Ycbcr420_888
        | PixelFormat::Ycrcb420Sp
        | PixelFormat::Ycbcr420Sp
        | PixelFormat::Jpeg => pixels * 3 / 2,
    }
}

/// A frame the consumer took from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedFrame {
    pub seq: u32,
    pub data: Vec<u8>,
    pub timestamp: i64,
}

#[derive(Default)]
struct QueueState {
    queue_size: u32,
    next_seq: u32,
    dequeued: u32,
    free: VecDeque<NativeBuffer>,
    flushed: VecDeque<(NativeBuffer, BufferFlushConfig)>,
    cancelled: u64,
}

/// Surface queue backed by heap buffers
pub struct MemoryBufferQueue {
    state: Mutex<QueueState>,
    flushed: Notify,
}

impl Default for MemoryBufferQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl MemoryBufferQueue {
    pub fn new(queue_size: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue_size,
                ..QueueState::default()
            }),
            flushed: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the oldest flushed frame, recycling its buffer
    pub fn acquire_flushed(&self) -> Option<ConsumedFrame> {
        let mut state = self.state();
        let (buffer, flush) = state.flushed.pop_front()?;
        let len = flush.size.min(buffer.data.len());
        let frame = ConsumedFrame {
            seq: buffer.seq,
            data: buffer.data[..len].to_vec(),
            timestamp: flush.timestamp,
        };
        state.free.push_back(buffer);
        Some(frame)
    }

    /// Wait until a flushed frame is available and take it
    pub async fn next_flushed(&self) -> ConsumedFrame {
        loop {
            let notified = self.flushed.notified();
            if let Some(frame) = self.acquire_flushed() {
                return frame;
            }
            notified.await;
        }
    }

    pub fn flushed_len(&self) -> usize {
        self.state().flushed.len()
    }

    /// Buffers currently held by the producer
    pub fn dequeued(&self) -> u32 {
        self.state().dequeued
    }

    pub fn cancelled(&self) -> u64 {
        self.state().cancelled
    }

    pub fn queue_size(&self) -> u32 {
        self.state().queue_size
    }
}

impl BufferProducer for MemoryBufferQueue {
    fn request_buffer(&self, config: &BufferRequestConfig) -> Result<NativeBuffer> {
        let mut state = self.state();
        let outstanding = state.dequeued as usize + state.flushed.len();
        if outstanding >= state.queue_size as usize {
            return Err(DCameraError::ResourceExhausted(format!(
                "surface queue exhausted ({} buffers)",
                state.queue_size
            )));
        }

        let capacity = frame_capacity(config.width, config.height, config.format);
        let reusable = state
            .free
            .iter()
            .position(|b| b.data.len() == capacity && b.format == config.format);
        let buffer = match reusable.and_then(|i| state.free.remove(i)) {
            Some(buffer) => buffer,
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                NativeBuffer {
                    seq,
                    width: config.width,
                    height: config.height,
                    stride: config.width,
                    format: config.format,
                    usage: config.usage,
                    phy_addr: 0,
                    fd: -1,
                    data: vec![0; capacity],
                }
            }
        };
        state.dequeued += 1;
        Ok(buffer)
    }

    fn flush_buffer(&self, buffer: NativeBuffer, flush: BufferFlushConfig) -> Result<()> {
        {
            let mut state = self.state();
            if flush.size > buffer.data.len() {
                state.dequeued = state.dequeued.saturating_sub(1);
                state.free.push_back(buffer);
                return Err(DCameraError::InvalidArgument(format!(
                    "flush of {} bytes exceeds buffer capacity",
                    flush.size
                )));
            }
            state.dequeued = state.dequeued.saturating_sub(1);
            state.flushed.push_back((buffer, flush));
        }
        self.flushed.notify_waiters();
        Ok(())
    }

    fn cancel_buffer(&self, buffer: NativeBuffer) -> Result<()> {
        let mut state = self.state();
        state.dequeued = state.dequeued.saturating_sub(1);
        state.cancelled += 1;
        state.free.push_back(buffer);
        Ok(())
    }

    fn set_queue_size(&self, size: u32) -> Result<()> {
        if size == 0 {
            return Err(DCameraError::InvalidArgument("queue size 0".into()));
        }
        self.state().queue_size = size;
        Ok(())
    }
}
