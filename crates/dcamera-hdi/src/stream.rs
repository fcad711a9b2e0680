//! One HAL stream: its surface queue, slot pool and frame accounting

use crate::buffer_pool::{BUFFER_POOL_CAPACITY, BufferPool};
use crate::surface::frame_capacity;
use dcamera_core::{
    BufferFlushConfig, BufferQueueHandle, BufferRequestConfig, DCStreamInfo, DCameraBuffer,
    DCameraError, DHBase, ImageBuffer, Result, StreamAttribute, StreamInfo,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const STRIDE_ALIGNMENT: u32 = 8;
const PRODUCER_USAGE: u64 = 0x3;

struct StreamInner {
    producer: Option<BufferQueueHandle>,
    slots: HashMap<i32, Arc<ImageBuffer>>,
    frame_count: u32,
    frame_number: u64,
    capture_id: i32,
}

/// A configured stream and the buffers circulating through it
pub struct DCameraStream {
    dh_base: DHBase,
    info: DCStreamInfo,
    pool: BufferPool,
    inner: Mutex<StreamInner>,
    in_flight: watch::Sender<usize>,
}

impl std::fmt::Debug for DCameraStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DCameraStream")
            .field("dh_base", &self.dh_base)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl DCameraStream {
    pub fn new(dh_base: DHBase, info: &StreamInfo) -> Result<Self> {
        if info.width == 0 || info.height == 0 {
            return Err(DCameraError::InvalidArgument(format!(
                "stream {} has empty geometry",
                info.stream_id
            )));
        }
        let stream = Self {
            dh_base,
            info: DCStreamInfo::from(info),
            pool: BufferPool::new(BUFFER_POOL_CAPACITY),
            inner: Mutex::new(StreamInner {
                producer: None,
                slots: HashMap::new(),
                frame_count: 0,
                frame_number: 0,
                capture_id: -1,
            }),
            in_flight: watch::channel(0).0,
        };
        if let Some(queue) = &info.buffer_queue {
            stream.set_buffer_queue(queue.clone())?;
        }
        Ok(stream)
    }

    fn inner(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stream_id(&self) -> i32 {
        self.info.stream_id
    }

    pub fn dc_stream_info(&self) -> &DCStreamInfo {
        &self.info
    }

    pub fn has_buffer_queue(&self) -> bool {
        self.inner().producer.is_some()
    }

    /// Frames returned since the current capture started
    pub fn frame_count(&self) -> u32 {
        self.inner().frame_count
    }

    /// Buffers handed out and not yet returned
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Attach the surface queue frames are produced into
    pub fn set_buffer_queue(&self, queue: BufferQueueHandle) -> Result<()> {
        let mut inner = self.inner();
        if inner.producer.is_some() {
            return Err(DCameraError::WrongState(format!(
                "stream {} already has a buffer queue",
                self.info.stream_id
            )));
        }
        queue.set_queue_size(BUFFER_POOL_CAPACITY as u32)?;
        inner.producer = Some(queue);
        info!(stream_id = self.info.stream_id, "Buffer queue attached");
        Ok(())
    }

    /// Detach the surface queue, cancelling any buffers still out
    pub fn release_buffer_queue(&self) -> Result<()> {
        self.cancel_outstanding();
        let mut inner = self.inner();
        if inner.producer.take().is_none() {
            return Err(DCameraError::WrongState(format!(
                "stream {} has no buffer queue",
                self.info.stream_id
            )));
        }
        inner.slots.clear();
        self.pool.clear();
        info!(stream_id = self.info.stream_id, "Buffer queue released");
        Ok(())
    }

    /// Reset per-capture accounting and allow buffers to flow again
    pub fn start_capture(&self, capture_id: i32) {
        let mut inner = self.inner();
        inner.frame_count = 0;
        inner.capture_id = capture_id;
        self.pool.notify_stop(false);
    }

    /// Hand a free buffer to the frame producer
    pub fn get_dcamera_buffer(&self) -> Result<DCameraBuffer> {
        if self.pool.is_stopped() {
            return Err(DCameraError::WrongState(format!(
                "stream {} is stopping",
                self.info.stream_id
            )));
        }
        let mut inner = self.inner();
        let producer = inner.producer.clone().ok_or_else(|| {
            DCameraError::WrongState(format!("stream {} has no buffer queue", self.info.stream_id))
        })?;

        let native = producer.request_buffer(&BufferRequestConfig {
            width: self.info.width,
            height: self.info.height,
            stride_alignment: STRIDE_ALIGNMENT,
            format: self.info.format,
            usage: PRODUCER_USAGE,
            timeout_ms: 0,
        })?;

        let (slot, index) = match self.pool.acquire_buffer() {
            Some(slot) => {
                let index = slot.index();
                (slot, index)
            }
            None => {
                let index = inner.slots.len() as i32;
                let slot = Arc::new(ImageBuffer::new());
                let acquired = self
                    .pool
                    .add_buffer(slot.clone())
                    .map(|_| self.pool.acquire_buffer());
                match acquired {
                    Ok(Some(slot)) => {
                        inner.slots.insert(index, slot.clone());
                        (slot, index)
                    }
                    Ok(None) => {
                        let _ = producer.cancel_buffer(native);
                        return Err(DCameraError::WrongState("new slot vanished".into()));
                    }
                    Err(e) => {
                        let _ = producer.cancel_buffer(native);
                        return Err(e);
                    }
                }
            }
        };

        let size = native.data.len() as u32;
        slot.populate(index, native);
        inner.frame_number += 1;
        slot.set_frame_info(inner.frame_number, now_micros(), inner.capture_id);
        self.in_flight.send_modify(|n| *n += 1);
        debug!(stream_id = self.info.stream_id, index, size, "Buffer handed out");

        Ok(DCameraBuffer {
            index,
            size,
            data: Vec::new(),
        })
    }

    /// Take a filled buffer back and queue it to the consumer
    ///
    /// An empty buffer is cancelled rather than delivered and does not count
    /// as a frame.
    pub fn return_dcamera_buffer(&self, buffer: DCameraBuffer) -> Result<()> {
        let mut inner = self.inner();
        let slot = inner.slots.get(&buffer.index).cloned().ok_or_else(|| {
            DCameraError::InvalidArgument(format!(
                "stream {} has no buffer {}",
                self.info.stream_id, buffer.index
            ))
        })?;
        let producer = inner.producer.clone().ok_or_else(|| {
            DCameraError::WrongState(format!("stream {} has no buffer queue", self.info.stream_id))
        })?;

        let mut native = slot.take_handle().ok_or_else(|| {
            DCameraError::NotFound(format!("buffer {} is not handed out", buffer.index))
        })?;
        if buffer.data.len() > native.data.len() {
            let capacity = native.data.len();
            let _ = producer.cancel_buffer(native);
            self.recycle(&slot);
            return Err(DCameraError::InvalidArgument(format!(
                "frame of {} bytes exceeds buffer of {}",
                buffer.data.len(),
                capacity
            )));
        }

        let timestamp = slot.desc().timestamp;
        let result = if buffer.data.is_empty() {
            producer.cancel_buffer(native)
        } else {
            native.data[..buffer.data.len()].copy_from_slice(&buffer.data);
            let flushed = producer.flush_buffer(
                native,
                BufferFlushConfig {
                    size: buffer.data.len(),
                    timestamp,
                },
            );
            if flushed.is_ok() {
                inner.frame_count += 1;
            }
            flushed
        };
        drop(inner);
        self.recycle(&slot);
        result
    }

    /// Busy → idle, one fewer buffer in flight
    ///
    /// The slot's descriptor is invalidated before it goes back to idle.
    fn recycle(&self, slot: &Arc<ImageBuffer>) {
        if let Err(e) = self.pool.remove_buffer(slot) {
            warn!(stream_id = self.info.stream_id, "Recycling slot failed: {}", e);
            return;
        }
        if slot.free().is_some() {
            debug!(
                stream_id = self.info.stream_id,
                index = slot.index(),
                "Dropped stale surface buffer"
            );
        }
        if let Err(e) = self.pool.add_buffer(slot.clone()) {
            warn!(stream_id = self.info.stream_id, "Re-adding slot failed: {}", e);
        }
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Cancel every buffer still handed out
    fn cancel_outstanding(&self) {
        let producer = self.inner().producer.clone();
        for slot in self.pool.busy_buffers() {
            if let (Some(native), Some(producer)) = (slot.take_handle(), producer.as_ref()) {
                if let Err(e) = producer.cancel_buffer(native) {
                    warn!(stream_id = self.info.stream_id, "Cancel buffer failed: {}", e);
                }
            }
            self.recycle(&slot);
        }
        self.in_flight.send_replace(0);
    }

    /// Stop handing out buffers, wait for the outstanding ones, and report
    /// how many frames were delivered since the capture started
    pub async fn flush_dcamera_buffer(&self, timeout: Duration) -> u32 {
        self.pool.notify_stop(true);
        let mut in_flight = self.in_flight.subscribe();
        let drained = tokio::time::timeout(timeout, in_flight.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if !drained {
            warn!(
                stream_id = self.info.stream_id,
                outstanding = self.in_flight(),
                "Flush timed out, cancelling outstanding buffers"
            );
            self.cancel_outstanding();
        }

        let mut inner = self.inner();
        let frames = inner.frame_count;
        inner.frame_count = 0;
        inner.capture_id = -1;
        info!(stream_id = self.info.stream_id, frames, "Stream flushed");
        frames
    }

    pub fn get_stream_attribute(&self) -> StreamAttribute {
        StreamAttribute {
            stream_id: self.info.stream_id,
            width: self.info.width,
            height: self.info.height,
            override_format: self.info.format,
            override_data_space: self.info.data_space,
            producer_usage: PRODUCER_USAGE,
            producer_buffer_count: BUFFER_POOL_CAPACITY as u32,
            max_batch_capture_count: BUFFER_POOL_CAPACITY as u32,
            max_capture_count: 1,
        }
    }

    /// Capacity of one frame buffer
    pub fn frame_capacity(&self) -> usize {
        frame_capacity(self.info.width, self.info.height, self.info.format)
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemoryBufferQueue;
    use dcamera_core::{EncodeType, PixelFormat, StreamIntent};
    use tokio_test::{assert_err, assert_ok};

    fn stream_with_queue() -> (DCameraStream, Arc<MemoryBufferQueue>) {
        let queue = Arc::new(MemoryBufferQueue::default());
        let info = StreamInfo {
            stream_id: 1,
            width: 8,
            height: 4,
            format: PixelFormat::Ycrcb420Sp,
            data_space: 0,
            intent: StreamIntent::Preview,
            tunneled_mode: true,
            min_frame_duration: 0,
            encode_type: EncodeType::Null,
            buffer_queue: Some(BufferQueueHandle::new(queue.clone())),
        };
        (DCameraStream::new(DHBase::new("dev", "cam"), &info).unwrap(), queue)
    }

    #[test]
    fn test_buffer_round_trip_counts_frames() {
        let (stream, queue) = stream_with_queue();
        stream.start_capture(1);

        let mut buffer = stream.get_dcamera_buffer().unwrap();
        assert_eq!(buffer.size, 48);
        assert_eq!(stream.in_flight(), 1);
        buffer.data = vec![7; 10];
        assert_ok!(stream.return_dcamera_buffer(buffer));

        assert_eq!(stream.frame_count(), 1);
        assert_eq!(stream.in_flight(), 0);
        assert_eq!(queue.acquire_flushed().unwrap().data, vec![7; 10]);
    }

    #[test]
    fn test_slots_are_reused() {
        let (stream, queue) = stream_with_queue();
        for _ in 0..20 {
            let mut buffer = stream.get_dcamera_buffer().unwrap();
            assert_eq!(buffer.index, 0);
            buffer.data = vec![1];
            stream.return_dcamera_buffer(buffer).unwrap();
            assert!(queue.acquire_flushed().is_some());
        }
        assert_eq!(stream.frame_count(), 20);
    }

    #[test]
    fn test_returned_slot_is_invalidated() {
        let (stream, _queue) = stream_with_queue();
        let mut buffer = stream.get_dcamera_buffer().unwrap();
        let slot = stream.inner().slots.get(&buffer.index).cloned().unwrap();
        assert!(slot.is_valid());

        buffer.data = vec![3; 4];
        stream.return_dcamera_buffer(buffer).unwrap();
        let desc = slot.desc();
        assert!(!desc.valid);
        assert_eq!(desc.index, 0);
        assert_eq!((desc.phy_addr, desc.size), (0, 0));

        // handed out again under the same index
        assert_eq!(stream.get_dcamera_buffer().unwrap().index, 0);
        assert!(slot.is_valid());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let (stream, queue) = stream_with_queue();
        let mut buffer = stream.get_dcamera_buffer().unwrap();
        buffer.data = vec![0; 49];
        assert_err!(stream.return_dcamera_buffer(buffer));
        assert_eq!(stream.frame_count(), 0);
        assert_eq!(stream.in_flight(), 0);
        assert_eq!(queue.cancelled(), 1);
    }

    #[test]
    fn test_double_return_is_rejected() {
        let (stream, _queue) = stream_with_queue();
        let mut buffer = stream.get_dcamera_buffer().unwrap();
        buffer.data = vec![1];
        stream.return_dcamera_buffer(buffer.clone()).unwrap();
        let err = assert_err!(stream.return_dcamera_buffer(buffer));
        assert!(matches!(err, DCameraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_flush_waits_for_returned_buffer() {
        let (stream, _queue) = stream_with_queue();
        let stream = Arc::new(stream);
        stream.start_capture(3);
        let mut buffer = stream.get_dcamera_buffer().unwrap();

        let producer = stream.clone();
        let returner = tokio::spawn(async move {
            tokio::task::yield_now().await;
            buffer.data = vec![9; 4];
            producer.return_dcamera_buffer(buffer).unwrap();
        });

        let frames = stream.flush_dcamera_buffer(Duration::from_secs(5)).await;
        returner.await.unwrap();
        assert_eq!(frames, 1);
        // stopped until the next capture
        assert_err!(stream.get_dcamera_buffer());
        stream.start_capture(4);
        assert_ok!(stream.get_dcamera_buffer());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timeout_cancels_outstanding() {
        let (stream, queue) = stream_with_queue();
        stream.start_capture(1);
        let _held = stream.get_dcamera_buffer().unwrap();
        let frames = stream.flush_dcamera_buffer(Duration::from_millis(100)).await;
        assert_eq!(frames, 0);
        assert_eq!(stream.in_flight(), 0);
        assert_eq!(queue.cancelled(), 1);
    }

    #[test]
    fn test_queue_attach_rules() {
        let (stream, _queue) = stream_with_queue();
        let other = BufferQueueHandle::new(Arc::new(MemoryBufferQueue::default()));
        assert_err!(stream.set_buffer_queue(other.clone()));
        assert_ok!(stream.release_buffer_queue());
        assert!(!stream.has_buffer_queue());
        assert_err!(stream.get_dcamera_buffer());
        assert_ok!(stream.set_buffer_queue(other));
    }
}
