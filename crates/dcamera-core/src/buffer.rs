//! Frame buffer descriptors and the surface queue interface

use crate::error::Result;
use crate::stream::{EncodeType, PixelFormat};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A buffer dequeued from a HAL surface queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBuffer {
    /// Surface sequence number, unique per queue
    pub seq: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub usage: u64,
    pub phy_addr: u64,
    pub fd: i32,
    /// Mapped buffer memory; its length is the buffer capacity
    pub data: Vec<u8>,
}

/// Parameters of a surface dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequestConfig {
    pub width: u32,
    pub height: u32,
    pub stride_alignment: u32,
    pub format: PixelFormat,
    pub usage: u64,
    pub timeout_ms: u32,
}

/// Parameters of a surface enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFlushConfig {
    /// Number of valid bytes
    pub size: usize,
    pub timestamp: i64,
}

/// Producer end of a HAL surface queue
pub trait BufferProducer: Send + Sync {
    /// Dequeue an empty buffer
    fn request_buffer(&self, config: &BufferRequestConfig) -> Result<NativeBuffer>;

    /// Enqueue a filled buffer for the consumer
    fn flush_buffer(&self, buffer: NativeBuffer, flush: BufferFlushConfig) -> Result<()>;

    /// Return an unfilled buffer to the queue
    fn cancel_buffer(&self, buffer: NativeBuffer) -> Result<()>;

    /// Resize the queue
    fn set_queue_size(&self, size: u32) -> Result<()>;
}

/// Shared handle to a surface queue, attached to a stream
#[derive(Clone)]
pub struct BufferQueueHandle(pub Arc<dyn BufferProducer>);

impl BufferQueueHandle {
    pub fn new(producer: Arc<dyn BufferProducer>) -> Self {
        Self(producer)
    }
}

impl Deref for BufferQueueHandle {
    type Target = dyn BufferProducer;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for BufferQueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BufferQueueHandle")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Buffer handed to a frame producer by `AcquireBuffer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DCameraBuffer {
    pub index: i32,
    /// Capacity of the destination buffer
    pub size: u32,
    /// Frame bytes; truncated to the written length before shutter
    pub data: Vec<u8>,
}

/// Geometry and bookkeeping of one frame buffer slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBufferDesc {
    /// Pool index, -1 while unassigned
    pub index: i32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: Option<PixelFormat>,
    pub size: u32,
    pub usage: u64,
    pub phy_addr: u64,
    pub fd: i32,
    pub frame_number: u64,
    pub timestamp: i64,
    pub capture_id: i32,
    pub fence_id: i32,
    pub encode_type: EncodeType,
    pub valid: bool,
}

impl Default for ImageBufferDesc {
    fn default() -> Self {
        Self {
            index: -1,
            width: 0,
            height: 0,
            stride: 0,
            format: None,
            size: 0,
            usage: 0,
            phy_addr: 0,
            fd: -1,
            frame_number: 0,
            timestamp: 0,
            capture_id: -1,
            fence_id: -1,
            encode_type: EncodeType::Null,
            valid: false,
        }
    }
}

#[derive(Debug, Default)]
struct ImageBufferState {
    desc: ImageBufferDesc,
    handle: Option<NativeBuffer>,
}

/// Lock-protected descriptor of one physical frame buffer
#[derive(Debug, Default)]
pub struct ImageBuffer {
    state: Mutex<ImageBufferState>,
}

impl ImageBuffer {
    /// Empty, unassigned buffer
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ImageBufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take over a dequeued surface buffer under the given pool index
    pub fn populate(&self, index: i32, native: NativeBuffer) {
        let mut state = self.lock();
        state.desc = ImageBufferDesc {
            index,
            width: native.width,
            height: native.height,
            stride: native.stride,
            format: Some(native.format),
            size: native.data.len() as u32,
            usage: native.usage,
            phy_addr: native.phy_addr,
            fd: native.fd,
            valid: true,
            ..ImageBufferDesc::default()
        };
        state.handle = Some(native);
    }

    /// Copy of the current descriptor
    pub fn desc(&self) -> ImageBufferDesc {
        self.lock().desc.clone()
    }

    pub fn index(&self) -> i32 {
        self.lock().desc.index
    }

    pub fn is_valid(&self) -> bool {
        self.lock().desc.valid
    }

    /// Stamp capture bookkeeping onto the descriptor
    pub fn set_frame_info(&self, frame_number: u64, timestamp: i64, capture_id: i32) {
        let mut state = self.lock();
        state.desc.frame_number = frame_number;
        state.desc.timestamp = timestamp;
        state.desc.capture_id = capture_id;
    }

    /// Remove the surface buffer, leaving the descriptor in place
    pub fn take_handle(&self) -> Option<NativeBuffer> {
        self.lock().handle.take()
    }

    /// Invalidate the descriptor and drop the surface buffer
    ///
    /// The pool index survives so the slot can be handed out again.
    pub fn free(&self) -> Option<NativeBuffer> {
        let mut state = self.lock();
        state.desc = ImageBufferDesc {
            index: state.desc.index,
            ..ImageBufferDesc::default()
        };
        state.handle.take()
    }

    /// Physical address when present, else pool index
    pub fn same_slot(&self, other: &ImageBuffer) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (a, b) = (self.desc(), other.desc());
        if a.phy_addr != 0 && b.phy_addr != 0 {
            a.phy_addr == b.phy_addr
        } else {
            a.index == b.index
        }
    }
}
