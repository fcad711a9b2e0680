//! Plain frame buffers flowing between pipeline nodes

use crate::config::VideoPixelFormat;

/// Frame metadata carried alongside the bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMeta {
    pub timestamp_us: i64,
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes, 0 when rows are tightly packed
    pub stride: u32,
    /// Rows allocated to the luma plane, 0 when equal to `height`
    pub slice_height: u32,
    /// Unset for encoded data
    pub pixel_format: Option<VideoPixelFormat>,
}

impl FrameMeta {
    pub fn row_stride(&self) -> usize {
        if self.stride == 0 {
            self.width as usize
        } else {
            self.stride as usize
        }
    }

    pub fn luma_rows(&self) -> usize {
        if self.slice_height == 0 {
            self.height as usize
        } else {
            self.slice_height as usize
        }
    }
}

/// One unit of work for a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBuffer {
    pub data: Vec<u8>,
    pub meta: FrameMeta,
}

impl DataBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            meta: FrameMeta::default(),
        }
    }

    pub fn with_meta(data: Vec<u8>, meta: FrameMeta) -> Self {
        Self { data, meta }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
