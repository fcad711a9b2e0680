//! NV12 to NV21 color conversion node
//!
//! Both formats share the Y plane; only the interleaved chroma order differs
//! (UV vs VU). Conversion is stateless and runs inline in `process_data`.

use crate::buffer::{DataBuffer, FrameMeta};
use crate::config::{VideoCodecType, VideoConfig, VideoPixelFormat};
use crate::node::{EventSender, NodeLink, ProcessNode};
use dcamera_core::{DCameraError, Result};
use tracing::{debug, info};

/// Pipeline node swapping NV12 chroma into NV21 order
pub struct ConvertNode {
    next: NodeLink,
    ready: bool,
    released: bool,
    passthrough: bool,
    output: Option<VideoConfig>,
}

impl ConvertNode {
    pub fn new(events: EventSender) -> Self {
        Self {
            next: NodeLink::terminal(events),
            ready: false,
            released: false,
            passthrough: false,
            output: None,
        }
    }

    fn is_convertible(source: &VideoConfig, target: &VideoConfig) -> bool {
        source.codec == VideoCodecType::NoCodec
            && source.pixel_format == VideoPixelFormat::Nv12
            && target.pixel_format == VideoPixelFormat::Nv21
            && source.width == target.width
            && source.height == target.height
    }
}

impl ProcessNode for ConvertNode {
    fn node_name(&self) -> &'static str {
        "ConvertNV12ToNV21"
    }

    fn init_node(&mut self, source: &VideoConfig, target: &VideoConfig) -> Result<VideoConfig> {
        if self.ready || self.released {
            return Err(DCameraError::WrongState("convert node already initialized".into()));
        }
        let output = if source.pixel_format == target.pixel_format {
            info!("Pixel formats match, conversion skipped");
            self.passthrough = true;
            *source
        } else if Self::is_convertible(source, target) {
            VideoConfig {
                pixel_format: VideoPixelFormat::Nv21,
                ..*source
            }
        } else {
            return Err(DCameraError::InvalidArgument(format!(
                "cannot convert {:?} {}x{} to {:?} {}x{}",
                source.pixel_format,
                source.width,
                source.height,
                target.pixel_format,
                target.width,
                target.height
            )));
        };
        self.output = Some(output);
        self.ready = true;
        Ok(output)
    }

    fn process_data(&mut self, buffers: Vec<DataBuffer>) -> Result<()> {
        if !self.ready {
            return Err(DCameraError::WrongState("convert node is not ready".into()));
        }
        if buffers.is_empty() {
            return Err(DCameraError::InvalidArgument("no buffers to process".into()));
        }
        for buffer in buffers {
            let converted = if self.passthrough {
                buffer
            } else {
                convert_nv12_to_nv21(&buffer)?
            };
            self.next.forward(converted)?;
        }
        Ok(())
    }

    fn release_process_node(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.ready = false;
        debug!("Releasing convert node");
        self.next.release();
    }

    fn set_next(&mut self, next: Box<dyn ProcessNode>) {
        self.next.set_next(next);
    }
}

/// Convert one NV12 frame into a tightly packed NV21 frame
///
/// The source may carry a row stride and luma slice height larger than the
/// picture; the output never does.
pub fn convert_nv12_to_nv21(src: &DataBuffer) -> Result<DataBuffer> {
    let meta = &src.meta;
    let width = meta.width as usize;
    let height = meta.height as usize;
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(DCameraError::InvalidArgument(format!(
            "NV12 frame needs even non-zero dimensions, got {}x{}",
            width, height
        )));
    }
    if let Some(format) = meta.pixel_format {
        if format != VideoPixelFormat::Nv12 {
            return Err(DCameraError::InvalidArgument(format!(
                "expected NV12 input, got {:?}",
                format
            )));
        }
    }

    let src_stride = meta.row_stride();
    let luma_rows = meta.luma_rows();
    if src_stride < width || luma_rows < height {
        return Err(DCameraError::InvalidArgument(format!(
            "stride {} / slice height {} smaller than {}x{}",
            src_stride, luma_rows, width, height
        )));
    }
    let chroma_rows = height / 2;
    let uv_offset = src_stride * luma_rows;
    let required = uv_offset + src_stride * (chroma_rows - 1) + width;
    if src.data.len() < required {
        return Err(DCameraError::InvalidArgument(format!(
            "NV12 buffer of {} bytes, need {}",
            src.data.len(),
            required
        )));
    }

    let y_size = width * height;
    let mut dst = vec![0u8; y_size * 3 / 2];
    copy_luma(&src.data, src_stride, &mut dst[..y_size], width, height);

    let (u_plane, v_plane) = separate_uv(&src.data[uv_offset..], src_stride, width, chroma_rows);
    combine_vu(&u_plane, &v_plane, &mut dst[y_size..]);

    let out_meta = FrameMeta {
        stride: width as u32,
        slice_height: height as u32,
        pixel_format: Some(VideoPixelFormat::Nv21),
        ..*meta
    };
    Ok(DataBuffer::with_meta(dst, out_meta))
}

fn copy_luma(src: &[u8], src_stride: usize, dst: &mut [u8], width: usize, height: usize) {
    if src_stride == width {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }
    for (row, dst_row) in dst.chunks_exact_mut(width).enumerate() {
        let start = row * src_stride;
        dst_row.copy_from_slice(&src[start..start + width]);
    }
}

/// First pass: split interleaved UV rows into planar U and V
fn separate_uv(src: &[u8], src_stride: usize, width: usize, rows: usize) -> (Vec<u8>, Vec<u8>) {
    let pairs = width / 2;
    let mut u_plane = Vec::with_capacity(pairs * rows);
    let mut v_plane = Vec::with_capacity(pairs * rows);
    for row in 0..rows {
        let line = &src[row * src_stride..row * src_stride + width];
        for uv in line.chunks_exact(2) {
            u_plane.push(uv[0]);
            v_plane.push(uv[1]);
        }
    }
    (u_plane, v_plane)
}

/// Second pass: interleave planar chroma back in VU order
fn combine_vu(u_plane: &[u8], v_plane: &[u8], dst: &mut [u8]) {
    for ((vu, &u), &v) in dst.chunks_exact_mut(2).zip(u_plane).zip(v_plane) {
        vu[0] = v;
        vu[1] = u;
    }
}
