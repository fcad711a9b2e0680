//! # dcamera-pipeline
//!
//! Chained video processing for distributed camera streams.
//!
//! A pipeline is a singly linked chain of `ProcessNode`s. The codec node
//! decodes (source side) or encodes (sink side) through an external
//! `VideoCodec`; the convert node turns NV12 into NV21. Finished frames and
//! asynchronous failures come back to the owner as `PipelineEvent`s.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod convert;
pub mod node;
pub mod pipeline;

pub use buffer::{DataBuffer, FrameMeta};
pub use codec::{
    CodecCallback, CodecConfig, CodecDirection, CodecFactory, CodecNode, DECODE_INPUT_QUEUE_MAX,
    SurfaceFrame, VideoCodec, is_in_codec_range,
};
pub use config::{VideoCodecType, VideoConfig, VideoPixelFormat};
pub use convert::{ConvertNode, convert_nv12_to_nv21};
pub use node::{EventReceiver, EventSender, NodeLink, PipelineEvent, ProcessNode};
pub use pipeline::{DataProcessPipeline, PipelineType};
