//! # dcamera-core
//!
//! Core types for the distributed camera data path.
//!
//! This crate provides the foundational types shared by every layer:
//! - Distributed hardware identity
//! - Frame buffer descriptors and the surface queue interface
//! - Stream and physical capture descriptors
//! - Camera ability parsing
//! - Error taxonomy and HAL result codes

pub mod ability;
pub mod buffer;
pub mod dhbase;
pub mod error;
pub mod stream;

pub use ability::{CameraAbility, Resolution};
pub use buffer::{
    BufferFlushConfig, BufferProducer, BufferQueueHandle, BufferRequestConfig, DCameraBuffer,
    ImageBuffer, ImageBufferDesc, NativeBuffer,
};
pub use dhbase::DHBase;
pub use error::{DCameraError, ErrorKind, Result, status_codes, to_hal_code};
pub use stream::{
    CaptureEndedInfo, CaptureInfo, DCCaptureInfo, DCSettingsType, DCStreamInfo, DCStreamType,
    DCameraSettings, EncodeType, OperationMode, PixelFormat, StreamAttribute, StreamInfo,
    StreamIntent, StreamSupportType,
};
