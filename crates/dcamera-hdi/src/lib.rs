//! # dcamera-hdi
//!
//! HAL-facing side of the distributed camera.
//!
//! This crate provides:
//! - `BufferPool` and `DCameraStream` for frame buffer circulation
//! - `DStreamOperator` for stream configuration and capture negotiation
//! - `DCameraDevice` and the `DCameraHost` registry
//! - `BufferProvider`, the surface frame producers deliver into
//! - An in-memory surface queue for hosts without a HAL surface

pub mod buffer_pool;
pub mod callback;
pub mod device;
pub mod host;
pub mod metadata;
pub mod operator;
pub mod stream;
pub mod surface;

pub use buffer_pool::{BUFFER_POOL_CAPACITY, BufferPool};
pub use callback::{DeviceEvent, DeviceEvents, StreamOperatorEvent, StreamOperatorEvents};
pub use device::DCameraDevice;
pub use host::{BufferProvider, DCameraHost, MAX_DCAMERAS_NUMBER};
pub use metadata::{MetadataProcessor, ResultMode};
pub use operator::{CaptureDispatcher, DStreamOperator, negotiate_capture_info};
pub use stream::DCameraStream;
pub use surface::{ConsumedFrame, MemoryBufferQueue};
