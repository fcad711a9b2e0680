//! # dcamera-service
//!
//! Source-side services of the distributed camera.
//!
//! This crate provides:
//! - `StreamProducer`, pacing processed frames into HAL buffers
//! - `ControlDispatcher`, sending capture commands over the control session
//! - `SourceDataPath`, wiring a data session through the processing
//!   pipeline into a producer

pub mod controller;
pub mod data_path;
pub mod producer;

pub use controller::{ControlDispatcher, handle_control_command, run_control_events};
pub use data_path::{DataPathConfig, SourceDataPath};
pub use producer::{ProducerConfig, StreamProducer, feed_stream_to_driver};
