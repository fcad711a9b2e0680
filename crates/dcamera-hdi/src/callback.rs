//! Events reported to HAL clients
//!
//! Each component reports through one event enum over an unbounded channel,
//! so notifications never block the component and never keep its client
//! alive.

use dcamera_core::{CaptureEndedInfo, DCameraError};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Stream operator notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOperatorEvent {
    CaptureStarted {
        capture_id: i32,
        stream_ids: Vec<i32>,
    },
    CaptureEnded {
        capture_id: i32,
        infos: Vec<CaptureEndedInfo>,
    },
    CaptureError {
        capture_id: i32,
        stream_ids: Vec<i32>,
        error: DCameraError,
    },
    FrameShutter {
        capture_id: i32,
        stream_ids: Vec<i32>,
        timestamp: i64,
    },
}

/// Device notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device hit a fatal error and has been closed
    Error(DCameraError),
    /// Result metadata produced by the sink
    MetadataResult {
        timestamp: i64,
        results: BTreeMap<u32, Vec<u8>>,
    },
}

pub type StreamOperatorEvents = mpsc::UnboundedReceiver<StreamOperatorEvent>;
pub type DeviceEvents = mpsc::UnboundedReceiver<DeviceEvent>;
