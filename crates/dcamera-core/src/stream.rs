//! Stream and capture descriptors
//!
//! HAL-facing requests (`StreamInfo`, `CaptureInfo`) are converted into the
//! internal `DCStreamInfo` and merged into physical `DCCaptureInfo`
//! descriptors, which are what travels to the sink device.

use crate::buffer::BufferQueueHandle;
use crate::error::DCameraError;
use serde::{Deserialize, Serialize};

/// Declares a `#[repr(i32)]`-style enum that crosses the wire as an integer.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i32", into = "i32")]
        pub enum $name { $($(#[$vmeta])* $variant),+ }

        impl $name {
            /// Wire value
            pub fn as_i32(self) -> i32 {
                match self { $($name::$variant => $value),+ }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = DCameraError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(DCameraError::InvalidArgument(format!(
                        "unknown {} value {}", stringify!($name), other
                    ))),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value.as_i32()
            }
        }
    };
}

wire_enum! {
    /// Camera output pixel format
    pub enum PixelFormat {
        Rgba8888 = 1,
        Ycbcr420_888 = 2,
        /// NV21
        Ycrcb420Sp = 3,
        Jpeg = 4,
        /// NV12
        Ycbcr420Sp = 5,
    }
}

wire_enum! {
    /// Encoding applied to a physical capture
    pub enum EncodeType {
        Null = 0,
        H264 = 1,
        H265 = 2,
        Jpeg = 3,
    }
}

wire_enum! {
    /// Continuous (preview/video) versus snapshot (photo) stream
    pub enum DCStreamType {
        ContinuousFrame = 0,
        SnapshotFrame = 1,
    }
}

wire_enum! {
    /// Purpose of a HAL stream
    pub enum StreamIntent {
        Preview = 0,
        Video = 1,
        StillCapture = 2,
        Analyze = 3,
        Custom = 4,
    }
}

wire_enum! {
    /// Stream operator operation mode
    pub enum OperationMode {
        Normal = 0,
    }
}

wire_enum! {
    /// Setting kinds carried in capture and metadata commands
    pub enum DCSettingsType {
        UpdateMetadata = 0,
        EnableMetadata = 1,
        DisableMetadata = 2,
        MetadataResult = 3,
        SetFlashLight = 4,
        FpsRange = 5,
        UpdateFrameMetadata = 6,
    }
}

impl DCStreamType {
    /// The kind a ride-along descriptor must have
    pub fn opposite(self) -> Self {
        match self {
            DCStreamType::ContinuousFrame => DCStreamType::SnapshotFrame,
            DCStreamType::SnapshotFrame => DCStreamType::ContinuousFrame,
        }
    }
}

/// Answer to `IsStreamsSupported`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSupportType {
    DynamicSupported,
    ReConfigurable,
    NotSupported,
}

/// One setting entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DCameraSettings {
    #[serde(rename = "SettingType")]
    pub setting_type: DCSettingsType,
    #[serde(rename = "SettingValue")]
    pub value: String,
}

/// Stream requested by the HAL client
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_id: i32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data_space: i32,
    pub intent: StreamIntent,
    pub tunneled_mode: bool,
    pub min_frame_duration: i32,
    pub encode_type: EncodeType,
    /// Surface queue the stream's frames are produced into
    pub buffer_queue: Option<BufferQueueHandle>,
}

impl StreamInfo {
    /// Stream kind implied by the intent
    pub fn stream_type(&self) -> DCStreamType {
        if self.intent == StreamIntent::StillCapture {
            DCStreamType::SnapshotFrame
        } else {
            DCStreamType::ContinuousFrame
        }
    }
}

/// Capture requested by the HAL client
#[derive(Debug, Clone, Default)]
pub struct CaptureInfo {
    pub stream_ids: Vec<i32>,
    /// Opaque encoded capture settings
    pub capture_setting: Vec<u8>,
    pub enable_shutter_callback: bool,
}

/// Internal view of one configured stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DCStreamInfo {
    pub stream_id: i32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data_space: i32,
    pub encode_type: EncodeType,
    pub stream_type: DCStreamType,
}

impl From<&StreamInfo> for DCStreamInfo {
    fn from(info: &StreamInfo) -> Self {
        Self {
            stream_id: info.stream_id,
            width: info.width,
            height: info.height,
            stride: 0,
            format: info.format,
            data_space: info.data_space,
            encode_type: info.encode_type,
            stream_type: info.stream_type(),
        }
    }
}

/// Physical capture descriptor sent to the sink device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DCCaptureInfo {
    pub stream_ids: Vec<i32>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub data_space: i32,
    pub is_capture: bool,
    pub encode_type: EncodeType,
    pub stream_type: DCStreamType,
    #[serde(default)]
    pub capture_settings: Vec<DCameraSettings>,
}

/// Attributes reported by `GetStreamAttributes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAttribute {
    pub stream_id: i32,
    pub width: u32,
    pub height: u32,
    pub override_format: PixelFormat,
    pub override_data_space: i32,
    pub producer_usage: u64,
    pub producer_buffer_count: u32,
    pub max_batch_capture_count: u32,
    pub max_capture_count: u32,
}

/// Per-stream summary delivered when a capture ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEndedInfo {
    pub stream_id: i32,
    pub frame_count: u32,
}
