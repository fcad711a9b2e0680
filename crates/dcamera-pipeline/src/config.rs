//! Video configuration shared by pipeline nodes

use dcamera_core::{DCameraError, EncodeType, PixelFormat, Result};

/// Compression applied to a frame stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodecType {
    /// Raw frames
    NoCodec,
    H264,
    H265,
}

impl From<EncodeType> for VideoCodecType {
    fn from(encode: EncodeType) -> Self {
        match encode {
            EncodeType::H264 => VideoCodecType::H264,
            EncodeType::H265 => VideoCodecType::H265,
            // Still frames travel as JPEG end to end and are never transcoded
            EncodeType::Null | EncodeType::Jpeg => VideoCodecType::NoCodec,
        }
    }
}

/// Raw frame layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoPixelFormat {
    Yuvi420,
    Nv12,
    Nv21,
    Rgba8888,
}

impl TryFrom<PixelFormat> for VideoPixelFormat {
    type Error = DCameraError;

    fn try_from(format: PixelFormat) -> Result<Self> {
        match format {
            PixelFormat::Ycbcr420_888 => Ok(VideoPixelFormat::Yuvi420),
            PixelFormat::Ycbcr420Sp => Ok(VideoPixelFormat::Nv12),
            PixelFormat::Ycrcb420Sp => Ok(VideoPixelFormat::Nv21),
            PixelFormat::Rgba8888 => Ok(VideoPixelFormat::Rgba8888),
            PixelFormat::Jpeg => Err(DCameraError::InvalidArgument(
                "JPEG is not a raw pixel format".into(),
            )),
        }
    }
}

/// Geometry, format and rate of one side of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    pub codec: VideoCodecType,
    pub pixel_format: VideoPixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl VideoConfig {
    pub fn new(
        codec: VideoCodecType,
        pixel_format: VideoPixelFormat,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Self {
        Self {
            codec,
            pixel_format,
            width,
            height,
            frame_rate,
        }
    }

    /// Size in bytes of one tightly packed raw frame
    pub fn raw_frame_size(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        match self.pixel_format {
            VideoPixelFormat::Yuvi420 | VideoPixelFormat::Nv12 | VideoPixelFormat::Nv21 => {
                pixels * 3 / 2
            }
            VideoPixelFormat::Rgba8888 => pixels * 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(
            VideoPixelFormat::try_from(PixelFormat::Ycbcr420Sp).unwrap(),
            VideoPixelFormat::Nv12
        );
        assert_eq!(
            VideoPixelFormat::try_from(PixelFormat::Ycrcb420Sp).unwrap(),
            VideoPixelFormat::Nv21
        );
        assert!(VideoPixelFormat::try_from(PixelFormat::Jpeg).is_err());
        assert_eq!(VideoCodecType::from(EncodeType::Jpeg), VideoCodecType::NoCodec);
    }

    #[test]
    fn test_raw_frame_size() {
        let nv12 = VideoConfig::new(VideoCodecType::NoCodec, VideoPixelFormat::Nv12, 640, 480, 30);
        assert_eq!(nv12.raw_frame_size(), 640 * 480 * 3 / 2);
    }
}
