//! Camera ability description
//!
//! The sink device advertises what it can produce as a JSON document:
//!
//! ```json
//! {"ProtocolVer":"1.0","Position":"BACK","MetaData":"...",
//!  "CodecType":["OMX_hisi_video_encoder_avc"],
//!  "OutputFormat":{"Preview":[3],"Video":[3],"Photo":[4]},
//!  "Resolution":{"3":["1920*1080","1280*720"],"4":["1920*1080"]}}
//! ```

use crate::error::{DCameraError, Result};
use crate::stream::{EncodeType, PixelFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Frame dimensions, ordered by width then height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = DCameraError;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once('*')
            .ok_or_else(|| DCameraError::InvalidArgument(format!("bad resolution {:?}", s)))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| DCameraError::InvalidArgument(format!("bad resolution {:?}", s)))
        };
        Ok(Resolution::new(parse(w)?, parse(h)?))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OutputFormatDoc {
    #[serde(rename = "Preview", default)]
    preview: Vec<i32>,
    #[serde(rename = "Video", default)]
    video: Vec<i32>,
    #[serde(rename = "Photo", default)]
    photo: Vec<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AbilityDoc {
    #[serde(rename = "ProtocolVer", default)]
    protocol_ver: String,
    #[serde(rename = "Position", default)]
    position: String,
    #[serde(rename = "MetaData", default)]
    metadata: String,
    #[serde(rename = "CodecType", default)]
    codec_type: Vec<String>,
    #[serde(rename = "OutputFormat", default)]
    output_format: OutputFormatDoc,
    #[serde(rename = "Resolution", default)]
    resolution: BTreeMap<String, Vec<String>>,
}

/// Parsed camera ability of a sink device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraAbility {
    pub protocol_version: String,
    pub position: String,
    /// Encoded static camera metadata, passed through untouched
    pub metadata: String,
    pub codec_types: Vec<EncodeType>,
    pub preview_formats: Vec<PixelFormat>,
    pub video_formats: Vec<PixelFormat>,
    pub photo_formats: Vec<PixelFormat>,
    pub resolutions: HashMap<PixelFormat, Vec<Resolution>>,
}

fn codec_from_name(name: &str) -> Option<EncodeType> {
    let lower = name.to_ascii_lowercase();
    if lower.contains("hevc") || lower.contains("h265") {
        Some(EncodeType::H265)
    } else if lower.contains("avc") || lower.contains("h264") {
        Some(EncodeType::H264)
    } else if lower.contains("jpeg") {
        Some(EncodeType::Jpeg)
    } else {
        None
    }
}

fn codec_name(codec: EncodeType) -> &'static str {
    match codec {
        EncodeType::H265 => "OMX_hisi_video_encoder_hevc",
        EncodeType::H264 => "OMX_hisi_video_encoder_avc",
        EncodeType::Jpeg => "jpeg",
        EncodeType::Null => "none",
    }
}

fn formats(values: &[i32]) -> Vec<PixelFormat> {
    values
        .iter()
        .filter_map(|v| match PixelFormat::try_from(*v) {
            Ok(format) => Some(format),
            Err(e) => {
                warn!("Skipping output format: {}", e);
                None
            }
        })
        .collect()
}

impl CameraAbility {
    /// Parse the ability document advertised by a sink
    pub fn parse(json: &str) -> Result<Self> {
        let doc: AbilityDoc = serde_json::from_str(json)?;

        let mut resolutions: HashMap<PixelFormat, Vec<Resolution>> = HashMap::new();
        for (key, values) in &doc.resolution {
            let format = key
                .parse::<i32>()
                .map_err(|_| DCameraError::InvalidArgument(format!("bad format key {:?}", key)))
                .and_then(PixelFormat::try_from);
            let format = match format {
                Ok(format) => format,
                Err(e) => {
                    warn!("Skipping resolution table entry: {}", e);
                    continue;
                }
            };
            let list = values
                .iter()
                .map(|v| v.parse::<Resolution>())
                .collect::<Result<Vec<_>>>()?;
            resolutions.insert(format, list);
        }

        Ok(Self {
            protocol_version: doc.protocol_ver,
            position: doc.position,
            metadata: doc.metadata,
            codec_types: doc
                .codec_type
                .iter()
                .filter_map(|name| codec_from_name(name))
                .collect(),
            preview_formats: formats(&doc.output_format.preview),
            video_formats: formats(&doc.output_format.video),
            photo_formats: formats(&doc.output_format.photo),
            resolutions,
        })
    }

    /// Serialize back into the advertised document shape
    pub fn to_json(&self) -> Result<String> {
        let as_ints = |v: &[PixelFormat]| -> Vec<i32> { v.iter().map(|f| f.as_i32()).collect() };
        let doc = AbilityDoc {
            protocol_ver: self.protocol_version.clone(),
            position: self.position.clone(),
            metadata: self.metadata.clone(),
            codec_type: self
                .codec_types
                .iter()
                .map(|c| codec_name(*c).to_string())
                .collect(),
            output_format: OutputFormatDoc {
                preview: as_ints(&self.preview_formats),
                video: as_ints(&self.video_formats),
                photo: as_ints(&self.photo_formats),
            },
            resolution: self
                .resolutions
                .iter()
                .map(|(format, list)| {
                    (
                        format.as_i32().to_string(),
                        list.iter().map(|r| r.to_string()).collect(),
                    )
                })
                .collect(),
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Supported resolutions for a format, empty if unknown
    pub fn resolutions_for(&self, format: PixelFormat) -> &[Resolution] {
        self.resolutions
            .get(&format)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the format has a resolution table
    pub fn has_format(&self, format: PixelFormat) -> bool {
        self.resolutions.contains_key(&format)
    }

    pub fn supports_codec(&self, codec: EncodeType) -> bool {
        self.codec_types.contains(&codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const ABILITY: &str = r#"{
        "ProtocolVer": "1.0",
        "Position": "BACK",
        "MetaData": "AAEC",
        "CodecType": ["OMX_hisi_video_encoder_avc", "OMX_hisi_video_encoder_hevc"],
        "OutputFormat": {"Preview": [3], "Video": [3], "Photo": [4]},
        "Resolution": {"3": ["640*480", "1280*720"], "4": ["1920*1080"]}
    }"#;

    #[test]
    fn test_parse_ability() {
        let ability = CameraAbility::parse(ABILITY).unwrap();
        assert_eq!(ability.position, "BACK");
        assert!(ability.supports_codec(EncodeType::H265));
        assert!(ability.supports_codec(EncodeType::H264));
        assert_eq!(ability.preview_formats, vec![PixelFormat::Ycrcb420Sp]);
        assert_eq!(ability.photo_formats, vec![PixelFormat::Jpeg]);
        assert_eq!(
            ability.resolutions_for(PixelFormat::Ycrcb420Sp),
            &[Resolution::new(640, 480), Resolution::new(1280, 720)]
        );
        assert!(ability.resolutions_for(PixelFormat::Rgba8888).is_empty());
    }

    #[test]
    fn test_round_trip_document() {
        let ability = CameraAbility::parse(ABILITY).unwrap();
        let json = ability.to_json().unwrap();
        assert_eq!(CameraAbility::parse(&json).unwrap(), ability);
    }

    #[test]
    fn test_bad_documents() {
        assert_err!(CameraAbility::parse("not json"));
        assert_err!(CameraAbility::parse(r#"{"Resolution": {"3": ["640x480"]}}"#));
        // Unknown format keys are skipped rather than rejected
        let ability = assert_ok!(CameraAbility::parse(r#"{"Resolution": {"99": ["1*1"]}}"#));
        assert!(ability.resolutions.is_empty());
    }

    #[test]
    fn test_resolution_ordering() {
        let mut list = vec![
            Resolution::new(1280, 720),
            Resolution::new(1280, 960),
            Resolution::new(640, 480),
        ];
        list.sort();
        assert_eq!(list.last(), Some(&Resolution::new(1280, 960)));
        assert_eq!("1920*1080".parse::<Resolution>().unwrap().to_string(), "1920*1080");
    }
}
