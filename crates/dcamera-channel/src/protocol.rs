//! Control-plane command envelope
//!
//! Commands travel over the control session as JSON:
//! `{"Type": "MESSAGE"|"OPERATION", "dhId": ..., "Command": ..., "Value": ...}`.
//! `Value` is command specific; the typed constructors and accessors below
//! keep each command's payload shape in one place.

use dcamera_core::{DCCaptureInfo, DCameraError, DCameraSettings, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Envelope `Type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "MESSAGE")]
    Message,
    #[serde(rename = "OPERATION")]
    Operation,
}

/// Envelope `Command` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandName {
    GetInfo,
    ChannelNeg,
    UpdateMetadata,
    MetadataResult,
    StateNotify,
    Capture,
    StopCapture,
    OpenChannel,
    CloseChannel,
}

/// One control command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DCameraCommand {
    #[serde(rename = "Type")]
    pub kind: CommandKind,
    #[serde(rename = "dhId")]
    pub dh_id: String,
    #[serde(rename = "Command")]
    pub command: CommandName,
    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

/// Per-session detail of a channel negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelDetail {
    pub data_session_flag: String,
    pub is_sink_client: bool,
}

/// `CHANNEL_NEG` and `OPEN_CHANNEL` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelNegotiation {
    pub source_dev_id: String,
    #[serde(default)]
    pub detail: Vec<ChannelDetail>,
}

/// `STATE_NOTIFY` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateEvent {
    #[serde(rename = "Type")]
    pub event_type: i32,
    pub result: i32,
    #[serde(default)]
    pub content: String,
}

/// `STATE_NOTIFY` event types
pub mod event_types {
    pub const MESSAGE: i32 = 0;
    pub const OPERATION: i32 = 1;
}

/// `STATE_NOTIFY` results
pub mod event_results {
    pub const CHANNEL_DISCONNECTED: i32 = 0;
    pub const CHANNEL_CONNECTED: i32 = 1;
    pub const CAMERA_OPENED: i32 = 2;
    pub const CAMERA_CLOSED: i32 = 3;
    pub const OPEN_CHANNEL_ERROR: i32 = 4;
    pub const CLOSE_CHANNEL_ERROR: i32 = 5;
    pub const CONFIG_STREAMS_ERROR: i32 = 6;
    pub const RELEASE_STREAMS_ERROR: i32 = 7;
    pub const START_CAPTURE_ERROR: i32 = 8;
    pub const STOP_CAPTURE_ERROR: i32 = 9;
    pub const UPDATE_SETTINGS_ERROR: i32 = 10;
    pub const DEVICE_ERROR: i32 = 11;
}

impl DCameraCommand {
    fn new(
        kind: CommandKind,
        dh_id: &str,
        command: CommandName,
        value: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            dh_id: dh_id.to_string(),
            command,
            value,
        }
    }

    /// Ask the sink to start capturing with the negotiated descriptors
    pub fn capture(dh_id: &str, infos: &[DCCaptureInfo]) -> Result<Self> {
        Ok(Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::Capture,
            serde_json::to_value(infos)?,
        ))
    }

    pub fn stop_capture(dh_id: &str) -> Self {
        Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::StopCapture,
            serde_json::Value::Array(Vec::new()),
        )
    }

    pub fn update_metadata(dh_id: &str, settings: &[DCameraSettings]) -> Result<Self> {
        Ok(Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::UpdateMetadata,
            serde_json::to_value(settings)?,
        ))
    }

    pub fn metadata_result(dh_id: &str, settings: &[DCameraSettings]) -> Result<Self> {
        Ok(Self::new(
            CommandKind::Message,
            dh_id,
            CommandName::MetadataResult,
            serde_json::to_value(settings)?,
        ))
    }

    pub fn state_notify(dh_id: &str, event: &StateEvent) -> Result<Self> {
        Ok(Self::new(
            CommandKind::Message,
            dh_id,
            CommandName::StateNotify,
            serde_json::to_value(event)?,
        ))
    }

    pub fn channel_neg(dh_id: &str, negotiation: &ChannelNegotiation) -> Result<Self> {
        Ok(Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::ChannelNeg,
            serde_json::to_value(negotiation)?,
        ))
    }

    pub fn open_channel(dh_id: &str, source_dev_id: &str) -> Result<Self> {
        let open = ChannelNegotiation {
            source_dev_id: source_dev_id.to_string(),
            detail: Vec::new(),
        };
        Ok(Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::OpenChannel,
            serde_json::to_value(open)?,
        ))
    }

    pub fn close_channel(dh_id: &str) -> Self {
        Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::CloseChannel,
            serde_json::Value::Null,
        )
    }

    pub fn get_info(dh_id: &str) -> Self {
        Self::new(
            CommandKind::Operation,
            dh_id,
            CommandName::GetInfo,
            serde_json::Value::Null,
        )
    }

    /// Decode `Value` after checking the command name
    pub fn value_as<T: DeserializeOwned>(&self, expected: CommandName) -> Result<T> {
        if self.command != expected {
            return Err(DCameraError::InvalidArgument(format!(
                "expected {:?} command, got {:?}",
                expected, self.command
            )));
        }
        Ok(serde_json::from_value(self.value.clone())?)
    }

    pub fn capture_infos(&self) -> Result<Vec<DCCaptureInfo>> {
        let infos: Vec<DCCaptureInfo> = self.value_as(CommandName::Capture)?;
        if infos.is_empty() {
            return Err(DCameraError::InvalidArgument(
                "capture command without descriptors".into(),
            ));
        }
        Ok(infos)
    }

    pub fn settings(&self) -> Result<Vec<DCameraSettings>> {
        match self.command {
            CommandName::UpdateMetadata | CommandName::MetadataResult => {
                Ok(serde_json::from_value(self.value.clone())?)
            }
            other => Err(DCameraError::InvalidArgument(format!(
                "{:?} does not carry settings",
                other
            ))),
        }
    }

    pub fn state_event(&self) -> Result<StateEvent> {
        self.value_as(CommandName::StateNotify)
    }

    pub fn channel_negotiation(&self) -> Result<ChannelNegotiation> {
        match self.command {
            CommandName::ChannelNeg | CommandName::OpenChannel => {
                Ok(serde_json::from_value(self.value.clone())?)
            }
            other => Err(DCameraError::InvalidArgument(format!(
                "{:?} does not carry a channel negotiation",
                other
            ))),
        }
    }
}

/// Serialize a command to JSON bytes
pub fn serialize(cmd: &DCameraCommand) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(cmd)?)
}

/// Deserialize a command from JSON bytes
pub fn deserialize(bytes: &[u8]) -> Result<DCameraCommand> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcamera_core::{DCSettingsType, DCStreamType, EncodeType, PixelFormat};
    use tokio_test::assert_err;

    fn capture_info() -> DCCaptureInfo {
        DCCaptureInfo {
            stream_ids: vec![1, 2],
            width: 1280,
            height: 720,
            stride: 0,
            format: PixelFormat::Ycrcb420Sp,
            data_space: 8,
            is_capture: true,
            encode_type: EncodeType::H265,
            stream_type: DCStreamType::ContinuousFrame,
            capture_settings: Vec::new(),
        }
    }

    #[test]
    fn test_capture_roundtrip() {
        let cmd = DCameraCommand::capture("camera_0", &[capture_info()]).unwrap();
        let bytes = serialize(&cmd).unwrap();
        let decoded = deserialize(&bytes).unwrap();

        assert_eq!(decoded.kind, CommandKind::Operation);
        assert_eq!(decoded.command, CommandName::Capture);
        let infos = decoded.capture_infos().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].stream_ids, vec![1, 2]);
        assert_eq!(infos[0].encode_type, EncodeType::H265);
    }

    #[test]
    fn test_envelope_field_names() {
        let bytes = serialize(&DCameraCommand::stop_capture("camera_0")).unwrap();
        let json = String::from_utf8_lossy(&bytes);
        assert!(json.contains("\"Type\":\"OPERATION\""));
        assert!(json.contains("\"dhId\":\"camera_0\""));
        assert!(json.contains("\"Command\":\"STOP_CAPTURE\""));
    }

    #[test]
    fn test_state_notify_from_peer() {
        // Exact JSON format sent by a sink
        let json = r#"{"Type":"MESSAGE","dhId":"camera_0","Command":"STATE_NOTIFY","Value":{"Type":1,"Result":8,"Content":"capture failed"}}"#;
        let cmd = deserialize(json.as_bytes()).unwrap();
        let event = cmd.state_event().unwrap();
        assert_eq!(event.event_type, event_types::OPERATION);
        assert_eq!(event.result, event_results::START_CAPTURE_ERROR);
        assert_eq!(event.content, "capture failed");
    }

    #[test]
    fn test_channel_neg_detail() {
        let neg = ChannelNegotiation {
            source_dev_id: "src-device".into(),
            detail: vec![ChannelDetail {
                data_session_flag: "dataContinue".into(),
                is_sink_client: true,
            }],
        };
        let cmd = DCameraCommand::channel_neg("camera_0", &neg).unwrap();
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"SourceDevId\":\"src-device\""));
        assert!(json.contains("\"DataSessionFlag\":\"dataContinue\""));
        assert!(json.contains("\"IsSinkClient\":true"));
        assert_eq!(cmd.channel_negotiation().unwrap(), neg);
    }

    #[test]
    fn test_settings_payload() {
        let settings = vec![DCameraSettings {
            setting_type: DCSettingsType::UpdateMetadata,
            value: "base64meta".into(),
        }];
        let cmd = DCameraCommand::update_metadata("camera_0", &settings).unwrap();
        assert_eq!(cmd.settings().unwrap(), settings);
    }

    #[test]
    fn test_wrong_accessor_is_rejected() {
        let cmd = DCameraCommand::get_info("camera_0");
        assert_err!(cmd.capture_infos());
        assert_err!(cmd.settings());
        assert_err!(deserialize(br#"{"Type":"OPERATION","dhId":"x","Command":"REBOOT"}"#));
    }

    #[test]
    fn test_missing_value_defaults_to_null() {
        let cmd = deserialize(br#"{"Type":"OPERATION","dhId":"x","Command":"CLOSE_CHANNEL"}"#).unwrap();
        assert_eq!(cmd.command, CommandName::CloseChannel);
        assert!(cmd.value.is_null());
    }
}
