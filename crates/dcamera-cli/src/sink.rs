//! Sink end: a synthetic camera that streams frames on request

use crate::config::RelayConfig;
use anyhow::{Context, Result};
use dcamera_channel::protocol::{event_results, event_types};
use dcamera_channel::{
    ChannelEvent, CommandName, DCameraCommand, SessionConfig, SessionFlag, SoftbusSession,
    StateEvent, deserialize, serialize, tcp,
};
use dcamera_core::{DCCaptureInfo, DCSettingsType, DCStreamType, DCameraSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result tag reporting the frame rate a capture runs at
const FPS_RESULT_TAG: u32 = 1;

/// One NV12 frame whose luma ramps with the frame number
pub fn synthetic_nv12(width: u32, height: u32, frame: u64) -> Vec<u8> {
    let luma = (width * height) as usize;
    let mut data = Vec::with_capacity(luma * 3 / 2);
    data.extend((0..luma).map(|i| ((i as u64 + frame) % 256) as u8));
    for _ in 0..luma / 4 {
        data.extend_from_slice(&[128, 64]);
    }
    data
}

/// A minimal JPEG-framed still
fn synthetic_still(frame: u64) -> Vec<u8> {
    let mut data = vec![0xff, 0xd8];
    data.extend_from_slice(&frame.to_be_bytes());
    data.extend_from_slice(&[0xff, 0xd9]);
    data
}

async fn accept_session(
    listener: &TcpListener,
    config: &RelayConfig,
    flag: SessionFlag,
) -> Result<(Arc<SoftbusSession>, mpsc::Receiver<ChannelEvent>)> {
    let (reader, writer) = tcp::accept(listener).await?;
    Ok(SoftbusSession::open(
        &config.dh_id,
        flag,
        SessionConfig::default(),
        reader,
        writer,
    ))
}

struct SinkCamera {
    config: RelayConfig,
    control: Arc<SoftbusSession>,
    continuous: Arc<SoftbusSession>,
    snapshot: Arc<SoftbusSession>,
    streaming: Option<JoinHandle<()>>,
}

impl SinkCamera {
    async fn reply(&self, command: &DCameraCommand) {
        let sent = match serialize(command) {
            Ok(bytes) => self.control.send_data(&bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Control reply failed: {}", e);
        }
    }

    fn stop_streaming(&mut self) {
        if let Some(task) = self.streaming.take() {
            task.abort();
            info!("Continuous capture stopped");
        }
    }

    async fn start_capture(&mut self, infos: Vec<DCCaptureInfo>) {
        for info in infos.into_iter().filter(|info| info.is_capture) {
            info!(
                stream_type = ?info.stream_type,
                width = info.width,
                height = info.height,
                encode = ?info.encode_type,
                "Capture requested"
            );
            match info.stream_type {
                DCStreamType::ContinuousFrame => {
                    self.stop_streaming();
                    let session = self.continuous.clone();
                    let interval = Duration::from_millis(1000 / u64::from(self.config.fps));
                    self.streaming = Some(tokio::spawn(stream_frames(
                        session,
                        info.width,
                        info.height,
                        interval,
                    )));
                }
                DCStreamType::SnapshotFrame => {
                    if let Err(e) = self.snapshot.send_data(&synthetic_still(0)).await {
                        warn!("Sending still failed: {}", e);
                    }
                }
            }
        }

        let results = format!(r#"{{"{}": "{}"}}"#, FPS_RESULT_TAG, hex_byte(self.config.fps));
        match DCameraCommand::metadata_result(
            &self.config.dh_id,
            &[DCameraSettings {
                setting_type: DCSettingsType::MetadataResult,
                value: results,
            }],
        ) {
            Ok(command) => self.reply(&command).await,
            Err(e) => warn!("Building metadata result failed: {}", e),
        }
    }

    async fn handle(&mut self, command: DCameraCommand) {
        match command.command {
            CommandName::Capture => match command.capture_infos() {
                Ok(infos) => self.start_capture(infos).await,
                Err(e) => {
                    warn!("Bad capture command: {}", e);
                    let event = StateEvent {
                        event_type: event_types::OPERATION,
                        result: event_results::START_CAPTURE_ERROR,
                        content: e.to_string(),
                    };
                    if let Ok(reply) = DCameraCommand::state_notify(&self.config.dh_id, &event) {
                        self.reply(&reply).await;
                    }
                }
            },
            CommandName::StopCapture => self.stop_streaming(),
            CommandName::UpdateMetadata => match command.settings() {
                Ok(settings) => info!(count = settings.len(), "Settings updated"),
                Err(e) => warn!("Bad settings: {}", e),
            },
            other => debug!(command = ?other, "Ignoring command"),
        }
    }
}

fn hex_byte(value: u32) -> String {
    format!("{:02x}", value.min(255))
}

async fn stream_frames(session: Arc<SoftbusSession>, width: u32, height: u32, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut frame = 0u64;
    loop {
        ticker.tick().await;
        if let Err(e) = session.send_data(&synthetic_nv12(width, height, frame)).await {
            warn!(frame, "Frame send failed, stopping: {}", e);
            return;
        }
        frame += 1;
        if frame % 30 == 0 {
            debug!(frame, "Frames streamed");
        }
    }
}

/// Accept the three sessions and serve capture commands until the source leaves
pub async fn run(config: RelayConfig) -> Result<()> {
    let control_listener = TcpListener::bind(config.control_addr())
        .await
        .with_context(|| format!("binding {}", config.control_addr()))?;
    let continuous_listener = TcpListener::bind(config.continuous_addr())
        .await
        .with_context(|| format!("binding {}", config.continuous_addr()))?;
    let snapshot_listener = TcpListener::bind(config.snapshot_addr())
        .await
        .with_context(|| format!("binding {}", config.snapshot_addr()))?;
    info!(dh_id = %config.dh_id, "Sink waiting for source on {}", config.control_addr());

    let (control, mut control_events) =
        accept_session(&control_listener, &config, SessionFlag::Control).await?;
    let (continuous, _continuous_events) =
        accept_session(&continuous_listener, &config, SessionFlag::DataContinue).await?;
    let (snapshot, _snapshot_events) =
        accept_session(&snapshot_listener, &config, SessionFlag::DataSnapshot).await?;

    let mut camera = SinkCamera {
        config,
        control,
        continuous,
        snapshot,
        streaming: None,
    };

    while let Some(event) = control_events.recv().await {
        match event {
            ChannelEvent::Connected => info!("Source connected"),
            ChannelEvent::Data(bytes) => match deserialize(&bytes) {
                Ok(command) => camera.handle(command).await,
                Err(e) => warn!("Undecodable control message: {}", e),
            },
            ChannelEvent::Error(e) => warn!("Control session error: {}", e),
            ChannelEvent::Disconnected => break,
        }
    }

    camera.stop_streaming();
    camera.control.close();
    camera.continuous.close();
    camera.snapshot.close();
    info!("Source disconnected, sink exiting");
    Ok(())
}
