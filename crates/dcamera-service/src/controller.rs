//! Control session plumbing on the source side
//!
//! Outgoing: capture requests and settings become control commands sent to
//! the sink. Incoming: metadata results and state notifications are routed
//! to the device they belong to.

use async_trait::async_trait;
use dcamera_channel::protocol::event_results;
use dcamera_channel::{ChannelEvent, CommandName, DCameraCommand, SoftbusSession, serialize};
use dcamera_core::{DCCaptureInfo, DCameraError, DCameraSettings, DHBase, Result};
use dcamera_hdi::{CaptureDispatcher, DCameraDevice};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sends capture commands over a control session
pub struct ControlDispatcher {
    session: Arc<SoftbusSession>,
}

impl ControlDispatcher {
    pub fn new(session: Arc<SoftbusSession>) -> Self {
        Self { session }
    }

    async fn send(&self, command: &DCameraCommand) -> Result<()> {
        let bytes = serialize(command)?;
        debug!(command = ?command.command, len = bytes.len(), "Sending control command");
        self.session.send_data(&bytes).await
    }
}

#[async_trait]
impl CaptureDispatcher for ControlDispatcher {
    async fn start_capture(&self, dh_base: &DHBase, captures: Vec<DCCaptureInfo>) -> Result<()> {
        self.send(&DCameraCommand::capture(&dh_base.dh_id, &captures)?).await
    }

    async fn stop_capture(&self, dh_base: &DHBase) -> Result<()> {
        self.send(&DCameraCommand::stop_capture(&dh_base.dh_id)).await
    }

    async fn update_settings(
        &self,
        dh_base: &DHBase,
        settings: Vec<DCameraSettings>,
    ) -> Result<()> {
        self.send(&DCameraCommand::update_metadata(&dh_base.dh_id, &settings)?).await
    }
}

/// Apply one command received from the sink to its device
pub async fn handle_control_command(device: &DCameraDevice, command: &DCameraCommand) -> Result<()> {
    if command.dh_id != device.dh_base().dh_id {
        return Err(DCameraError::InvalidArgument(format!(
            "command for {} reached {}",
            command.dh_id,
            device.dh_base()
        )));
    }
    match command.command {
        CommandName::MetadataResult => {
            for setting in command.settings()? {
                device.on_settings_result(&setting)?;
            }
            Ok(())
        }
        CommandName::StateNotify => {
            let event = command.state_event()?;
            info!(dh = %device.dh_base(), result = event.result, content = %event.content, "Sink state changed");
            if event.result == event_results::DEVICE_ERROR
                || event.result == event_results::START_CAPTURE_ERROR
            {
                device
                    .notify_error(DCameraError::Device(format!(
                        "sink reported state {}: {}",
                        event.result, event.content
                    )))
                    .await;
            }
            Ok(())
        }
        other => {
            debug!(command = ?other, "Ignoring control command");
            Ok(())
        }
    }
}

/// Route control session events to `device` until the session ends
///
/// Losing the control session is fatal for the device.
pub async fn run_control_events(device: Arc<DCameraDevice>, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Connected => debug!(dh = %device.dh_base(), "Control session connected"),
            ChannelEvent::Data(bytes) => {
                let handled = match dcamera_channel::deserialize(&bytes) {
                    Ok(command) => handle_control_command(&device, &command).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = handled {
                    warn!(dh = %device.dh_base(), "Bad control message: {}", e);
                }
            }
            ChannelEvent::Error(e) => warn!(dh = %device.dh_base(), "Control session error: {}", e),
            ChannelEvent::Disconnected => {
                device
                    .notify_error(DCameraError::Transport("control session lost".into()))
                    .await;
                break;
            }
        }
    }
}
