//! One distributed camera as seen by HAL clients

use crate::callback::{DeviceEvent, DeviceEvents, StreamOperatorEvents};
use crate::metadata::{MetadataProcessor, ResultMode};
use crate::operator::{CaptureDispatcher, DStreamOperator};
use dcamera_core::{
    CameraAbility, DCSettingsType, DCameraBuffer, DCameraError, DCameraSettings, DHBase, Result,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A registered distributed camera
pub struct DCameraDevice {
    dh_base: DHBase,
    ability: CameraAbility,
    ability_json: String,
    dispatcher: Arc<dyn CaptureDispatcher>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    operator: Mutex<Option<Arc<DStreamOperator>>>,
    metadata: Mutex<MetadataProcessor>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DCameraDevice {
    /// Create a device from the ability document its sink advertised
    pub fn new(
        dh_base: DHBase,
        ability_json: &str,
        dispatcher: Arc<dyn CaptureDispatcher>,
    ) -> Result<(Arc<Self>, DeviceEvents)> {
        let ability = CameraAbility::parse(ability_json)?;
        let (events, rx) = mpsc::unbounded_channel();
        let device = Arc::new(Self {
            dh_base,
            ability,
            ability_json: ability_json.to_string(),
            dispatcher,
            events,
            operator: Mutex::new(None),
            metadata: Mutex::new(MetadataProcessor::new()),
        });
        Ok((device, rx))
    }

    pub fn dh_base(&self) -> &DHBase {
        &self.dh_base
    }

    pub fn camera_id(&self) -> String {
        self.dh_base.camera_id()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.operator).is_some()
    }

    /// Ability document as advertised by the sink
    pub fn get_dcamera_ability(&self) -> &str {
        &self.ability_json
    }

    pub fn ability(&self) -> &CameraAbility {
        &self.ability
    }

    fn operator(&self) -> Result<Arc<DStreamOperator>> {
        lock(&self.operator)
            .clone()
            .ok_or_else(|| DCameraError::WrongState(format!("camera {} is not open", self.dh_base)))
    }

    /// Open the camera, returning its stream operator
    pub fn open_dcamera(&self) -> Result<(Arc<DStreamOperator>, StreamOperatorEvents)> {
        let mut slot = lock(&self.operator);
        if slot.is_some() {
            return Err(DCameraError::Busy(format!("camera {} already open", self.dh_base)));
        }
        let (operator, events) = DStreamOperator::new(
            self.dh_base.clone(),
            self.ability.clone(),
            self.dispatcher.clone(),
        );
        *slot = Some(operator.clone());
        info!(dh = %self.dh_base, "Camera opened");
        Ok((operator, events))
    }

    /// Release the stream operator; closing a closed camera is a no-op
    pub async fn close(&self) {
        let operator = lock(&self.operator).take();
        if let Some(operator) = operator {
            operator.release().await;
            lock(&self.metadata).reset();
            info!(dh = %self.dh_base, "Camera closed");
        }
    }

    /// Push encoded camera settings to the sink
    pub async fn update_settings(&self, settings: &[u8]) -> Result<()> {
        self.operator()?;
        if settings.is_empty() {
            return Err(DCameraError::InvalidArgument("empty settings".into()));
        }
        let settings = vec![DCameraSettings {
            setting_type: DCSettingsType::UpdateMetadata,
            value: hex::encode(settings),
        }];
        self.dispatcher.update_settings(&self.dh_base, settings).await
    }

    pub fn set_result_mode(&self, mode: ResultMode) {
        lock(&self.metadata).set_result_mode(mode);
    }

    pub fn get_enabled_results(&self) -> Vec<u32> {
        lock(&self.metadata).enabled_results()
    }

    pub fn enable_result(&self, tags: &[u32]) -> Result<()> {
        lock(&self.metadata).enable_results(tags)
    }

    pub fn disable_result(&self, tags: &[u32]) -> Result<()> {
        lock(&self.metadata).disable_results(tags)
    }

    /// Handle settings reported back by the sink
    ///
    /// `METADATA_RESULT` values are JSON objects of tag → hex-encoded value.
    pub fn on_settings_result(&self, settings: &DCameraSettings) -> Result<()> {
        if settings.setting_type != DCSettingsType::MetadataResult {
            debug!(kind = ?settings.setting_type, "Ignoring settings result");
            return Ok(());
        }
        let encoded: BTreeMap<u32, String> = serde_json::from_str(&settings.value)?;
        let decoded = encoded
            .into_iter()
            .map(|(tag, value)| {
                hex::decode(&value)
                    .map(|bytes| (tag, bytes))
                    .map_err(|e| DCameraError::InvalidArgument(format!("result tag {}: {}", tag, e)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let results = {
            let mut metadata = lock(&self.metadata);
            metadata.save_results(&decoded);
            metadata.update_results()
        };
        if !results.is_empty() {
            let _ = self.events.send(DeviceEvent::MetadataResult {
                timestamp: now_micros(),
                results,
            });
        }
        Ok(())
    }

    /// Report a fatal error to the client and close the camera
    pub async fn notify_error(&self, error: DCameraError) {
        error!(dh = %self.dh_base, "Camera error: {}", error);
        if let Ok(operator) = self.operator() {
            operator.notify_capture_error(error.clone()).await;
        }
        if self.events.send(DeviceEvent::Error(error)).is_err() {
            warn!(dh = %self.dh_base, "Device listener gone");
        }
        self.close().await;
    }

    pub fn acquire_buffer(&self, stream_id: i32) -> Result<DCameraBuffer> {
        self.operator()?.acquire_buffer(stream_id)
    }

    pub fn shutter_buffer(&self, stream_id: i32, buffer: DCameraBuffer) -> Result<()> {
        self.operator()?.shutter_buffer(stream_id, buffer)
    }
}

impl std::fmt::Debug for DCameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DCameraDevice")
            .field("dh_base", &self.dh_base)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}
