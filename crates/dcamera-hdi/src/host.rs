//! Registry of distributed cameras and the buffer provider surface

use crate::callback::DeviceEvents;
use crate::device::DCameraDevice;
use crate::operator::CaptureDispatcher;
use dcamera_core::{DCameraBuffer, DCameraError, DHBase, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Maximum number of cameras one host registers
pub const MAX_DCAMERAS_NUMBER: usize = 32;

/// Where frame producers get buffers from and return them to
pub trait BufferProvider: Send + Sync {
    fn acquire_buffer(&self, dh_base: &DHBase, stream_id: i32) -> Result<DCameraBuffer>;

    fn shutter_buffer(
        &self,
        dh_base: &DHBase,
        stream_id: i32,
        buffer: DCameraBuffer,
    ) -> Result<()>;
}

/// Registry of the cameras exposed to HAL clients
pub struct DCameraHost {
    devices: RwLock<HashMap<DHBase, Arc<DCameraDevice>>>,
    max_devices: usize,
}

impl Default for DCameraHost {
    fn default() -> Self {
        Self::new(MAX_DCAMERAS_NUMBER)
    }
}

impl DCameraHost {
    /// Create a new host with the given capacity
    pub fn new(max_devices: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            max_devices,
        }
    }

    /// Register a camera from its advertised ability document
    pub fn add_dcamera_device(
        &self,
        dh_base: DHBase,
        ability_json: &str,
        dispatcher: Arc<dyn CaptureDispatcher>,
    ) -> Result<(Arc<DCameraDevice>, DeviceEvents)> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if devices.contains_key(&dh_base) {
            return Err(DCameraError::InvalidArgument(format!(
                "camera {} already registered",
                dh_base
            )));
        }
        if devices.len() >= self.max_devices {
            return Err(DCameraError::ResourceExhausted(format!(
                "host holds {} cameras",
                self.max_devices
            )));
        }

        let (device, events) = DCameraDevice::new(dh_base.clone(), ability_json, dispatcher)?;
        devices.insert(dh_base.clone(), device.clone());
        info!(dh = %dh_base, camera_id = %device.camera_id(), "Camera registered");
        Ok((device, events))
    }

    /// Unregister a camera, closing it first
    pub async fn remove_dcamera_device(&self, dh_base: &DHBase) -> Result<()> {
        let device = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dh_base)
            .ok_or_else(|| DCameraError::NotFound(format!("camera {}", dh_base)))?;
        device.close().await;
        info!(dh = %dh_base, "Camera unregistered");
        Ok(())
    }

    /// Camera ids of every registered camera, sorted
    pub fn get_camera_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|device| device.camera_id())
            .collect();
        ids.sort();
        ids
    }

    pub fn get_device(&self, dh_base: &DHBase) -> Result<Arc<DCameraDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dh_base)
            .cloned()
            .ok_or_else(|| DCameraError::NotFound(format!("camera {}", dh_base)))
    }

    /// Look a camera up by the id HAL clients know it by
    pub fn get_device_by_camera_id(&self, camera_id: &str) -> Result<Arc<DCameraDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|device| device.camera_id() == camera_id)
            .cloned()
            .ok_or_else(|| DCameraError::InvalidArgument(format!("unknown camera {}", camera_id)))
    }

    pub fn get_camera_ability(&self, camera_id: &str) -> Result<String> {
        Ok(self.get_device_by_camera_id(camera_id)?.get_dcamera_ability().to_string())
    }

    /// Number of registered cameras
    pub fn count(&self) -> usize {
        self.devices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Route a fatal error to the camera it belongs to
    pub async fn notify_dcamera_error(&self, dh_base: &DHBase, error: DCameraError) -> Result<()> {
        let device = self.get_device(dh_base)?;
        warn!(dh = %dh_base, "Reporting camera error");
        device.notify_error(error).await;
        Ok(())
    }
}

impl BufferProvider for DCameraHost {
    fn acquire_buffer(&self, dh_base: &DHBase, stream_id: i32) -> Result<DCameraBuffer> {
        self.get_device(dh_base)?.acquire_buffer(stream_id)
    }

    fn shutter_buffer(
        &self,
        dh_base: &DHBase,
        stream_id: i32,
        buffer: DCameraBuffer,
    ) -> Result<()> {
        self.get_device(dh_base)?.shutter_buffer(stream_id, buffer)
    }
}
