//! Distributed hardware identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one distributed camera: the remote device plus its hardware id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DHBase {
    pub device_id: String,
    pub dh_id: String,
}

impl DHBase {
    pub fn new(device_id: impl Into<String>, dh_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            dh_id: dh_id.into(),
        }
    }

    /// Camera id exposed to HAL clients
    pub fn camera_id(&self) -> String {
        format!("{}__{}", self.device_id, self.dh_id)
    }
}

impl fmt::Display for DHBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.dh_id)
    }
}
