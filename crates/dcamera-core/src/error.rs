//! Error types for the distributed camera data path

use thiserror::Error;

/// Result type for distributed camera operations
pub type Result<T> = std::result::Result<T, DCameraError>;

/// Distributed camera error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DCameraError {
    /// Malformed or out-of-range input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation rejected while the camera is capturing
    #[error("Camera busy: {0}")]
    Busy(String),

    /// Operation not allowed in the current state
    #[error("Wrong state: {0}")]
    WrongState(String),

    /// Referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Pool, queue or device table is full
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transport send/receive failure, safe to retry
    #[error("Transport error: {0}")]
    Transport(String),

    /// Codec or device failure, the owner must close
    #[error("Device error: {0}")]
    Device(String),

    /// Wire protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation is not supported by a distributed camera
    #[error("Method not supported: {0}")]
    MethodNotSupported(String),
}

/// Coarse error taxonomy used to pick a recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Never retried
    InvalidArgument,
    /// Retry after a state transition
    WrongState,
    /// Back off
    ResourceExhausted,
    /// Retried internally
    Transient,
    /// Reported to the device owner
    Fatal,
}

impl DCameraError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DCameraError::InvalidArgument(_)
            | DCameraError::NotFound(_)
            | DCameraError::Protocol(_)
            | DCameraError::Serialization(_)
            | DCameraError::MethodNotSupported(_) => ErrorKind::InvalidArgument,
            DCameraError::Busy(_) | DCameraError::WrongState(_) => ErrorKind::WrongState,
            DCameraError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            DCameraError::Transport(_) => ErrorKind::Transient,
            DCameraError::Device(_) => ErrorKind::Fatal,
        }
    }

    /// HAL result code for this error
    pub fn hal_code(&self) -> i32 {
        match self {
            DCameraError::Busy(_) => status_codes::CAMERA_BUSY,
            DCameraError::InvalidArgument(_)
            | DCameraError::NotFound(_)
            | DCameraError::Protocol(_)
            | DCameraError::Serialization(_) => status_codes::INVALID_ARGUMENT,
            DCameraError::MethodNotSupported(_) => status_codes::METHOD_NOT_SUPPORTED,
            DCameraError::Transport(_) => status_codes::CAMERA_OFFLINE,
            DCameraError::ResourceExhausted(_) => status_codes::EXCEED_MAX_NUMBER,
            DCameraError::WrongState(_) => status_codes::DEVICE_NOT_INIT,
            DCameraError::Device(_) => status_codes::FAILED,
        }
    }

    /// Whether the operation may succeed if repeated unchanged
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Map an operation result onto a HAL result code
pub fn to_hal_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => status_codes::SUCCESS,
        Err(e) => e.hal_code(),
    }
}

impl From<serde_json::Error> for DCameraError {
    fn from(err: serde_json::Error) -> Self {
        DCameraError::Serialization(err.to_string())
    }
}

/// HAL result codes
pub mod status_codes {
    pub const SUCCESS: i32 = 0;
    pub const CAMERA_BUSY: i32 = 1;
    pub const INVALID_ARGUMENT: i32 = 2;
    pub const METHOD_NOT_SUPPORTED: i32 = 3;
    pub const CAMERA_OFFLINE: i32 = 4;
    pub const EXCEED_MAX_NUMBER: i32 = 5;
    pub const DEVICE_NOT_INIT: i32 = 6;
    pub const FAILED: i32 = 7;
}
