use thiserror::Error;

use crate::device::DeviceId;
use crate::hardware::OutputKind;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

impl CameraError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Errors reported across the hardware seam.
///
/// The controller never surfaces these to callers of its public commands; they
/// are logged and the controller degrades to the previous valid configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HardwareError {
    #[error("Device {device} could not be locked for configuration")]
    LockFailed { device: DeviceId },

    #[error("Device {device} is not locked for configuration")]
    NotLocked { device: DeviceId },

    #[error("Session rejected input {device}")]
    InputRejected { device: DeviceId },

    #[error("Session rejected output {output:?}")]
    OutputRejected { output: OutputKind },

    #[error("Unsupported setting: {details}")]
    Unsupported { details: String },

    #[error("Session is not running")]
    NotRunning,

    #[error("Photo capture failed: {details}")]
    CaptureFailed { details: String },

    #[error("Movie recording failed: {details}")]
    RecordingFailed { details: String },

    #[error("Session runtime error: {details}")]
    Runtime { details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },
}

pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

pub type Result<T> = std::result::Result<T, CameraError>;
