//! Capture hardware abstraction
//!
//! The controller never talks to a camera stack directly. Everything it needs
//! from the platform is expressed by the traits below:
//!
//! ```text
//! ┌──────────────────────┐
//! │ SimpleCamera         │  ← serializes all mutations on the session queue
//! └──────────┬───────────┘
//!            │ CaptureBackend / CaptureSession / CaptureDevice
//!            ▼
//! ┌──────────────────────┐
//! │ Platform hardware    │  ← VirtualBackend in this crate
//! └──────────┬───────────┘
//!            │ SessionDelegate + property Observations
//!            ▼
//!     hardware-driven events
//! ```

pub mod virtual_backend;

pub use virtual_backend::{VirtualBackend, VirtualDevice, VirtualDeviceSpec, VirtualSession};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::device::{
    DeviceFormat, DeviceId, DeviceKind, DevicePosition, DeviceType, ExposureMode, FocusMode, Point,
};
use crate::error::{HardwareError, HardwareResult};
use crate::frame::{AudioBuffer, FrameBuffer, Photo};
use crate::orientation::CaptureOrientation;

/// Outputs a capture session can feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    /// Still photo output
    Photo,
    /// Raw video frames (sample buffer delegate)
    VideoData,
    /// Raw audio samples
    AudioData,
    /// Movie file writer
    MovieFile,
}

/// Session-wide quality presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPreset {
    Photo,
    High,
}

/// Per-output connection configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub orientation: CaptureOrientation,
    pub scale_and_crop: f64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            orientation: CaptureOrientation::Portrait,
            scale_and_crop: 1.0,
        }
    }
}

/// Why the session was interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionReason {
    VideoDeviceNotAvailableInBackground,
    AudioDeviceInUseByAnotherClient,
    VideoDeviceInUseByAnotherClient,
    VideoDeviceNotAvailableWithMultipleForegroundApps,
    VideoDeviceNotAvailableDueToSystemPressure,
}

/// Device property changes reported through [`CaptureDevice::observe`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyChange {
    ZoomFactor(f64),
    FocusPointOfInterest(Point),
    ExposurePointOfInterest(Point),
    AdjustingFocus(bool),
    AdjustingExposure(bool),
    AdjustingWhiteBalance(bool),
}

pub type PropertyObserver = Arc<dyn Fn(&DeviceId, PropertyChange) + Send + Sync>;

/// Subscription token; the subscription ends when the token is dropped.
#[must_use = "dropping an Observation ends the subscription"]
pub struct Observation {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Observation {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A token for sources that never emit
    pub fn empty() -> Self {
        Self { cancel: None }
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A physical capture device (camera or microphone).
///
/// Mutating calls are only valid between `lock_for_configuration` and
/// `unlock_for_configuration`; use [`crate::device::DeviceLock`] rather than
/// calling these directly.
pub trait CaptureDevice: Send + Sync + fmt::Debug {
    fn id(&self) -> &DeviceId;
    fn name(&self) -> &str;
    fn position(&self) -> DevicePosition;
    fn kind(&self) -> DeviceKind;
    fn device_type(&self) -> DeviceType;

    fn formats(&self) -> Vec<DeviceFormat>;
    fn active_format(&self) -> Option<DeviceFormat>;

    fn lock_for_configuration(&self) -> HardwareResult<()>;
    fn unlock_for_configuration(&self);

    fn set_active_format(&self, format: &DeviceFormat) -> HardwareResult<()>;

    fn zoom_factor(&self) -> f64;
    fn set_zoom_factor(&self, factor: f64) -> HardwareResult<()>;

    fn focus_point_of_interest(&self) -> Point;
    fn focus_mode(&self) -> FocusMode;
    fn supports_focus_point_of_interest(&self) -> bool;
    fn supports_focus_mode(&self, mode: FocusMode) -> bool;
    fn set_focus(&self, point: Point, mode: FocusMode) -> HardwareResult<()>;

    fn exposure_point_of_interest(&self) -> Point;
    fn exposure_mode(&self) -> ExposureMode;
    fn supports_exposure_point_of_interest(&self) -> bool;
    fn supports_exposure_mode(&self, mode: ExposureMode) -> bool;
    fn set_exposure(&self, point: Point, mode: ExposureMode) -> HardwareResult<()>;

    fn subject_area_change_monitoring(&self) -> bool;
    fn set_subject_area_change_monitoring(&self, enabled: bool) -> HardwareResult<()>;

    /// Subscribe to property changes; events fire on the mutating thread.
    fn observe(&self, observer: PropertyObserver) -> Observation;
}

/// The hardware session the capture graph is built on
pub trait CaptureSession: Send + Sync {
    fn begin_configuration(&self);
    fn commit_configuration(&self);

    fn can_add_input(&self, device: &dyn CaptureDevice) -> bool;
    fn add_input(&self, device: Arc<dyn CaptureDevice>) -> HardwareResult<()>;
    fn remove_input(&self, device: &DeviceId);

    fn can_add_output(&self, output: OutputKind) -> bool;
    fn add_output(&self, output: OutputKind) -> HardwareResult<()>;
    fn remove_output(&self, output: OutputKind);

    fn can_set_preset(&self, preset: SessionPreset) -> bool;
    fn set_preset(&self, preset: SessionPreset) -> HardwareResult<()>;

    /// Apply connection settings to an attached output
    fn set_connection(&self, output: OutputKind, settings: ConnectionSettings) -> HardwareResult<()>;

    fn start_running(&self);
    fn stop_running(&self);
    fn is_running(&self) -> bool;

    /// Trigger a still capture; the result arrives via
    /// [`SessionDelegate::photo_processed`].
    fn capture_photo(&self) -> HardwareResult<()>;

    fn start_recording(&self, destination: &Path) -> HardwareResult<()>;
    fn stop_recording(&self);

    fn set_delegate(&self, delegate: Option<Arc<dyn SessionDelegate>>);
}

/// Hardware-driven events. Implementations may call these from any thread.
pub trait SessionDelegate: Send + Sync {
    fn running_changed(&self, running: bool);
    fn subject_area_changed(&self, device: &DeviceId);
    fn runtime_error(&self, error: HardwareError);
    fn interrupted(&self, reason: InterruptionReason);
    fn interruption_ended(&self);
    fn video_frame(&self, frame: FrameBuffer);
    fn video_frame_dropped(&self, frame: FrameBuffer);
    fn audio_samples(&self, samples: AudioBuffer);
    fn photo_processed(&self, result: HardwareResult<Photo>);
    fn photo_capture_finished(&self);
    fn recording_finished(&self, destination: PathBuf, error: Option<HardwareError>);
}

/// Device discovery and session construction
pub trait CaptureBackend: Send + Sync {
    fn devices(&self) -> Vec<Arc<dyn CaptureDevice>>;

    /// First device matching the given kind, type and position
    fn default_device(
        &self,
        kind: DeviceKind,
        device_type: Option<DeviceType>,
        position: DevicePosition,
    ) -> Option<Arc<dyn CaptureDevice>> {
        self.devices().into_iter().find(|device| {
            device.kind() == kind
                && device.position() == position
                && device_type.map_or(true, |t| device.device_type() == t)
        })
    }

    fn create_session(&self) -> Arc<dyn CaptureSession>;
}
