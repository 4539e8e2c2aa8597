use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{DeviceFormat, DeviceId, DeviceKind, DevicePosition, DeviceType};
use crate::hardware::{CaptureBackend, CaptureDevice};

/// Back cameras in order of preference
pub const BACK_CAMERA_PREFERENCE: [DeviceType; 4] = [
    DeviceType::TripleCamera,
    DeviceType::DualCamera,
    DeviceType::DualWideCamera,
    DeviceType::WideAngleCamera,
];

/// Typed handle on a physical device, owned by the [`DeviceRegistry`]
#[derive(Debug, Clone)]
pub struct DeviceInput {
    device: Arc<dyn CaptureDevice>,
}

impl DeviceInput {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self { device }
    }

    pub fn id(&self) -> &DeviceId {
        self.device.id()
    }

    pub fn position(&self) -> DevicePosition {
        self.device.position()
    }

    pub fn kind(&self) -> DeviceKind {
        self.device.kind()
    }

    pub fn active_format(&self) -> Option<DeviceFormat> {
        self.device.active_format()
    }

    pub fn device(&self) -> &Arc<dyn CaptureDevice> {
        &self.device
    }

    pub fn is_video(&self) -> bool {
        self.kind() == DeviceKind::Camera
    }
}

/// The physical inputs available to the controller.
///
/// Cameras are discovered up front; the microphone is only looked up the
/// first time it is requested.
pub struct DeviceRegistry {
    backend: Arc<dyn CaptureBackend>,
    front: Option<DeviceInput>,
    back: Option<DeviceInput>,
    audio: Option<DeviceInput>,
}

impl DeviceRegistry {
    pub fn discover(backend: Arc<dyn CaptureBackend>) -> Self {
        let back = BACK_CAMERA_PREFERENCE.iter().find_map(|device_type| {
            backend.default_device(DeviceKind::Camera, Some(*device_type), DevicePosition::Back)
        });
        let front = backend.default_device(
            DeviceKind::Camera,
            Some(DeviceType::WideAngleCamera),
            DevicePosition::Front,
        );

        match &back {
            Some(device) => info!("Back camera: {} ({:?})", device.name(), device.device_type()),
            None => warn!("No back camera available"),
        }
        match &front {
            Some(device) => info!("Front camera: {}", device.name()),
            None => warn!("No front camera available"),
        }

        Self {
            backend,
            front: front.map(DeviceInput::new),
            back: back.map(DeviceInput::new),
            audio: None,
        }
    }

    pub fn camera(&self, position: DevicePosition) -> Option<&DeviceInput> {
        match position {
            DevicePosition::Front => self.front.as_ref(),
            DevicePosition::Back => self.back.as_ref(),
            DevicePosition::Unspecified => None,
        }
    }

    pub fn cameras(&self) -> impl Iterator<Item = &DeviceInput> {
        self.back.iter().chain(self.front.iter())
    }

    /// Microphone input, discovered on first use
    pub fn audio_input(&mut self) -> Option<DeviceInput> {
        if self.audio.is_none() {
            self.audio = self
                .backend
                .default_device(DeviceKind::Microphone, None, DevicePosition::Unspecified)
                .map(DeviceInput::new);
            match &self.audio {
                Some(input) => debug!("Audio input discovered: {}", input.id()),
                None => warn!("No microphone available"),
            }
        }
        self.audio.clone()
    }

    pub fn lookup(&self, id: &DeviceId) -> Option<&DeviceInput> {
        self.cameras()
            .chain(self.audio.iter())
            .find(|input| input.id() == id)
    }
}
