use tracing::{debug, info, warn};

use super::SimpleCamera;
use crate::device::DevicePosition;
use crate::events::CameraEventKind;
use crate::hardware::OutputKind;
use crate::observer::LifecycleEvent;
use crate::orientation::CaptureOrientation;

impl SimpleCamera {
    /// Swap the video input to the camera at `position`.
    ///
    /// Returns false while recording, when that camera is already active or
    /// missing, or when the hardware rejects it (the previous input stays).
    pub fn switch_camera_input_to(&self, position: DevicePosition) -> bool {
        self.inner.session_sync(move |inner| {
            let mut guard = inner.hardware.lock();
            let Some(hardware) = guard.as_mut() else {
                return false;
            };
            {
                let status = inner.status.read();
                if !status.configured || status.modes.is_recording() {
                    debug!("Input switch to {:?} not allowed now", position);
                    return false;
                }
                if status.video_position.is_none() || status.video_position == Some(position) {
                    return false;
                }
            }
            let Some(target) = hardware.registry.camera(position).cloned() else {
                warn!("No {:?} camera to switch to", position);
                return false;
            };

            let switched = {
                let mut tx = hardware.graph.transaction();
                let switched = tx.switch_video_input(&target);
                if switched {
                    tx.set_orientation(OutputKind::VideoData, CaptureOrientation::Portrait);
                }
                switched
            };
            inner.refresh_status(hardware);
            if !switched {
                warn!("Hardware rejected {:?} camera {}", position, target.id());
                return false;
            }

            info!("Switched to {:?} camera {}", position, target.id());
            inner.notify(
                LifecycleEvent::CameraInputSwitched,
                CameraEventKind::CameraInputSwitched { position },
            );
            inner.reset_zoom(hardware);
            inner.reset_focus_and_exposure(hardware);
            true
        })
    }

    pub fn switch_camera_input_to_front(&self) -> bool {
        self.switch_camera_input_to(DevicePosition::Front)
    }

    pub fn switch_camera_input_to_back(&self) -> bool {
        self.switch_camera_input_to(DevicePosition::Back)
    }

    /// Toggle between the front and back cameras
    pub fn switch_camera_input(&self) -> bool {
        match self.current_input_position() {
            Some(DevicePosition::Front) => self.switch_camera_input_to_back(),
            Some(DevicePosition::Back) => self.switch_camera_input_to_front(),
            _ => false,
        }
    }
}
