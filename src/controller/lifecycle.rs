//! Configure, start/stop, mode switching and teardown

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::delegate::{observe_device, DelegateBridge};
use super::{Hardware, Inner, SimpleCamera, Status};
use crate::device::{
    select_best_format, with_device_lock, AspectRatio, DeviceInput, DevicePosition, DeviceRegistry,
};
use crate::events::CameraEventKind;
use crate::hardware::{ConnectionSettings, OutputKind, SessionDelegate};
use crate::session::{CameraMode, CaptureGraph};

impl SimpleCamera {
    /// Discover devices and build the initial capture graph in photo mode.
    ///
    /// Idempotent; returns whether the controller is configured.
    pub fn configure(&self) -> bool {
        if self.is_configured() {
            return true;
        }

        let configured = self.inner.session_sync(|inner| inner.build_graph());
        if !configured {
            return false;
        }

        // Format selection runs as its own session job.
        self.set_photo_mode();

        self.inner.session_sync(|inner| inner.attach_observers());
        info!("Camera controller configured");
        true
    }

    /// Configure if needed, then start the session.
    ///
    /// Starting is asynchronous: observers see `did_start_running` once the
    /// hardware reports it.
    pub fn start_running(&self) {
        if !self.configure() {
            warn!("Cannot start: controller is not configured");
            return;
        }
        if self.is_running() {
            return;
        }

        self.inner.orientation.start();
        self.inner.session_async(|inner| {
            inner.session.start_running();
            let guard = inner.hardware.lock();
            if let Some(hardware) = guard.as_ref() {
                inner.reset_zoom(hardware);
                inner.reset_focus_and_exposure(hardware);
                inner.refresh_status(hardware);
            }
        });
    }

    pub fn stop_running(&self) {
        if !self.is_configured() {
            return;
        }
        if self.is_running() {
            self.inner.session_async(|inner| inner.session.stop_running());
            self.inner.orientation.stop();
        }
    }

    /// Switch to photo mode (4:3 formats, photo preset).
    ///
    /// No-op while recording or when already in photo mode.
    pub fn set_photo_mode(&self) {
        self.inner.session_sync(|inner| inner.apply_mode(CameraMode::Photo));
    }

    /// Switch to movie mode (16:9 formats, high preset).
    ///
    /// No-op while recording or when already in movie mode.
    pub fn set_movie_mode(&self) {
        self.inner.session_sync(|inner| inner.apply_mode(CameraMode::Movie));
    }

    /// Detach everything and forget the devices.
    ///
    /// Outstanding capture requests are dropped without their completions
    /// being called. The controller can be configured again afterwards.
    pub fn teardown(&self) {
        self.inner.session_sync(|inner| inner.teardown_hardware());
    }
}

impl Inner {
    /// Discover devices and attach the photo, raw video and raw audio
    /// outputs plus a camera input in one transaction.
    fn build_graph(&self) -> bool {
        let mut guard = self.hardware.lock();
        if guard.is_some() {
            return true;
        }

        let registry = DeviceRegistry::discover(Arc::clone(&self.backend));
        let mut graph = CaptureGraph::new(Arc::clone(&self.session));
        {
            let mut tx = graph.transaction();
            for output in [OutputKind::Photo, OutputKind::VideoData, OutputKind::AudioData] {
                if !tx.add_output(output) {
                    warn!("{:?} output unavailable", output);
                }
            }

            let attached = [DevicePosition::Back, DevicePosition::Front]
                .into_iter()
                .filter_map(|position| registry.camera(position))
                .any(|input| tx.add_input(input));
            if !attached {
                warn!("No camera input could be attached");
            }

            for output in [OutputKind::Photo, OutputKind::VideoData] {
                tx.set_connection(output, ConnectionSettings::default());
            }
        }

        let hardware = Hardware {
            registry,
            graph,
            observations: Vec::new(),
        };
        self.refresh_status(&hardware);
        *guard = Some(hardware);
        self.status.write().configured = true;
        true
    }

    /// Subscribe to camera property changes and session events.
    fn attach_observers(self: &Arc<Self>) {
        let mut guard = self.hardware.lock();
        let Some(hardware) = guard.as_mut() else {
            return;
        };
        hardware.observations = hardware
            .registry
            .cameras()
            .map(|input| observe_device(self, input))
            .collect();
        let bridge: Arc<dyn SessionDelegate> = Arc::new(DelegateBridge::new(self));
        self.session.set_delegate(Some(bridge));
        debug!("Observing {} camera devices", hardware.observations.len());
    }

    fn apply_mode(self: &Arc<Self>, target: CameraMode) {
        let mut guard = self.hardware.lock();
        let Some(hardware) = guard.as_mut() else {
            return;
        };
        {
            let status = self.status.read();
            if !status.configured || !status.modes.can_switch_to(target) {
                debug!("Mode switch to {:?} skipped", target);
                return;
            }
        }

        let audio_input = if target == CameraMode::Movie
            && self.settings.read().audio_recording_enabled
        {
            hardware.registry.audio_input()
        } else {
            None
        };

        let Hardware {
            registry, graph, ..
        } = &mut *hardware;
        {
            let mut tx = graph.transaction();
            match target {
                CameraMode::Photo => {
                    tx.remove_output(OutputKind::MovieFile);
                    tx.remove_audio_input();
                }
                CameraMode::Movie => {
                    if let Some(audio) = &audio_input {
                        if tx.graph().audio_input().is_none() {
                            tx.add_input(audio);
                        }
                    }
                }
                CameraMode::Unknown => {}
            }

            if let Some(preset) = target.preset() {
                tx.set_preset(preset);
            }
            if let Some(aspect) = target.target_aspect() {
                for camera in registry.cameras() {
                    apply_best_format(camera, aspect);
                }
            }
        }

        self.status.write().modes.switch_to(target);
        info!("Switched to {:?} mode", target);

        self.reset_zoom(hardware);
        self.reset_focus_and_exposure(hardware);
        self.refresh_status(hardware);
        self.emit(CameraEventKind::ModeChanged { mode: target });
    }

    /// Stop the session and detach every output and input. Session queue
    /// only, or from `Drop` once nothing else can reach the controller.
    pub(super) fn teardown_hardware(&self) {
        self.pending.lock().clear();

        let Some(mut hardware) = self.hardware.lock().take() else {
            return;
        };
        self.session.set_delegate(None);
        hardware.observations.clear();

        if self.session.is_running() {
            self.session.stop_running();
        }
        hardware.graph.transaction().clear();
        self.orientation.stop();

        *self.status.write() = Status::default();
        info!("Camera controller torn down");
    }
}

/// Give `camera` its best format for `aspect`, if it has one.
fn apply_best_format(camera: &DeviceInput, aspect: AspectRatio) {
    let device = camera.device();
    let Some(format) = select_best_format(&device.formats(), aspect) else {
        warn!("{} has no {:?} format", camera.id(), aspect);
        return;
    };
    if device.active_format().as_ref() == Some(&format) {
        return;
    }
    match with_device_lock(device.as_ref(), |device| device.set_active_format(&format)) {
        Ok(()) => debug!("{} now uses {}", camera.id(), format),
        Err(e) => warn!("Failed to set {} format on {}: {}", format, camera.id(), e),
    }
}
