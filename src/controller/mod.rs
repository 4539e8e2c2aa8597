//! The camera session controller.
//!
//! [`SimpleCamera`] owns the capture graph and serializes every hardware
//! mutation on its session queue. Raw frames are handled on a separate
//! frame-delivery queue, and lifecycle observers are called on the main
//! queue. Other contexts only read settled copies of the state kept in
//! `Status`.

mod builder;
mod capture;
mod delegate;
mod input;
mod lifecycle;
mod properties;
mod recording;

pub use builder::SimpleCameraBuilder;
pub use capture::{CaptureCompletion, CaptureResult};
pub use properties::MIN_ZOOM_FACTOR;
pub use recording::RECORDING_SETTLE_DELAY;

use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::config::CameraConfig;
use crate::converter::{FrameConverter, SizeLimit};
use crate::device::{DeviceId, DevicePosition, DeviceRegistry, Point};
use crate::events::{CameraEventKind, EventBus};
use crate::hardware::{CaptureBackend, CaptureSession, Observation};
use crate::observer::{
    AudioFrameObserver, CameraObserver, LifecycleEvent, ObserverHub, PublishedState,
    VideoFrameObserver,
};
use crate::orientation::{CaptureOrientation, OrientationSource};
use crate::queue::SerialQueue;
use crate::session::{CameraMode, CaptureGraph, GraphSnapshot, ModeState};

use capture::PendingCaptures;

/// Hardware objects, only touched on the session queue
struct Hardware {
    registry: DeviceRegistry,
    graph: CaptureGraph,
    observations: Vec<Observation>,
}

#[derive(Debug, Clone)]
struct ActiveRecording {
    destination: PathBuf,
    token: u64,
    writing: bool,
}

/// Settled state, written on the session queue and readable anywhere
#[derive(Debug, Clone)]
struct Status {
    configured: bool,
    modes: ModeState,
    recording: Option<ActiveRecording>,
    next_recording_token: u64,
    video_input: Option<DeviceId>,
    video_position: Option<DevicePosition>,
    zoom_factor: f64,
    device_max_zoom: Option<f64>,
    focus_point: Option<Point>,
    exposure_point: Option<Point>,
    graph: GraphSnapshot,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            configured: false,
            modes: ModeState::default(),
            recording: None,
            next_recording_token: 0,
            video_input: None,
            video_position: None,
            zoom_factor: 1.0,
            device_max_zoom: None,
            focus_point: None,
            exposure_point: None,
            graph: GraphSnapshot::default(),
        }
    }
}

/// Published values a main-queue job compares against
#[derive(Debug, Clone, Copy)]
enum PublishedChange {
    Running(bool),
    ZoomFactor(f64),
    FocusPoint(Point),
    ExposurePoint(Point),
}

struct Inner {
    backend: Arc<dyn CaptureBackend>,
    session: Arc<dyn CaptureSession>,
    session_queue: SerialQueue,
    frame_queue: SerialQueue,
    main_queue: SerialQueue,
    hardware: Mutex<Option<Hardware>>,
    status: RwLock<Status>,
    settings: RwLock<CameraConfig>,
    pending: Mutex<PendingCaptures>,
    published: Mutex<PublishedState>,
    observers: ObserverHub,
    orientation: Arc<dyn OrientationSource>,
    converter: Arc<dyn FrameConverter>,
    events: EventBus,
    settle_delay: Duration,
}

/// Handle on a camera session controller.
///
/// Cloning is cheap and every clone drives the same controller. The hardware
/// is torn down when the last handle goes away.
#[derive(Clone)]
pub struct SimpleCamera {
    inner: Arc<Inner>,
}

impl SimpleCamera {
    pub fn builder() -> SimpleCameraBuilder {
        SimpleCameraBuilder::new()
    }

    pub fn is_configured(&self) -> bool {
        self.inner.status.read().configured
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn mode(&self) -> CameraMode {
        self.inner.status.read().modes.mode
    }

    pub fn is_recording_movie(&self) -> bool {
        self.inner.status.read().modes.is_recording()
    }

    /// Copy of the capture graph as of the last committed transaction
    pub fn graph_snapshot(&self) -> GraphSnapshot {
        self.inner.status.read().graph.clone()
    }

    pub fn current_input_position(&self) -> Option<DevicePosition> {
        self.inner.status.read().video_position
    }

    pub fn is_current_input_front(&self) -> bool {
        self.current_input_position() == Some(DevicePosition::Front)
    }

    pub fn is_current_input_back(&self) -> bool {
        self.current_input_position() == Some(DevicePosition::Back)
    }

    pub fn capture_limit_size(&self) -> SizeLimit {
        self.inner.settings.read().capture_limit()
    }

    pub fn set_capture_limit_size(&self, limit: SizeLimit) {
        self.inner.settings.write().capture_limit_size = (limit.width, limit.height);
    }

    pub fn is_mirrored_image_if_front_camera(&self) -> bool {
        self.inner.settings.read().mirror_front_camera
    }

    pub fn set_mirrored_image_if_front_camera(&self, mirrored: bool) {
        self.inner.settings.write().mirror_front_camera = mirrored;
    }

    pub fn is_follow_device_orientation_when_capture(&self) -> bool {
        self.inner.settings.read().follow_device_orientation
    }

    pub fn set_follow_device_orientation_when_capture(&self, follow: bool) {
        self.inner.settings.write().follow_device_orientation = follow;
    }

    pub fn is_enabled_audio_recording(&self) -> bool {
        self.inner.settings.read().audio_recording_enabled
    }

    /// Takes effect on the next switch into movie mode.
    pub fn set_enabled_audio_recording(&self, enabled: bool) {
        self.inner.settings.write().audio_recording_enabled = enabled;
    }

    pub fn add_camera_observer(&self, observer: &Arc<dyn CameraObserver>) {
        self.inner.observers.camera.add(observer);
    }

    pub fn remove_camera_observer(&self, observer: &Arc<dyn CameraObserver>) {
        self.inner.observers.camera.remove(observer);
    }

    pub fn add_video_frame_observer(&self, observer: &Arc<dyn VideoFrameObserver>) {
        self.inner.observers.video.add(observer);
    }

    pub fn remove_video_frame_observer(&self, observer: &Arc<dyn VideoFrameObserver>) {
        self.inner.observers.video.remove(observer);
    }

    pub fn add_audio_frame_observer(&self, observer: &Arc<dyn AudioFrameObserver>) {
        self.inner.observers.audio.add(observer);
    }

    pub fn remove_audio_frame_observer(&self, observer: &Arc<dyn AudioFrameObserver>) {
        self.inner.observers.audio.remove(observer);
    }

    /// Broadcast mirror of everything the controller does
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Block until work queued so far on the session, frame-delivery and
    /// main queues has run, in that order.
    pub fn flush(&self) {
        self.inner.session_queue.barrier();
        self.inner.frame_queue.barrier();
        self.inner.main_queue.barrier();
    }
}

impl std::fmt::Debug for SimpleCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.inner.status.read();
        f.debug_struct("SimpleCamera")
            .field("configured", &status.configured)
            .field("mode", &status.modes.mode)
            .field("recording", &status.modes.is_recording())
            .field("input", &status.video_position)
            .finish()
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        self.status.read().configured && self.session.is_running()
    }

    /// Orientation for new captures: the sensor's when following the device,
    /// portrait otherwise.
    fn capture_orientation(&self) -> CaptureOrientation {
        if self.settings.read().follow_device_orientation {
            self.orientation.current_capture_orientation()
        } else {
            CaptureOrientation::Portrait
        }
    }

    /// Run `work` on the session queue and wait for its result.
    fn session_sync<R, F>(self: &Arc<Self>, work: F) -> R
    where
        F: FnOnce(&Arc<Inner>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(self);
        self.session_queue.run_sync(move || work(&inner))
    }

    /// Queue `work` on the session queue; dropped if the controller is gone.
    fn session_async<F>(self: &Arc<Self>, work: F)
    where
        F: FnOnce(&Arc<Inner>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.session_queue.run_async(move || {
            if let Some(inner) = weak.upgrade() {
                work(&inner);
            }
        });
    }

    fn on_main<F>(self: &Arc<Self>, work: F)
    where
        F: FnOnce(&SimpleCamera) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.main_queue.run_async(move || {
            if let Some(inner) = weak.upgrade() {
                work(&SimpleCamera { inner });
            }
        });
    }

    /// Fan `event` out to lifecycle observers on the main queue.
    fn notify(self: &Arc<Self>, event: LifecycleEvent, kind: CameraEventKind) {
        self.on_main(move |camera| {
            trace!("Dispatching {:?}", event);
            camera
                .inner
                .observers
                .camera
                .for_each(|observer| event.deliver(observer, camera));
            camera.inner.events.emit(kind);
        });
    }

    /// Compare `change` against the last published value on the main queue
    /// and notify observers only if it differs.
    fn publish(self: &Arc<Self>, change: PublishedChange) {
        self.on_main(move |camera| {
            let inner = &camera.inner;
            let event = {
                let mut published = inner.published.lock();
                match change {
                    PublishedChange::Running(running) => published.publish_running(running),
                    PublishedChange::ZoomFactor(zoom) => published.publish_zoom_factor(zoom),
                    PublishedChange::FocusPoint(point) => published.publish_focus_point(point),
                    PublishedChange::ExposurePoint(point) => {
                        published.publish_exposure_point(point)
                    }
                }
            };
            let Some(event) = event else {
                return;
            };
            inner
                .observers
                .camera
                .for_each(|observer| event.deliver(observer, camera));
            inner.events.emit(match change {
                PublishedChange::Running(true) => CameraEventKind::StartedRunning,
                PublishedChange::Running(false) => CameraEventKind::StoppedRunning,
                PublishedChange::ZoomFactor(zoom_factor) => {
                    CameraEventKind::ZoomFactorChanged { zoom_factor }
                }
                PublishedChange::FocusPoint(point) => CameraEventKind::FocusPointChanged { point },
                PublishedChange::ExposurePoint(point) => {
                    CameraEventKind::ExposurePointChanged { point }
                }
            });
        });
    }

    fn emit(&self, kind: CameraEventKind) {
        self.events.emit(kind);
    }

    /// Copy live hardware values into `Status`. Session queue only.
    fn refresh_status(&self, hardware: &Hardware) {
        let graph = hardware.graph.snapshot();
        let device = hardware.graph.video_input().map(|input| Arc::clone(input.device()));
        let (zoom_factor, device_max_zoom, focus_point, exposure_point) = match &device {
            Some(device) => (
                device.zoom_factor(),
                device.active_format().map(|format| format.max_zoom_factor),
                Some(device.focus_point_of_interest()),
                Some(device.exposure_point_of_interest()),
            ),
            None => (1.0, None, None, None),
        };

        let mut status = self.status.write();
        status.video_input = device.as_ref().map(|device| device.id().clone());
        status.video_position = device.as_ref().map(|device| device.position());
        status.zoom_factor = zoom_factor;
        status.device_max_zoom = device_max_zoom;
        status.focus_point = focus_point;
        status.exposure_point = exposure_point;
        status.graph = graph;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // No job can hold the controller any more, so tear down in place.
        self.teardown_hardware();
    }
}
