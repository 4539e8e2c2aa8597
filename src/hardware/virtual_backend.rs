//! In-memory capture hardware.
//!
//! Behaves like a single-session camera stack: devices enforce the
//! configuration lock, the session enforces one video input and one audio
//! input, and every asynchronous result (photos, finished recordings) is
//! delivered to the registered [`SessionDelegate`] from a worker thread.
//! Tests drive it through the `emit_*` / `simulate_*` helpers.

use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

use super::{
    CaptureBackend, CaptureDevice, CaptureSession, ConnectionSettings, InterruptionReason,
    Observation, OutputKind, PropertyChange, PropertyObserver, SessionDelegate, SessionPreset,
};
use crate::device::{
    DeviceFormat, DeviceId, DeviceKind, DevicePosition, DeviceType, ExposureMode, FocusMode, Point,
};
use crate::error::{HardwareError, HardwareResult};
use crate::frame::{AudioBuffer, CaptureMetadata, FrameBuffer, PixelFormat, Photo};
use crate::orientation::CaptureOrientation;

/// Frame geometry emitted by the virtual session (kept small for tests)
pub const DEFAULT_FRAME_SIZE: (u32, u32) = (64, 48);

const PHOTO_LATENCY: Duration = Duration::from_millis(5);
const JPEG_QUALITY: u8 = 90;

/// Static description of a virtual device
#[derive(Debug, Clone)]
pub struct VirtualDeviceSpec {
    pub id: String,
    pub name: String,
    pub position: DevicePosition,
    pub kind: DeviceKind,
    pub device_type: DeviceType,
    pub formats: Vec<DeviceFormat>,
    pub supports_focus_point: bool,
    pub supports_exposure_point: bool,
    pub focus_modes: Vec<FocusMode>,
    pub exposure_modes: Vec<ExposureMode>,
}

fn camera_formats(max_zoom_factor: f64) -> Vec<DeviceFormat> {
    use PixelFormat::*;
    vec![
        DeviceFormat::new(640, 480, Yuv420VideoRange, 58.0, max_zoom_factor),
        DeviceFormat::new(1920, 1440, Yuv420VideoRange, 69.6, max_zoom_factor),
        DeviceFormat::new(4032, 3024, Yuv420VideoRange, 69.6, max_zoom_factor),
        DeviceFormat::new(4032, 3024, Yuv420FullRange, 69.6, max_zoom_factor),
        DeviceFormat::new(1280, 720, Yuv420VideoRange, 58.0, max_zoom_factor),
        DeviceFormat::new(1920, 1080, Yuv420VideoRange, 69.4, max_zoom_factor),
        DeviceFormat::new(3840, 2160, Yuv420VideoRange, 69.4, max_zoom_factor),
        DeviceFormat::new(1920, 1080, Bgra32, 70.0, max_zoom_factor),
    ]
}

impl VirtualDeviceSpec {
    pub fn back_camera(id: &str, device_type: DeviceType) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Back {:?}", device_type),
            position: DevicePosition::Back,
            kind: DeviceKind::Camera,
            device_type,
            formats: camera_formats(10.0),
            supports_focus_point: true,
            supports_exposure_point: true,
            focus_modes: vec![
                FocusMode::Locked,
                FocusMode::AutoFocus,
                FocusMode::ContinuousAutoFocus,
            ],
            exposure_modes: vec![
                ExposureMode::Locked,
                ExposureMode::AutoExpose,
                ExposureMode::ContinuousAutoExposure,
            ],
        }
    }

    pub fn front_camera(id: &str) -> Self {
        Self {
            name: "Front Camera".to_string(),
            position: DevicePosition::Front,
            device_type: DeviceType::WideAngleCamera,
            formats: camera_formats(4.0),
            ..Self::back_camera(id, DeviceType::WideAngleCamera)
        }
    }

    pub fn microphone(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: "Microphone".to_string(),
            position: DevicePosition::Unspecified,
            kind: DeviceKind::Microphone,
            device_type: DeviceType::Microphone,
            formats: Vec::new(),
            supports_focus_point: false,
            supports_exposure_point: false,
            focus_modes: Vec::new(),
            exposure_modes: Vec::new(),
        }
    }

    pub fn with_max_zoom(mut self, max_zoom_factor: f64) -> Self {
        for format in &mut self.formats {
            format.max_zoom_factor = max_zoom_factor;
        }
        self
    }

    pub fn with_formats(mut self, formats: Vec<DeviceFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Device without point-of-interest support (fixed-focus modules)
    pub fn without_point_of_interest(mut self) -> Self {
        self.supports_focus_point = false;
        self.supports_exposure_point = false;
        self
    }

    pub fn with_focus_modes(mut self, modes: Vec<FocusMode>) -> Self {
        self.focus_modes = modes;
        self
    }

    pub fn with_exposure_modes(mut self, modes: Vec<ExposureMode>) -> Self {
        self.exposure_modes = modes;
        self
    }
}

#[derive(Debug)]
struct DeviceState {
    active_format: Option<DeviceFormat>,
    locked: bool,
    zoom_factor: f64,
    focus_point: Point,
    focus_mode: FocusMode,
    exposure_point: Point,
    exposure_mode: ExposureMode,
    subject_area_monitoring: bool,
    lock_count: u64,
    format_changes: u64,
}

type ObserverList = Arc<Mutex<Vec<(u64, PropertyObserver)>>>;

pub struct VirtualDevice {
    id: DeviceId,
    spec: VirtualDeviceSpec,
    state: Mutex<DeviceState>,
    observers: ObserverList,
    next_observer_id: AtomicU64,
    fail_lock: AtomicBool,
}

impl VirtualDevice {
    pub fn new(spec: VirtualDeviceSpec) -> Self {
        let active_format = spec.formats.first().cloned();
        Self {
            id: DeviceId::new(&spec.id),
            state: Mutex::new(DeviceState {
                active_format,
                locked: false,
                zoom_factor: 1.0,
                focus_point: Point::CENTER,
                focus_mode: FocusMode::ContinuousAutoFocus,
                exposure_point: Point::CENTER,
                exposure_mode: ExposureMode::ContinuousAutoExposure,
                subject_area_monitoring: false,
                lock_count: 0,
                format_changes: 0,
            }),
            spec,
            observers: Arc::new(Mutex::new(Vec::new())),
            next_observer_id: AtomicU64::new(0),
            fail_lock: AtomicBool::new(false),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Number of successful configuration locks so far
    pub fn lock_count(&self) -> u64 {
        self.state.lock().lock_count
    }

    /// Number of active format changes so far
    pub fn format_change_count(&self) -> u64 {
        self.state.lock().format_changes
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Make subsequent `lock_for_configuration` calls fail
    pub fn set_fail_lock(&self, fail: bool) {
        self.fail_lock.store(fail, Ordering::SeqCst);
    }

    fn emit(&self, changes: &[PropertyChange]) {
        if changes.is_empty() {
            return;
        }
        let observers: Vec<PropertyObserver> =
            self.observers.lock().iter().map(|(_, o)| Arc::clone(o)).collect();
        for change in changes {
            trace!("{} property change {:?}", self.id, change);
            for observer in &observers {
                observer(&self.id, *change);
            }
        }
    }

    /// Apply `f` to the locked state, then publish the changes it reports.
    fn configure<F>(&self, f: F) -> HardwareResult<()>
    where
        F: FnOnce(&mut DeviceState) -> HardwareResult<Vec<PropertyChange>>,
    {
        let changes = {
            let mut state = self.state.lock();
            if !state.locked {
                return Err(HardwareError::NotLocked {
                    device: self.id.clone(),
                });
            }
            f(&mut state)?
        };
        self.emit(&changes);
        Ok(())
    }
}

impl fmt::Debug for VirtualDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("id", &self.id)
            .field("position", &self.spec.position)
            .field("device_type", &self.spec.device_type)
            .finish()
    }
}

impl CaptureDevice for VirtualDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn position(&self) -> DevicePosition {
        self.spec.position
    }

    fn kind(&self) -> DeviceKind {
        self.spec.kind
    }

    fn device_type(&self) -> DeviceType {
        self.spec.device_type
    }

    fn formats(&self) -> Vec<DeviceFormat> {
        self.spec.formats.clone()
    }

    fn active_format(&self) -> Option<DeviceFormat> {
        self.state.lock().active_format.clone()
    }

    fn lock_for_configuration(&self) -> HardwareResult<()> {
        if self.fail_lock.load(Ordering::SeqCst) {
            return Err(HardwareError::LockFailed {
                device: self.id.clone(),
            });
        }
        let mut state = self.state.lock();
        state.locked = true;
        state.lock_count += 1;
        Ok(())
    }

    fn unlock_for_configuration(&self) {
        self.state.lock().locked = false;
    }

    fn set_active_format(&self, format: &DeviceFormat) -> HardwareResult<()> {
        if !self.spec.formats.contains(format) {
            return Err(HardwareError::Unsupported {
                details: format!("{} is not a format of {}", format, self.id),
            });
        }
        self.configure(|state| {
            state.active_format = Some(format.clone());
            state.format_changes += 1;
            // A new format may lower the zoom ceiling.
            if state.zoom_factor > format.max_zoom_factor {
                state.zoom_factor = format.max_zoom_factor;
                return Ok(vec![PropertyChange::ZoomFactor(state.zoom_factor)]);
            }
            Ok(Vec::new())
        })
    }

    fn zoom_factor(&self) -> f64 {
        self.state.lock().zoom_factor
    }

    fn set_zoom_factor(&self, factor: f64) -> HardwareResult<()> {
        if !factor.is_finite() {
            return Err(HardwareError::Unsupported {
                details: format!("zoom factor {}", factor),
            });
        }
        self.configure(|state| {
            let max = state
                .active_format
                .as_ref()
                .map_or(1.0, |f| f.max_zoom_factor);
            let factor = factor.clamp(1.0, max.max(1.0));
            if (state.zoom_factor - factor).abs() < f64::EPSILON {
                return Ok(Vec::new());
            }
            state.zoom_factor = factor;
            Ok(vec![PropertyChange::ZoomFactor(factor)])
        })
    }

    fn focus_point_of_interest(&self) -> Point {
        self.state.lock().focus_point
    }

    fn focus_mode(&self) -> FocusMode {
        self.state.lock().focus_mode
    }

    fn supports_focus_point_of_interest(&self) -> bool {
        self.spec.supports_focus_point
    }

    fn supports_focus_mode(&self, mode: FocusMode) -> bool {
        self.spec.focus_modes.contains(&mode)
    }

    fn set_focus(&self, point: Point, mode: FocusMode) -> HardwareResult<()> {
        if !self.spec.supports_focus_point || !self.supports_focus_mode(mode) {
            return Err(HardwareError::Unsupported {
                details: format!("focus {:?} on {}", mode, self.id),
            });
        }
        self.configure(|state| {
            let mut changes = Vec::new();
            if state.focus_point != point {
                state.focus_point = point;
                changes.push(PropertyChange::FocusPointOfInterest(point));
            }
            state.focus_mode = mode;
            if mode != FocusMode::Locked {
                changes.push(PropertyChange::AdjustingFocus(true));
                changes.push(PropertyChange::AdjustingFocus(false));
            }
            Ok(changes)
        })
    }

    fn exposure_point_of_interest(&self) -> Point {
        self.state.lock().exposure_point
    }

    fn exposure_mode(&self) -> ExposureMode {
        self.state.lock().exposure_mode
    }

    fn supports_exposure_point_of_interest(&self) -> bool {
        self.spec.supports_exposure_point
    }

    fn supports_exposure_mode(&self, mode: ExposureMode) -> bool {
        self.spec.exposure_modes.contains(&mode)
    }

    fn set_exposure(&self, point: Point, mode: ExposureMode) -> HardwareResult<()> {
        if !self.spec.supports_exposure_point || !self.supports_exposure_mode(mode) {
            return Err(HardwareError::Unsupported {
                details: format!("exposure {:?} on {}", mode, self.id),
            });
        }
        self.configure(|state| {
            let mut changes = Vec::new();
            if state.exposure_point != point {
                state.exposure_point = point;
                changes.push(PropertyChange::ExposurePointOfInterest(point));
            }
            state.exposure_mode = mode;
            if mode != ExposureMode::Locked {
                changes.push(PropertyChange::AdjustingExposure(true));
                changes.push(PropertyChange::AdjustingWhiteBalance(true));
                changes.push(PropertyChange::AdjustingExposure(false));
                changes.push(PropertyChange::AdjustingWhiteBalance(false));
            }
            Ok(changes)
        })
    }

    fn subject_area_change_monitoring(&self) -> bool {
        self.state.lock().subject_area_monitoring
    }

    fn set_subject_area_change_monitoring(&self, enabled: bool) -> HardwareResult<()> {
        self.configure(|state| {
            state.subject_area_monitoring = enabled;
            Ok(Vec::new())
        })
    }

    fn observe(&self, observer: PropertyObserver) -> Observation {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, observer));
        let observers = Arc::clone(&self.observers);
        Observation::new(move || observers.lock().retain(|(existing, _)| *existing != id))
    }
}

struct SessionState {
    inputs: Vec<Arc<dyn CaptureDevice>>,
    outputs: Vec<OutputKind>,
    connections: HashMap<OutputKind, ConnectionSettings>,
    preset: Option<SessionPreset>,
    running: bool,
    configuration_depth: usize,
    commits: Vec<Vec<OutputKind>>,
    recording: Option<PathBuf>,
    rejected_inputs: HashSet<DeviceId>,
    rejected_outputs: HashSet<OutputKind>,
    fail_next_photo: bool,
    frame_size: (u32, u32),
}

impl SessionState {
    fn camera(&self) -> Option<&Arc<dyn CaptureDevice>> {
        self.inputs.iter().find(|d| d.kind() == DeviceKind::Camera)
    }

    fn has_output(&self, output: OutputKind) -> bool {
        self.outputs.contains(&output)
    }
}

struct FramePump {
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The single capture session of a [`VirtualBackend`]
pub struct VirtualSession {
    state: Mutex<SessionState>,
    delegate: RwLock<Option<Arc<dyn SessionDelegate>>>,
    frame_counter: AtomicU64,
    pump: Mutex<Option<FramePump>>,
}

impl VirtualSession {
    pub fn new(frame_size: (u32, u32)) -> Self {
        Self {
            state: Mutex::new(SessionState {
                inputs: Vec::new(),
                outputs: Vec::new(),
                connections: HashMap::new(),
                preset: None,
                running: false,
                configuration_depth: 0,
                commits: Vec::new(),
                recording: None,
                rejected_inputs: HashSet::new(),
                rejected_outputs: HashSet::new(),
                fail_next_photo: false,
                frame_size,
            }),
            delegate: RwLock::new(None),
            frame_counter: AtomicU64::new(0),
            pump: Mutex::new(None),
        }
    }

    fn delegate(&self) -> Option<Arc<dyn SessionDelegate>> {
        self.delegate.read().clone()
    }

    pub fn inputs(&self) -> Vec<DeviceId> {
        self.state.lock().inputs.iter().map(|d| d.id().clone()).collect()
    }

    pub fn outputs(&self) -> Vec<OutputKind> {
        self.state.lock().outputs.clone()
    }

    pub fn has_output(&self, output: OutputKind) -> bool {
        self.state.lock().has_output(output)
    }

    pub fn connection(&self, output: OutputKind) -> Option<ConnectionSettings> {
        self.state.lock().connections.get(&output).copied()
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        self.state.lock().preset
    }

    pub fn is_configuring(&self) -> bool {
        self.state.lock().configuration_depth > 0
    }

    /// Attached outputs as they stood after each outermost commit
    pub fn commit_history(&self) -> Vec<Vec<OutputKind>> {
        self.state.lock().commits.clone()
    }

    pub fn recording_destination(&self) -> Option<PathBuf> {
        self.state.lock().recording.clone()
    }

    pub fn reject_input(&self, device: &DeviceId) {
        self.state.lock().rejected_inputs.insert(device.clone());
    }

    pub fn allow_input(&self, device: &DeviceId) {
        self.state.lock().rejected_inputs.remove(device);
    }

    pub fn reject_output(&self, output: OutputKind) {
        self.state.lock().rejected_outputs.insert(output);
    }

    pub fn allow_output(&self, output: OutputKind) {
        self.state.lock().rejected_outputs.remove(&output);
    }

    /// Make the next photo capture report a processing failure
    pub fn fail_next_photo(&self) {
        self.state.lock().fail_next_photo = true;
    }

    fn next_frame(&self, state: &SessionState) -> Option<FrameBuffer> {
        if !state.running || state.configuration_depth > 0 || !state.has_output(OutputKind::VideoData) {
            return None;
        }
        let camera = state.camera()?;
        let (width, height) = state.frame_size;
        let id = self.frame_counter.fetch_add(1, Ordering::Relaxed);

        let format = PixelFormat::Yuv420VideoRange;
        let mut data = vec![128u8; format.buffer_size(width, height)];
        let luma = (width * height) as usize;
        for (i, value) in data[..luma].iter_mut().enumerate() {
            let x = (i as u32 % width) as u64;
            *value = (16 + (x * 219) / width.max(1) as u64) as u8;
        }

        let mut attachments = CaptureMetadata::new();
        attachments.insert("device".to_string(), json!(camera.id().as_str()));
        attachments.insert("frame".to_string(), json!(id));
        Some(
            FrameBuffer::new(id, SystemTime::now(), data, width, height, format)
                .with_attachments(attachments),
        )
    }

    /// Deliver one video frame; returns whether the graph could produce it.
    pub fn emit_video_frame(&self) -> bool {
        let frame = {
            let state = self.state.lock();
            self.next_frame(&state)
        };
        match (frame, self.delegate()) {
            (Some(frame), Some(delegate)) => {
                delegate.video_frame(frame);
                true
            }
            _ => false,
        }
    }

    /// Report one late frame as dropped
    pub fn drop_video_frame(&self) -> bool {
        let frame = {
            let state = self.state.lock();
            self.next_frame(&state)
        };
        match (frame, self.delegate()) {
            (Some(frame), Some(delegate)) => {
                delegate.video_frame_dropped(frame);
                true
            }
            _ => false,
        }
    }

    /// Deliver `frames` silent stereo frames when a microphone feeds the audio output
    pub fn emit_audio_samples(&self, frames: usize) -> bool {
        let deliverable = {
            let state = self.state.lock();
            state.running
                && state.configuration_depth == 0
                && state.has_output(OutputKind::AudioData)
                && state.inputs.iter().any(|d| d.kind() == DeviceKind::Microphone)
        };
        match (deliverable, self.delegate()) {
            (true, Some(delegate)) => {
                delegate.audio_samples(AudioBuffer::new(
                    SystemTime::now(),
                    48_000.0,
                    2,
                    vec![0.0; frames * 2],
                ));
                true
            }
            _ => false,
        }
    }

    pub fn simulate_interruption(&self, reason: InterruptionReason) {
        if let Some(delegate) = self.delegate() {
            delegate.interrupted(reason);
        }
    }

    pub fn simulate_interruption_ended(&self) {
        if let Some(delegate) = self.delegate() {
            delegate.interruption_ended();
        }
    }

    pub fn simulate_runtime_error(&self, details: &str) {
        if let Some(delegate) = self.delegate() {
            delegate.runtime_error(HardwareError::Runtime {
                details: details.to_string(),
            });
        }
    }

    pub(crate) fn notify_subject_area_changed(&self, device: &DeviceId) {
        if let Some(delegate) = self.delegate() {
            delegate.subject_area_changed(device);
        }
    }

    /// Emit frames at `interval` until stopped or the session is dropped.
    pub fn start_frame_pump(self: &Arc<Self>, interval: Duration) {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return;
        }
        let active = Arc::new(AtomicBool::new(true));
        let session: Weak<VirtualSession> = Arc::downgrade(self);
        let flag = Arc::clone(&active);
        let spawned = thread::Builder::new()
            .name("virtual.frame-pump".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match session.upgrade() {
                        Some(session) => {
                            session.emit_video_frame();
                            session.emit_audio_samples(480);
                        }
                        None => break,
                    }
                    thread::sleep(interval);
                }
            });
        match spawned {
            Ok(handle) => *pump = Some(FramePump { active, handle }),
            Err(e) => warn!("Failed to start frame pump: {}", e),
        }
    }

    pub fn stop_frame_pump(&self) {
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.active.store(false, Ordering::Release);
            if pump.handle.thread().id() != thread::current().id() {
                let _ = pump.handle.join();
            }
        }
    }

    fn render_photo(width: u32, height: u32) -> HardwareResult<Vec<u8>> {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x * 255 / width.max(1)) as u8);
                pixels.push((y * 255 / height.max(1)) as u8);
                pixels.push(96);
            }
        }
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
            .encode(&pixels, width, height, ColorType::Rgb8)
            .map_err(|e| HardwareError::CaptureFailed {
                details: e.to_string(),
            })?;
        Ok(bytes)
    }

    fn write_movie(destination: &Path) -> Option<HardwareError> {
        std::fs::write(destination, b"VMOV")
            .err()
            .map(|e| HardwareError::RecordingFailed {
                details: e.to_string(),
            })
    }
}

impl Drop for VirtualSession {
    fn drop(&mut self) {
        self.stop_frame_pump();
    }
}

impl CaptureSession for VirtualSession {
    fn begin_configuration(&self) {
        self.state.lock().configuration_depth += 1;
    }

    fn commit_configuration(&self) {
        let mut state = self.state.lock();
        state.configuration_depth = state.configuration_depth.saturating_sub(1);
        if state.configuration_depth == 0 {
            let outputs = state.outputs.clone();
            state.commits.push(outputs);
        }
    }

    fn can_add_input(&self, device: &dyn CaptureDevice) -> bool {
        let state = self.state.lock();
        !state.rejected_inputs.contains(device.id())
            && !state.inputs.iter().any(|d| d.kind() == device.kind())
    }

    fn add_input(&self, device: Arc<dyn CaptureDevice>) -> HardwareResult<()> {
        if !self.can_add_input(device.as_ref()) {
            return Err(HardwareError::InputRejected {
                device: device.id().clone(),
            });
        }
        debug!("Virtual session attached input {}", device.id());
        self.state.lock().inputs.push(device);
        Ok(())
    }

    fn remove_input(&self, device: &DeviceId) {
        let mut state = self.state.lock();
        let was_camera = state
            .inputs
            .iter()
            .any(|d| d.id() == device && d.kind() == DeviceKind::Camera);
        state.inputs.retain(|d| d.id() != device);
        if was_camera {
            // Connections are rebuilt when the video input changes.
            for settings in state.connections.values_mut() {
                *settings = ConnectionSettings::default();
            }
        }
    }

    fn can_add_output(&self, output: OutputKind) -> bool {
        let state = self.state.lock();
        !state.rejected_outputs.contains(&output) && !state.has_output(output)
    }

    fn add_output(&self, output: OutputKind) -> HardwareResult<()> {
        if !self.can_add_output(output) {
            return Err(HardwareError::OutputRejected { output });
        }
        let mut state = self.state.lock();
        state.outputs.push(output);
        state.connections.insert(output, ConnectionSettings::default());
        Ok(())
    }

    fn remove_output(&self, output: OutputKind) {
        let mut state = self.state.lock();
        state.outputs.retain(|o| *o != output);
        state.connections.remove(&output);
    }

    fn can_set_preset(&self, _preset: SessionPreset) -> bool {
        true
    }

    fn set_preset(&self, preset: SessionPreset) -> HardwareResult<()> {
        self.state.lock().preset = Some(preset);
        Ok(())
    }

    fn set_connection(&self, output: OutputKind, settings: ConnectionSettings) -> HardwareResult<()> {
        let mut state = self.state.lock();
        match state.connections.get_mut(&output) {
            Some(existing) => {
                *existing = settings;
                Ok(())
            }
            None => Err(HardwareError::OutputRejected { output }),
        }
    }

    fn start_running(&self) {
        let changed = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.running, true)
        };
        if changed {
            info!("Virtual session started");
            if let Some(delegate) = self.delegate() {
                delegate.running_changed(true);
            }
        }
    }

    fn stop_running(&self) {
        if self.state.lock().recording.is_some() {
            self.stop_recording();
        }
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.running, false)
        };
        if changed {
            info!("Virtual session stopped");
            if let Some(delegate) = self.delegate() {
                delegate.running_changed(false);
            }
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn capture_photo(&self) -> HardwareResult<()> {
        let (width, height, fail, device) = {
            let mut state = self.state.lock();
            if !state.running {
                return Err(HardwareError::NotRunning);
            }
            if !state.has_output(OutputKind::Photo) {
                return Err(HardwareError::OutputRejected {
                    output: OutputKind::Photo,
                });
            }
            let device = state
                .camera()
                .map(|d| d.id().clone())
                .ok_or_else(|| HardwareError::CaptureFailed {
                    details: "no video input".to_string(),
                })?;
            let orientation = state
                .connections
                .get(&OutputKind::Photo)
                .map(|c| c.orientation)
                .unwrap_or_default();
            let (w, h) = state.frame_size;
            let (width, height) = match orientation {
                CaptureOrientation::Portrait | CaptureOrientation::PortraitUpsideDown => {
                    (w.min(h), w.max(h))
                }
                CaptureOrientation::LandscapeLeft | CaptureOrientation::LandscapeRight => {
                    (w.max(h), w.min(h))
                }
            };
            (width, height, std::mem::take(&mut state.fail_next_photo), device)
        };

        let delegate = self.delegate();
        thread::Builder::new()
            .name("virtual.photo".to_string())
            .spawn(move || {
                thread::sleep(PHOTO_LATENCY);
                let result = if fail {
                    Err(HardwareError::CaptureFailed {
                        details: "simulated processing failure".to_string(),
                    })
                } else {
                    Self::render_photo(width, height).map(|data| {
                        let mut metadata = CaptureMetadata::new();
                        metadata.insert("PixelWidth".to_string(), json!(width));
                        metadata.insert("PixelHeight".to_string(), json!(height));
                        metadata.insert("device".to_string(), json!(device.as_str()));
                        metadata.insert(
                            "captured_at".to_string(),
                            json!(chrono::Utc::now().to_rfc3339()),
                        );
                        Photo { data, metadata }
                    })
                };
                if let Some(delegate) = delegate {
                    delegate.photo_processed(result);
                    delegate.photo_capture_finished();
                }
            })
            .map(|_| ())
            .map_err(|e| HardwareError::CaptureFailed {
                details: e.to_string(),
            })
    }

    fn start_recording(&self, destination: &Path) -> HardwareResult<()> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(HardwareError::NotRunning);
        }
        if !state.has_output(OutputKind::MovieFile) {
            return Err(HardwareError::OutputRejected {
                output: OutputKind::MovieFile,
            });
        }
        if state.recording.is_some() {
            return Err(HardwareError::RecordingFailed {
                details: "already recording".to_string(),
            });
        }
        info!("Virtual session recording to {}", destination.display());
        state.recording = Some(destination.to_path_buf());
        Ok(())
    }

    fn stop_recording(&self) {
        let Some(destination) = self.state.lock().recording.take() else {
            return;
        };
        let delegate = self.delegate();
        let spawned = thread::Builder::new()
            .name("virtual.movie".to_string())
            .spawn(move || {
                let error = Self::write_movie(&destination);
                if let Some(delegate) = delegate {
                    delegate.recording_finished(destination, error);
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to finish virtual recording: {}", e);
        }
    }

    fn set_delegate(&self, delegate: Option<Arc<dyn SessionDelegate>>) {
        *self.delegate.write() = delegate;
    }
}

/// Complete in-memory [`CaptureBackend`]
pub struct VirtualBackend {
    devices: Vec<Arc<VirtualDevice>>,
    session: Arc<VirtualSession>,
}

impl VirtualBackend {
    /// Dual back camera, wide-angle front camera and a microphone
    pub fn new() -> Self {
        Self::with_frame_size(DEFAULT_FRAME_SIZE.0, DEFAULT_FRAME_SIZE.1)
    }

    /// The default devices producing `width` x `height` frames
    pub fn with_frame_size(width: u32, height: u32) -> Self {
        Self::builder()
            .device(VirtualDeviceSpec::back_camera("back-dual", DeviceType::DualCamera))
            .device(VirtualDeviceSpec::front_camera("front-wide"))
            .device(VirtualDeviceSpec::microphone("microphone"))
            .frame_size(width, height)
            .build()
    }

    pub fn builder() -> VirtualBackendBuilder {
        VirtualBackendBuilder::default()
    }

    pub fn session(&self) -> Arc<VirtualSession> {
        Arc::clone(&self.session)
    }

    pub fn device(&self, id: &str) -> Option<Arc<VirtualDevice>> {
        self.devices.iter().find(|d| d.id.as_str() == id).cloned()
    }

    pub fn camera(&self, position: DevicePosition) -> Option<Arc<VirtualDevice>> {
        self.devices
            .iter()
            .find(|d| d.spec.kind == DeviceKind::Camera && d.spec.position == position)
            .cloned()
    }

    /// Raise a subject-area change for `id` if the device is monitoring.
    pub fn simulate_subject_area_change(&self, id: &str) -> bool {
        match self.device(id) {
            Some(device) if device.subject_area_change_monitoring() => {
                self.session.notify_subject_area_changed(device.id());
                true
            }
            _ => false,
        }
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for VirtualBackend {
    fn devices(&self) -> Vec<Arc<dyn CaptureDevice>> {
        self.devices
            .iter()
            .map(|d| Arc::clone(d) as Arc<dyn CaptureDevice>)
            .collect()
    }

    fn create_session(&self) -> Arc<dyn CaptureSession> {
        Arc::clone(&self.session) as Arc<dyn CaptureSession>
    }
}

#[derive(Default)]
pub struct VirtualBackendBuilder {
    specs: Vec<VirtualDeviceSpec>,
    frame_size: Option<(u32, u32)>,
}

impl VirtualBackendBuilder {
    pub fn device(mut self, spec: VirtualDeviceSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = Some((width, height));
        self
    }

    pub fn build(self) -> VirtualBackend {
        VirtualBackend {
            devices: self
                .specs
                .into_iter()
                .map(|spec| Arc::new(VirtualDevice::new(spec)))
                .collect(),
            session: Arc::new(VirtualSession::new(
                self.frame_size.unwrap_or(DEFAULT_FRAME_SIZE),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Sender};

    struct RecordingDelegate {
        frames: Sender<u64>,
        photos: Sender<bool>,
    }

    impl SessionDelegate for RecordingDelegate {
        fn running_changed(&self, _running: bool) {}
        fn subject_area_changed(&self, _device: &DeviceId) {}
        fn runtime_error(&self, _error: HardwareError) {}
        fn interrupted(&self, _reason: InterruptionReason) {}
        fn interruption_ended(&self) {}
        fn video_frame(&self, frame: FrameBuffer) {
            let _ = self.frames.send(frame.id);
        }
        fn video_frame_dropped(&self, _frame: FrameBuffer) {}
        fn audio_samples(&self, _samples: AudioBuffer) {}
        fn photo_processed(&self, result: HardwareResult<Photo>) {
            let _ = self.photos.send(result.is_ok());
        }
        fn photo_capture_finished(&self) {}
        fn recording_finished(&self, _destination: PathBuf, _error: Option<HardwareError>) {}
    }

    #[test]
    fn test_device_requires_configuration_lock() {
        let device = VirtualDevice::new(VirtualDeviceSpec::back_camera("cam", DeviceType::DualCamera));
        assert_eq!(
            device.set_zoom_factor(2.0),
            Err(HardwareError::NotLocked {
                device: DeviceId::new("cam")
            })
        );

        device.lock_for_configuration().unwrap();
        device.set_zoom_factor(2.0).unwrap();
        device.unlock_for_configuration();
        assert_eq!(device.zoom_factor(), 2.0);
        assert!(!device.is_locked());
    }

    #[test]
    fn test_device_reports_property_changes() {
        let device = VirtualDevice::new(VirtualDeviceSpec::back_camera("cam", DeviceType::DualCamera));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observation = device.observe(Arc::new(move |_: &DeviceId, change: PropertyChange| {
            sink.lock().push(change)
        }));

        device.lock_for_configuration().unwrap();
        device.set_zoom_factor(3.0).unwrap();
        device.set_zoom_factor(3.0).unwrap();
        device.unlock_for_configuration();
        assert_eq!(*seen.lock(), vec![PropertyChange::ZoomFactor(3.0)]);

        drop(observation);
        assert_eq!(device.observer_count(), 0);
    }

    #[test]
    fn test_session_accepts_one_video_input() {
        let backend = VirtualBackend::new();
        let session = backend.session();
        let back: Arc<dyn CaptureDevice> = backend.camera(DevicePosition::Back).unwrap();
        let front: Arc<dyn CaptureDevice> = backend.camera(DevicePosition::Front).unwrap();

        session.add_input(Arc::clone(&back)).unwrap();
        assert!(!session.can_add_input(front.as_ref()));
        assert!(session.add_input(front).is_err());
        assert_eq!(session.inputs(), vec![back.id().clone()]);
    }

    #[test]
    fn test_frames_need_running_session_with_video_output() {
        let backend = VirtualBackend::new();
        let session = backend.session();
        let (frames_tx, frames_rx) = channel::unbounded();
        let (photos_tx, _photos_rx) = channel::unbounded();
        session.set_delegate(Some(Arc::new(RecordingDelegate {
            frames: frames_tx,
            photos: photos_tx,
        })));

        session
            .add_input(backend.camera(DevicePosition::Back).unwrap())
            .unwrap();
        assert!(!session.emit_video_frame());

        session.add_output(OutputKind::VideoData).unwrap();
        session.start_running();
        session.begin_configuration();
        assert!(!session.emit_video_frame());
        session.commit_configuration();
        assert!(session.emit_video_frame());
        assert_eq!(frames_rx.try_recv().unwrap(), 0);
    }

    #[test]
    fn test_photo_capture_reports_through_delegate() {
        let backend = VirtualBackend::new();
        let session = backend.session();
        let (frames_tx, _frames_rx) = channel::unbounded();
        let (photos_tx, photos_rx) = channel::unbounded();
        session.set_delegate(Some(Arc::new(RecordingDelegate {
            frames: frames_tx,
            photos: photos_tx,
        })));
        session
            .add_input(backend.camera(DevicePosition::Back).unwrap())
            .unwrap();
        session.add_output(OutputKind::Photo).unwrap();

        assert_eq!(session.capture_photo(), Err(HardwareError::NotRunning));

        session.start_running();
        session.capture_photo().unwrap();
        assert!(photos_rx.recv_timeout(Duration::from_secs(2)).unwrap());

        session.fail_next_photo();
        session.capture_photo().unwrap();
        assert!(!photos_rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
}
