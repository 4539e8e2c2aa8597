//! Device, capture and image orientation.
//!
//! The controller only consumes an [`OrientationSource`]; sensing itself lives
//! outside the session core. [`GravityOrientationDetector`] derives the
//! orientation from gravity samples fed by whatever motion sensor the host has,
//! and [`FixedOrientation`] serves headless setups.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::hardware::Observation;

/// Physical orientation of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceOrientation {
    #[default]
    Unknown,
    Portrait,
    PortraitUpsideDown,
    /// Device rotated so the top points left
    LandscapeLeft,
    /// Device rotated so the top points right
    LandscapeRight,
    FaceUp,
    FaceDown,
}

/// Orientation applied to a capture connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CaptureOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeRight,
    LandscapeLeft,
}

impl CaptureOrientation {
    /// Capture orientation for a device orientation.
    ///
    /// Landscape sides are swapped: turning the device left means the sensor
    /// content has to be turned right. Face up/down has no capture orientation.
    pub fn from_device(orientation: DeviceOrientation) -> Option<Self> {
        match orientation {
            DeviceOrientation::Portrait => Some(CaptureOrientation::Portrait),
            DeviceOrientation::PortraitUpsideDown => Some(CaptureOrientation::PortraitUpsideDown),
            DeviceOrientation::LandscapeLeft => Some(CaptureOrientation::LandscapeRight),
            DeviceOrientation::LandscapeRight => Some(CaptureOrientation::LandscapeLeft),
            DeviceOrientation::Unknown | DeviceOrientation::FaceUp | DeviceOrientation::FaceDown => {
                None
            }
        }
    }
}

/// How stored pixels must be transformed for upright display (EXIF semantics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImageOrientation {
    #[default]
    Up,
    Down,
    Left,
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

impl ImageOrientation {
    pub fn mirrored(self) -> Self {
        use ImageOrientation::*;
        match self {
            Up => UpMirrored,
            Down => DownMirrored,
            Left => RightMirrored,
            Right => LeftMirrored,
            UpMirrored => Up,
            DownMirrored => Down,
            LeftMirrored => Right,
            RightMirrored => Left,
        }
    }

    pub fn rotate_right(self) -> Self {
        use ImageOrientation::*;
        match self {
            Up => Right,
            Down => Left,
            Left => Up,
            Right => Down,
            UpMirrored => RightMirrored,
            DownMirrored => LeftMirrored,
            LeftMirrored => UpMirrored,
            RightMirrored => DownMirrored,
        }
    }

    pub fn rotate_left(self) -> Self {
        use ImageOrientation::*;
        match self {
            Up => Left,
            Down => Right,
            Left => Down,
            Right => Up,
            UpMirrored => LeftMirrored,
            DownMirrored => RightMirrored,
            LeftMirrored => DownMirrored,
            RightMirrored => UpMirrored,
        }
    }

    pub fn rotate_upside_down(self) -> Self {
        use ImageOrientation::*;
        match self {
            Up => Down,
            Down => Up,
            Left => Right,
            Right => Left,
            UpMirrored => DownMirrored,
            DownMirrored => UpMirrored,
            LeftMirrored => RightMirrored,
            RightMirrored => LeftMirrored,
        }
    }

    pub fn swap_left_right(self) -> Self {
        use ImageOrientation::*;
        match self {
            Left => Right,
            Right => Left,
            LeftMirrored => RightMirrored,
            RightMirrored => LeftMirrored,
            other => other,
        }
    }

    pub fn is_mirrored(self) -> bool {
        use ImageOrientation::*;
        matches!(self, UpMirrored | DownMirrored | LeftMirrored | RightMirrored)
    }

    /// Whether upright display swaps width and height
    pub fn is_transposed(self) -> bool {
        use ImageOrientation::*;
        matches!(self, Left | Right | LeftMirrored | RightMirrored)
    }
}

impl From<CaptureOrientation> for ImageOrientation {
    fn from(orientation: CaptureOrientation) -> Self {
        match orientation {
            CaptureOrientation::Portrait => ImageOrientation::Up,
            CaptureOrientation::PortraitUpsideDown => ImageOrientation::Down,
            CaptureOrientation::LandscapeRight => ImageOrientation::Left,
            CaptureOrientation::LandscapeLeft => ImageOrientation::Right,
        }
    }
}

pub type OrientationCallback = Arc<dyn Fn(DeviceOrientation, CaptureOrientation) + Send + Sync>;

/// Supplies the current orientation to the controller
pub trait OrientationSource: Send + Sync {
    fn device_orientation(&self) -> DeviceOrientation;

    fn current_capture_orientation(&self) -> CaptureOrientation;

    /// Register a change callback; dropping the returned token unregisters it.
    fn on_orientation_changed(&self, callback: OrientationCallback) -> Observation;

    fn start(&self);

    fn stop(&self);
}

/// Orientation source that never changes
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedOrientation {
    orientation: CaptureOrientation,
}

impl FixedOrientation {
    pub fn new(orientation: CaptureOrientation) -> Self {
        Self { orientation }
    }
}

impl OrientationSource for FixedOrientation {
    fn device_orientation(&self) -> DeviceOrientation {
        match self.orientation {
            CaptureOrientation::Portrait => DeviceOrientation::Portrait,
            CaptureOrientation::PortraitUpsideDown => DeviceOrientation::PortraitUpsideDown,
            CaptureOrientation::LandscapeRight => DeviceOrientation::LandscapeLeft,
            CaptureOrientation::LandscapeLeft => DeviceOrientation::LandscapeRight,
        }
    }

    fn current_capture_orientation(&self) -> CaptureOrientation {
        self.orientation
    }

    fn on_orientation_changed(&self, _callback: OrientationCallback) -> Observation {
        Observation::empty()
    }

    fn start(&self) {}

    fn stop(&self) {}
}

const FACE_UP_DOWN_THRESHOLD: f64 = 0.3;
const PORTRAIT_LANDSCAPE_THRESHOLD: f64 = 0.1;

/// Default gravity sampling interval (10 Hz)
pub const DEFAULT_SENSOR_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct OrientationState {
    device: DeviceOrientation,
    capture: CaptureOrientation,
}

/// Orientation derived from gravity vectors.
///
/// Samples are ignored until [`start`](OrientationSource::start) is called;
/// stopping resets the device orientation to `Unknown` while the capture
/// orientation keeps its last valid value.
pub struct GravityOrientationDetector {
    state: RwLock<OrientationState>,
    active: AtomicBool,
    sensor_interval: RwLock<Duration>,
    callbacks: Arc<Mutex<Vec<(u64, OrientationCallback)>>>,
    next_callback_id: AtomicU64,
}

impl GravityOrientationDetector {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_SENSOR_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            state: RwLock::new(OrientationState {
                device: DeviceOrientation::Unknown,
                capture: CaptureOrientation::Portrait,
            }),
            active: AtomicBool::new(false),
            sensor_interval: RwLock::new(interval),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_callback_id: AtomicU64::new(0),
        }
    }

    /// Interval at which the host should feed gravity samples
    pub fn sensor_interval(&self) -> Duration {
        *self.sensor_interval.read()
    }

    pub fn set_sensor_interval(&self, interval: Duration) {
        *self.sensor_interval.write() = interval;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Classify one gravity sample (in g) and publish any orientation change.
    pub fn update_gravity(&self, x: f64, y: f64, z: f64) {
        if !self.is_active() {
            return;
        }
        if let Some(orientation) = classify_gravity(x, y, z) {
            trace!("Gravity ({:.2}, {:.2}, {:.2}) -> {:?}", x, y, z, orientation);
            self.set_device_orientation(orientation);
        }
    }

    fn set_device_orientation(&self, orientation: DeviceOrientation) {
        let changed = {
            let mut state = self.state.write();
            if state.device == orientation {
                None
            } else {
                state.device = orientation;
                if let Some(capture) = CaptureOrientation::from_device(orientation) {
                    state.capture = capture;
                }
                Some(*state)
            }
        };

        if let Some(state) = changed {
            debug!(
                "Device orientation changed to {:?} (capture {:?})",
                state.device, state.capture
            );
            let callbacks: Vec<_> = self.callbacks.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
            for callback in callbacks {
                callback(state.device, state.capture);
            }
        }
    }
}

impl Default for GravityOrientationDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OrientationSource for GravityOrientationDetector {
    fn device_orientation(&self) -> DeviceOrientation {
        self.state.read().device
    }

    fn current_capture_orientation(&self) -> CaptureOrientation {
        self.state.read().capture
    }

    fn on_orientation_changed(&self, callback: OrientationCallback) -> Observation {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, callback));
        let callbacks = Arc::clone(&self.callbacks);
        Observation::new(move || callbacks.lock().retain(|(existing, _)| *existing != id))
    }

    fn start(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            debug!("Orientation detector started");
        }
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!("Orientation detector stopped");
        }
        self.set_device_orientation(DeviceOrientation::Unknown);
    }
}

/// Map a gravity vector to a device orientation, `None` when below threshold.
pub fn classify_gravity(x: f64, y: f64, z: f64) -> Option<DeviceOrientation> {
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
    if az > ax + ay + FACE_UP_DOWN_THRESHOLD {
        Some(if z > 0.0 {
            DeviceOrientation::FaceDown
        } else {
            DeviceOrientation::FaceUp
        })
    } else if ax > ay + az + PORTRAIT_LANDSCAPE_THRESHOLD {
        Some(if x > 0.0 {
            DeviceOrientation::LandscapeRight
        } else {
            DeviceOrientation::LandscapeLeft
        })
    } else if ay > ax + az + PORTRAIT_LANDSCAPE_THRESHOLD {
        Some(if y > 0.0 {
            DeviceOrientation::PortraitUpsideDown
        } else {
            DeviceOrientation::Portrait
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const ALL: [ImageOrientation; 8] = [
        ImageOrientation::Up,
        ImageOrientation::Down,
        ImageOrientation::Left,
        ImageOrientation::Right,
        ImageOrientation::UpMirrored,
        ImageOrientation::DownMirrored,
        ImageOrientation::LeftMirrored,
        ImageOrientation::RightMirrored,
    ];

    #[test]
    fn test_orientation_algebra_inverses() {
        for o in ALL {
            assert_eq!(o.mirrored().mirrored(), o);
            assert_eq!(o.swap_left_right().swap_left_right(), o);
            assert_eq!(o.rotate_left().rotate_right(), o);
            assert_eq!(o.rotate_upside_down().rotate_upside_down(), o);
            assert_eq!(o.rotate_right().rotate_right(), o.rotate_upside_down());
        }
    }

    #[test]
    fn test_landscape_sides_swap_between_device_and_capture() {
        assert_eq!(
            CaptureOrientation::from_device(DeviceOrientation::LandscapeLeft),
            Some(CaptureOrientation::LandscapeRight)
        );
        assert_eq!(
            CaptureOrientation::from_device(DeviceOrientation::LandscapeRight),
            Some(CaptureOrientation::LandscapeLeft)
        );
        assert_eq!(CaptureOrientation::from_device(DeviceOrientation::FaceUp), None);
    }

    #[test]
    fn test_capture_to_image_orientation() {
        assert_eq!(ImageOrientation::from(CaptureOrientation::Portrait), ImageOrientation::Up);
        assert_eq!(
            ImageOrientation::from(CaptureOrientation::LandscapeRight),
            ImageOrientation::Left
        );
        assert_eq!(
            ImageOrientation::from(CaptureOrientation::LandscapeLeft),
            ImageOrientation::Right
        );
    }

    #[test]
    fn test_gravity_classification() {
        assert_eq!(classify_gravity(0.0, -1.0, 0.0), Some(DeviceOrientation::Portrait));
        assert_eq!(
            classify_gravity(0.0, 1.0, 0.0),
            Some(DeviceOrientation::PortraitUpsideDown)
        );
        assert_eq!(classify_gravity(-1.0, 0.0, 0.0), Some(DeviceOrientation::LandscapeLeft));
        assert_eq!(classify_gravity(0.0, 0.0, -1.0), Some(DeviceOrientation::FaceUp));
        // Diagonal hold stays below both thresholds
        assert_eq!(classify_gravity(0.7, -0.7, 0.0), None);
    }

    #[test]
    fn test_detector_is_edge_triggered_and_resets_on_stop() {
        let detector = GravityOrientationDetector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _token = detector.on_orientation_changed(Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Ignored while inactive
        detector.update_gravity(-1.0, 0.0, 0.0);
        assert_eq!(detector.device_orientation(), DeviceOrientation::Unknown);

        detector.start();
        detector.update_gravity(-1.0, 0.0, 0.0);
        detector.update_gravity(-0.98, 0.01, 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            detector.current_capture_orientation(),
            CaptureOrientation::LandscapeRight
        );

        detector.stop();
        assert_eq!(detector.device_orientation(), DeviceOrientation::Unknown);
        assert_eq!(
            detector.current_capture_orientation(),
            CaptureOrientation::LandscapeRight
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_token_unregisters_callback() {
        let detector = GravityOrientationDetector::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let token = detector.on_orientation_changed(Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        drop(token);

        detector.start();
        detector.update_gravity(0.0, -1.0, 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
