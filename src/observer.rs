//! Observer Hub
//!
//! Three independent registries (lifecycle, video frames, audio frames) hold
//! observers weakly: registering never keeps an observer alive. Lifecycle
//! events are edge-triggered through [`PublishedState`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

use crate::controller::SimpleCamera;
use crate::device::Point;
use crate::error::HardwareError;
use crate::frame::{AudioBuffer, FrameBuffer};
use crate::hardware::InterruptionReason;

/// Lifecycle and property events. Every method defaults to a no-op and is
/// called on the controller's main queue.
pub trait CameraObserver: Send + Sync {
    fn did_start_running(&self, _camera: &SimpleCamera) {}
    fn did_stop_running(&self, _camera: &SimpleCamera) {}
    fn did_change_zoom_factor(&self, _camera: &SimpleCamera) {}
    fn did_change_focus_point_of_interest(&self, _camera: &SimpleCamera) {}
    fn did_change_exposure_point_of_interest(&self, _camera: &SimpleCamera) {}
    fn did_reset_focus_and_exposure(&self, _camera: &SimpleCamera) {}
    fn did_switch_camera_input(&self, _camera: &SimpleCamera) {}

    /// Reserved: runtime errors are logged but not dispatched yet.
    fn session_runtime_error(&self, _camera: &SimpleCamera, _error: &HardwareError) {}

    /// Reserved: interruption starts are logged but not dispatched yet.
    fn session_was_interrupted(&self, _camera: &SimpleCamera, _reason: InterruptionReason) {}

    fn session_interruption_ended(&self, _camera: &SimpleCamera) {}
}

/// Raw video frames, called synchronously on the frame-delivery queue
pub trait VideoFrameObserver: Send + Sync {
    fn did_output(&self, _frame: &FrameBuffer) {}
    fn did_drop(&self, _frame: &FrameBuffer) {}
}

/// Raw audio samples, called synchronously on the frame-delivery queue
pub trait AudioFrameObserver: Send + Sync {
    fn did_output(&self, _samples: &AudioBuffer) {}
}

/// Lifecycle events as delivered to [`CameraObserver`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    StartedRunning,
    StoppedRunning,
    ZoomFactorChanged,
    FocusPointChanged,
    ExposurePointChanged,
    FocusAndExposureReset,
    CameraInputSwitched,
    InterruptionEnded,
}

impl LifecycleEvent {
    pub fn deliver(&self, observer: &dyn CameraObserver, camera: &SimpleCamera) {
        match self {
            LifecycleEvent::StartedRunning => observer.did_start_running(camera),
            LifecycleEvent::StoppedRunning => observer.did_stop_running(camera),
            LifecycleEvent::ZoomFactorChanged => observer.did_change_zoom_factor(camera),
            LifecycleEvent::FocusPointChanged => observer.did_change_focus_point_of_interest(camera),
            LifecycleEvent::ExposurePointChanged => {
                observer.did_change_exposure_point_of_interest(camera)
            }
            LifecycleEvent::FocusAndExposureReset => observer.did_reset_focus_and_exposure(camera),
            LifecycleEvent::CameraInputSwitched => observer.did_switch_camera_input(camera),
            LifecycleEvent::InterruptionEnded => observer.session_interruption_ended(camera),
        }
    }
}

/// A set of weakly held observers with identity by allocation.
pub struct WeakRegistry<T: ?Sized> {
    entries: RwLock<Vec<Weak<T>>>,
}

fn same_allocation<T: ?Sized>(entry: &Weak<T>, observer: &Arc<T>) -> bool {
    entry.as_ptr().cast::<()>() == Arc::as_ptr(observer).cast::<()>()
}

impl<T: ?Sized> WeakRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register `observer`; adding an already registered observer is a no-op.
    pub fn add(&self, observer: &Arc<T>) {
        let mut entries = self.entries.write();
        entries.retain(|entry| entry.strong_count() > 0);
        if !entries.iter().any(|entry| same_allocation(entry, observer)) {
            entries.push(Arc::downgrade(observer));
        }
    }

    /// Unregister `observer`; removing an absent observer is a no-op.
    pub fn remove(&self, observer: &Arc<T>) {
        self.entries
            .write()
            .retain(|entry| entry.strong_count() > 0 && !same_allocation(entry, observer));
    }

    pub fn contains(&self, observer: &Arc<T>) -> bool {
        self.entries
            .read()
            .iter()
            .any(|entry| same_allocation(entry, observer))
    }

    /// Number of registered observers that are still alive
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Call `f` for every live observer, skipping any that was dropped or
    /// unregistered after iteration started.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        let entries: Vec<Weak<T>> = self.entries.read().clone();
        for entry in entries {
            let Some(observer) = entry.upgrade() else {
                continue;
            };
            if self.contains(&observer) {
                f(&observer);
            }
        }
    }
}

impl<T: ?Sized> Default for WeakRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Last published values of the observed lifecycle properties.
///
/// Each `publish_*` stores the new value and returns the event to fan out,
/// or `None` when nothing observable changed. A focus or exposure point at
/// the sensor center means "no point of interest" and is stored silently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishedState {
    running: bool,
    zoom_factor: f64,
    focus_point: Point,
    exposure_point: Point,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            running: false,
            zoom_factor: 1.0,
            focus_point: Point::CENTER,
            exposure_point: Point::CENTER,
        }
    }
}

impl PublishedState {
    pub fn running(&self) -> bool {
        self.running
    }

    pub fn zoom_factor(&self) -> f64 {
        self.zoom_factor
    }

    pub fn focus_point(&self) -> Point {
        self.focus_point
    }

    pub fn exposure_point(&self) -> Point {
        self.exposure_point
    }

    pub fn publish_running(&mut self, running: bool) -> Option<LifecycleEvent> {
        if std::mem::replace(&mut self.running, running) == running {
            return None;
        }
        Some(if running {
            LifecycleEvent::StartedRunning
        } else {
            LifecycleEvent::StoppedRunning
        })
    }

    pub fn publish_zoom_factor(&mut self, zoom_factor: f64) -> Option<LifecycleEvent> {
        if std::mem::replace(&mut self.zoom_factor, zoom_factor) == zoom_factor {
            return None;
        }
        Some(LifecycleEvent::ZoomFactorChanged)
    }

    pub fn publish_focus_point(&mut self, point: Point) -> Option<LifecycleEvent> {
        let previous = std::mem::replace(&mut self.focus_point, point);
        (previous != point && point != Point::CENTER).then_some(LifecycleEvent::FocusPointChanged)
    }

    pub fn publish_exposure_point(&mut self, point: Point) -> Option<LifecycleEvent> {
        let previous = std::mem::replace(&mut self.exposure_point, point);
        (previous != point && point != Point::CENTER)
            .then_some(LifecycleEvent::ExposurePointChanged)
    }
}

/// The three observer registries of a controller
#[derive(Default)]
pub struct ObserverHub {
    pub camera: WeakRegistry<dyn CameraObserver>,
    pub video: WeakRegistry<dyn VideoFrameObserver>,
    pub audio: WeakRegistry<dyn AudioFrameObserver>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_video(&self, frame: &FrameBuffer) {
        self.video.for_each(|observer| observer.did_output(frame));
    }

    pub fn dispatch_dropped_video(&self, frame: &FrameBuffer) {
        self.video.for_each(|observer| observer.did_drop(frame));
    }

    pub fn dispatch_audio(&self, samples: &AudioBuffer) {
        self.audio.for_each(|observer| observer.did_output(samples));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    use crate::frame::PixelFormat;

    #[derive(Default)]
    struct CountingObserver {
        frames: AtomicUsize,
    }

    impl VideoFrameObserver for CountingObserver {
        fn did_output(&self, _frame: &FrameBuffer) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame() -> FrameBuffer {
        FrameBuffer::new(0, SystemTime::now(), vec![0; 12], 4, 2, PixelFormat::Yuv420VideoRange)
    }

    #[test]
    fn test_add_and_remove_are_idempotent() {
        let registry: WeakRegistry<dyn VideoFrameObserver> = WeakRegistry::new();
        let observer: Arc<dyn VideoFrameObserver> = Arc::new(CountingObserver::default());

        registry.add(&observer);
        registry.add(&observer);
        assert_eq!(registry.len(), 1);

        registry.remove(&observer);
        registry.remove(&observer);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_does_not_keep_observers_alive() {
        let hub = ObserverHub::new();
        let observer = Arc::new(CountingObserver::default());
        let erased: Arc<dyn VideoFrameObserver> = observer.clone();
        hub.video.add(&erased);
        drop(erased);

        hub.dispatch_video(&frame());
        assert_eq!(observer.frames.load(Ordering::SeqCst), 1);

        drop(observer);
        assert!(hub.video.is_empty());
        hub.dispatch_video(&frame());
    }

    #[test]
    fn test_observer_removed_during_fan_out_is_skipped() {
        struct Remover {
            registry: Arc<WeakRegistry<dyn VideoFrameObserver>>,
            victim: Arc<dyn VideoFrameObserver>,
        }
        impl VideoFrameObserver for Remover {
            fn did_output(&self, _frame: &FrameBuffer) {
                self.registry.remove(&self.victim);
            }
        }

        let registry: Arc<WeakRegistry<dyn VideoFrameObserver>> = Arc::new(WeakRegistry::new());
        let victim = Arc::new(CountingObserver::default());
        let victim_erased: Arc<dyn VideoFrameObserver> = victim.clone();
        let remover: Arc<dyn VideoFrameObserver> = Arc::new(Remover {
            registry: Arc::clone(&registry),
            victim: Arc::clone(&victim_erased),
        });

        registry.add(&remover);
        registry.add(&victim_erased);
        registry.for_each(|observer| observer.did_output(&frame()));

        assert_eq!(victim.frames.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zoom_is_edge_triggered() {
        let mut state = PublishedState::default();
        assert_eq!(state.publish_zoom_factor(1.0), None);
        assert_eq!(
            state.publish_zoom_factor(2.5),
            Some(LifecycleEvent::ZoomFactorChanged)
        );
        assert_eq!(state.publish_zoom_factor(2.5), None);
    }

    #[test]
    fn test_center_point_is_stored_but_not_published() {
        let mut state = PublishedState::default();
        let tap = Point::new(0.2, 0.7);

        assert_eq!(
            state.publish_focus_point(tap),
            Some(LifecycleEvent::FocusPointChanged)
        );
        assert_eq!(state.publish_focus_point(Point::CENTER), None);
        assert_eq!(state.focus_point(), Point::CENTER);
        // Returning to the same tap after a reset is a change again.
        assert_eq!(
            state.publish_focus_point(tap),
            Some(LifecycleEvent::FocusPointChanged)
        );

        assert_eq!(state.publish_exposure_point(Point::CENTER), None);
        assert_eq!(
            state.publish_exposure_point(tap),
            Some(LifecycleEvent::ExposurePointChanged)
        );
    }

    #[test]
    fn test_running_edges() {
        let mut state = PublishedState::default();
        assert_eq!(state.publish_running(false), None);
        assert_eq!(state.publish_running(true), Some(LifecycleEvent::StartedRunning));
        assert_eq!(state.publish_running(true), None);
        assert_eq!(state.publish_running(false), Some(LifecycleEvent::StoppedRunning));
    }
}
