//! Hardware callbacks routed back into the controller.
//!
//! Callbacks never take the hardware mutex themselves: each one posts a job
//! to one of the controller queues or publishes through the main queue.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::{Inner, PublishedChange};
use crate::device::{DeviceId, DeviceInput};
use crate::error::{HardwareError, HardwareResult};
use crate::events::CameraEventKind;
use crate::frame::{AudioBuffer, FrameBuffer, Photo};
use crate::hardware::{InterruptionReason, Observation, PropertyChange, SessionDelegate};
use crate::observer::LifecycleEvent;

/// Session delegate holding the controller weakly
pub(super) struct DelegateBridge {
    inner: Weak<Inner>,
}

impl DelegateBridge {
    pub(super) fn new(inner: &Arc<Inner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    fn with_inner<F: FnOnce(&Arc<Inner>)>(&self, f: F) {
        if let Some(inner) = self.inner.upgrade() {
            f(&inner);
        }
    }
}

impl SessionDelegate for DelegateBridge {
    fn running_changed(&self, running: bool) {
        self.with_inner(|inner| inner.publish(PublishedChange::Running(running)));
    }

    fn subject_area_changed(&self, device: &DeviceId) {
        let device = device.clone();
        self.with_inner(|inner| {
            inner.session_async(move |inner| {
                if inner.status.read().video_input.as_ref() != Some(&device) {
                    trace!("Ignoring subject area change on inactive {}", device);
                    return;
                }
                debug!("Subject area changed on {}, resetting focus and exposure", device);
                let guard = inner.hardware.lock();
                if let Some(hardware) = guard.as_ref() {
                    inner.reset_focus_and_exposure(hardware);
                }
            });
        });
    }

    fn runtime_error(&self, error: HardwareError) {
        warn!("Capture session runtime error: {}", error);
        self.with_inner(|inner| {
            inner.emit(CameraEventKind::RuntimeError {
                details: error.to_string(),
            })
        });
    }

    fn interrupted(&self, reason: InterruptionReason) {
        warn!("Capture session interrupted: {:?}", reason);
        self.with_inner(|inner| inner.emit(CameraEventKind::Interrupted { reason }));
    }

    fn interruption_ended(&self) {
        self.with_inner(|inner| {
            inner.notify(
                LifecycleEvent::InterruptionEnded,
                CameraEventKind::InterruptionEnded,
            )
        });
    }

    fn video_frame(&self, frame: FrameBuffer) {
        self.with_inner(|inner| {
            let weak = Arc::downgrade(inner);
            inner.frame_queue.run_async(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver_video(frame);
                }
            });
        });
    }

    fn video_frame_dropped(&self, frame: FrameBuffer) {
        self.with_inner(|inner| {
            let weak = Arc::downgrade(inner);
            inner.frame_queue.run_async(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.observers.dispatch_dropped_video(&frame);
                }
            });
        });
    }

    fn audio_samples(&self, samples: AudioBuffer) {
        self.with_inner(|inner| {
            let weak = Arc::downgrade(inner);
            inner.frame_queue.run_async(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.observers.dispatch_audio(&samples);
                }
            });
        });
    }

    fn photo_processed(&self, result: HardwareResult<Photo>) {
        self.with_inner(|inner| inner.photo_processed(result));
    }

    fn photo_capture_finished(&self) {
        self.with_inner(|inner| inner.photo_capture_finished());
    }

    fn recording_finished(&self, destination: PathBuf, error: Option<HardwareError>) {
        self.with_inner(|inner| {
            inner.session_async(move |inner| inner.finish_recording(&destination, error));
        });
    }
}

/// Forward property changes of `input` through the session queue, where
/// `Status` is refreshed before observers hear about the new value.
pub(super) fn observe_device(inner: &Arc<Inner>, input: &DeviceInput) -> Observation {
    let weak = Arc::downgrade(inner);
    input.device().observe(Arc::new(move |device: &DeviceId, change: PropertyChange| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let published = match change {
            PropertyChange::ZoomFactor(zoom) => PublishedChange::ZoomFactor(zoom),
            PropertyChange::FocusPointOfInterest(point) => PublishedChange::FocusPoint(point),
            PropertyChange::ExposurePointOfInterest(point) => {
                PublishedChange::ExposurePoint(point)
            }
            PropertyChange::AdjustingFocus(adjusting) => {
                debug!("{} adjusting focus: {}", device, adjusting);
                return;
            }
            PropertyChange::AdjustingExposure(adjusting) => {
                debug!("{} adjusting exposure: {}", device, adjusting);
                return;
            }
            PropertyChange::AdjustingWhiteBalance(adjusting) => {
                debug!("{} adjusting white balance: {}", device, adjusting);
                return;
            }
        };
        let device = device.clone();
        inner.session_async(move |inner| inner.device_property_changed(&device, published));
    }))
}

impl Inner {
    /// Session queue: settle `Status` from the hardware, then publish.
    fn device_property_changed(self: &Arc<Self>, device: &DeviceId, change: PublishedChange) {
        {
            let guard = self.hardware.lock();
            let Some(hardware) = guard.as_ref() else {
                return;
            };
            self.refresh_status(hardware);
        }
        if self.status.read().video_input.as_ref() != Some(device) {
            trace!("Ignoring {:?} on inactive {}", change, device);
            return;
        }
        self.publish(change);
    }
}
