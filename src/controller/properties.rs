//! Zoom, focus and exposure of the active camera

use std::sync::Arc;
use tracing::{debug, warn};

use super::{Hardware, Inner, PublishedChange, SimpleCamera};
use crate::device::{with_device_lock, ExposureMode, FocusMode, Point};
use crate::error::HardwareResult;
use crate::events::CameraEventKind;
use crate::hardware::CaptureDevice;
use crate::observer::LifecycleEvent;

pub const MIN_ZOOM_FACTOR: f64 = 1.0;

impl SimpleCamera {
    /// Last settled zoom factor of the active camera
    pub fn zoom_factor(&self) -> f64 {
        self.inner.status.read().zoom_factor
    }

    pub fn min_zoom_factor(&self) -> f64 {
        MIN_ZOOM_FACTOR
    }

    /// The lesser of the device capability and the configured limit
    pub fn max_zoom_factor(&self) -> f64 {
        self.inner.max_zoom_factor()
    }

    /// Set the zoom factor, clamped to `[min_zoom_factor, max_zoom_factor]`.
    ///
    /// Blocks until the device reports the new value. NaN is ignored.
    pub fn set_zoom_factor(&self, factor: f64) {
        if factor.is_nan() {
            warn!("Ignoring NaN zoom factor");
            return;
        }
        self.inner.session_sync(move |inner| {
            let guard = inner.hardware.lock();
            if let Some(hardware) = guard.as_ref() {
                let target = factor.clamp(MIN_ZOOM_FACTOR, inner.max_zoom_factor());
                inner.apply_zoom(hardware, target);
            }
        });
    }

    pub fn zoom_factor_limit(&self) -> f64 {
        self.inner.settings.read().zoom_factor_limit
    }

    /// Change the configured zoom ceiling, re-clamping the live zoom if it
    /// is now above the ceiling.
    pub fn set_zoom_factor_limit(&self, limit: f64) {
        if !limit.is_finite() {
            warn!("Ignoring zoom factor limit {}", limit);
            return;
        }
        self.inner.settings.write().zoom_factor_limit = limit.max(MIN_ZOOM_FACTOR);

        self.inner.session_sync(|inner| {
            let guard = inner.hardware.lock();
            let Some(hardware) = guard.as_ref() else {
                return;
            };
            let max = inner.max_zoom_factor();
            if inner.status.read().zoom_factor > max {
                debug!("Re-clamping zoom to new limit {}", max);
                inner.apply_zoom(hardware, max);
            }
        });
    }

    pub fn focus_point_of_interest(&self) -> Option<Point> {
        self.inner.status.read().focus_point
    }

    pub fn exposure_point_of_interest(&self) -> Option<Point> {
        self.inner.status.read().exposure_point
    }

    /// Focus at `point` (normalized sensor coordinates).
    ///
    /// Best effort: skipped when the device lacks point-of-interest or `mode`
    /// support, though subject-area monitoring is still set as requested.
    pub fn focus(&self, point: Point, mode: FocusMode, monitor_subject_area: bool) {
        self.inner.session_async(move |inner| {
            inner.adjust_active_device(monitor_subject_area, |device| {
                apply_focus(device, point.clamped(), mode)
            });
        });
    }

    /// Meter exposure at `point`; same rules as [`SimpleCamera::focus`].
    pub fn exposure(&self, point: Point, mode: ExposureMode, monitor_subject_area: bool) {
        self.inner.session_async(move |inner| {
            inner.adjust_active_device(monitor_subject_area, |device| {
                apply_exposure(device, point.clamped(), mode)
            });
        });
    }

    /// Focus and exposure at the same point under a single device lock
    pub fn focus_and_exposure(
        &self,
        point: Point,
        focus_mode: FocusMode,
        exposure_mode: ExposureMode,
        monitor_subject_area: bool,
    ) {
        self.inner.session_async(move |inner| {
            let point = point.clamped();
            inner.adjust_active_device(monitor_subject_area, |device| {
                apply_focus(device, point, focus_mode)?;
                apply_exposure(device, point, exposure_mode)
            });
        });
    }

    /// Recenter focus and exposure in continuous mode.
    ///
    /// Observers get `did_reset_focus_and_exposure` even if nothing changed.
    pub fn reset_focus_and_exposure(&self) {
        self.inner.session_async(|inner| {
            let guard = inner.hardware.lock();
            if let Some(hardware) = guard.as_ref() {
                inner.reset_focus_and_exposure(hardware);
            }
        });
    }
}

impl Inner {
    pub(super) fn max_zoom_factor(&self) -> f64 {
        let limit = self.settings.read().zoom_factor_limit;
        match self.status.read().device_max_zoom {
            Some(device_max) => limit.min(device_max).max(MIN_ZOOM_FACTOR),
            None => MIN_ZOOM_FACTOR,
        }
    }

    /// Set the active camera's zoom and publish what it settled on.
    fn apply_zoom(self: &Arc<Self>, hardware: &Hardware, factor: f64) {
        let Some(input) = hardware.graph.video_input() else {
            return;
        };
        let device = input.device();
        if let Err(e) = with_device_lock(device.as_ref(), |device| device.set_zoom_factor(factor)) {
            warn!("Failed to set zoom factor {} on {}: {}", factor, input.id(), e);
        }
        let settled = device.zoom_factor();
        self.refresh_status(hardware);
        self.publish(PublishedChange::ZoomFactor(settled));
    }

    pub(super) fn reset_zoom(self: &Arc<Self>, hardware: &Hardware) {
        self.apply_zoom(hardware, MIN_ZOOM_FACTOR);
    }

    pub(super) fn reset_focus_and_exposure(self: &Arc<Self>, hardware: &Hardware) {
        if let Some(input) = hardware.graph.video_input() {
            let result = with_device_lock(input.device().as_ref(), |device| {
                let focus_mode = [FocusMode::ContinuousAutoFocus, FocusMode::AutoFocus]
                    .into_iter()
                    .find(|mode| device.supports_focus_mode(*mode));
                if let Some(mode) = focus_mode {
                    apply_focus(device, Point::CENTER, mode)?;
                }

                let exposure_mode = [ExposureMode::ContinuousAutoExposure, ExposureMode::AutoExpose]
                    .into_iter()
                    .find(|mode| device.supports_exposure_mode(*mode));
                if let Some(mode) = exposure_mode {
                    apply_exposure(device, Point::CENTER, mode)?;
                }

                device.set_subject_area_change_monitoring(true)
            });
            if let Err(e) = result {
                warn!("Failed to reset focus and exposure on {}: {}", input.id(), e);
            }
            self.refresh_status(hardware);
        }

        self.notify(
            LifecycleEvent::FocusAndExposureReset,
            CameraEventKind::FocusAndExposureReset,
        );
    }

    /// Lock the active camera, run `adjust`, then set subject-area monitoring.
    fn adjust_active_device<F>(&self, monitor_subject_area: bool, adjust: F)
    where
        F: FnOnce(&dyn CaptureDevice) -> HardwareResult<()>,
    {
        let guard = self.hardware.lock();
        let Some(hardware) = guard.as_ref() else {
            return;
        };
        let Some(input) = hardware.graph.video_input() else {
            return;
        };
        let result = with_device_lock(input.device().as_ref(), |device| {
            adjust(device)?;
            device.set_subject_area_change_monitoring(monitor_subject_area)
        });
        if let Err(e) = result {
            warn!("Device adjustment on {} failed: {}", input.id(), e);
        }
        self.refresh_status(hardware);
    }
}

/// Apply focus when supported; unsupported combinations are a silent no-op.
fn apply_focus(device: &dyn CaptureDevice, point: Point, mode: FocusMode) -> HardwareResult<()> {
    if !device.supports_focus_point_of_interest() || !device.supports_focus_mode(mode) {
        debug!("{} cannot focus with {:?}", device.id(), mode);
        return Ok(());
    }
    device.set_focus(point, mode)
}

fn apply_exposure(
    device: &dyn CaptureDevice,
    point: Point,
    mode: ExposureMode,
) -> HardwareResult<()> {
    if !device.supports_exposure_point_of_interest() || !device.supports_exposure_mode(mode) {
        debug!("{} cannot expose with {:?}", device.id(), mode);
        return Ok(());
    }
    device.set_exposure(point, mode)
}
