use std::ops::Deref;
use tracing::trace;

use crate::error::HardwareResult;
use crate::hardware::CaptureDevice;

/// Exclusive configuration lock on a device, released on drop.
pub struct DeviceLock<'a> {
    device: &'a dyn CaptureDevice,
}

impl<'a> DeviceLock<'a> {
    pub fn acquire(device: &'a dyn CaptureDevice) -> HardwareResult<Self> {
        device.lock_for_configuration()?;
        trace!("Locked {} for configuration", device.id());
        Ok(Self { device })
    }
}

impl<'a> Deref for DeviceLock<'a> {
    type Target = dyn CaptureDevice + 'a;

    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl Drop for DeviceLock<'_> {
    fn drop(&mut self) {
        self.device.unlock_for_configuration();
        trace!("Unlocked {}", self.device.id());
    }
}

/// Run `f` with `device` locked; the lock is released on every exit path.
pub fn with_device_lock<T, F>(device: &dyn CaptureDevice, f: F) -> HardwareResult<T>
where
    F: FnOnce(&dyn CaptureDevice) -> HardwareResult<T>,
{
    let lock = DeviceLock::acquire(device)?;
    f(&*lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use crate::error::HardwareError;
    use crate::hardware::{VirtualDevice, VirtualDeviceSpec};

    fn device() -> VirtualDevice {
        VirtualDevice::new(VirtualDeviceSpec::back_camera(
            "back-wide",
            DeviceType::WideAngleCamera,
        ))
    }

    #[test]
    fn test_lock_derefs_to_device_and_unlocks_on_drop() {
        let device = device();
        {
            let lock = DeviceLock::acquire(&device).unwrap();
            assert_eq!(lock.id().as_str(), "back-wide");
            assert!(lock.set_zoom_factor(1.0).is_ok());
            assert!(device.is_locked());
        }
        assert!(!device.is_locked());
        assert_eq!(device.lock_count(), 1);
    }

    #[test]
    fn test_with_device_lock_releases_on_error() {
        let device = device();
        let result: HardwareResult<()> = with_device_lock(&device, |locked| {
            Err(HardwareError::NotLocked {
                device: locked.id().clone(),
            })
        });
        assert!(result.is_err());
        assert!(!device.is_locked());
        assert_eq!(device.lock_count(), 1);
    }

    #[test]
    fn test_failed_lock_runs_nothing() {
        let device = device();
        device.set_fail_lock(true);
        let result = with_device_lock(&device, |_| -> HardwareResult<()> {
            panic!("closure must not run without the lock")
        });
        assert!(matches!(result, Err(HardwareError::LockFailed { .. })));
        assert_eq!(device.lock_count(), 0);
    }
}
