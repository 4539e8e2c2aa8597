//! Physical input devices: identity, formats, discovery and locking

pub mod format;
pub mod lock;
pub mod registry;
pub mod types;

pub use format::{select_best_format, AspectRatio, PREFERRED_PIXEL_FORMAT};
pub use lock::{with_device_lock, DeviceLock};
pub use registry::{DeviceInput, DeviceRegistry, BACK_CAMERA_PREFERENCE};
pub use types::{
    DeviceFormat, DeviceId, DeviceKind, DevicePosition, DeviceType, ExposureMode, FocusMode, Point,
};
