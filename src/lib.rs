pub mod config;
pub mod controller;
pub mod converter;
pub mod device;
pub mod error;
pub mod events;
pub mod frame;
pub mod hardware;
pub mod observer;
pub mod orientation;
pub mod queue;
pub mod session;

pub use config::SimpleCameraConfig;
pub use controller::{CaptureCompletion, CaptureResult, SimpleCamera, SimpleCameraBuilder};
pub use converter::{CapturedImage, FrameConverter, ImageConverter, SizeLimit};
pub use device::{DeviceFormat, DeviceId, DevicePosition, ExposureMode, FocusMode, Point};
pub use error::{CameraError, HardwareError, Result};
pub use events::{
    CameraEvent, CameraEventKind, EventBus, EventCategory, EventFilter, EventReceiver,
};
pub use frame::{AudioBuffer, CaptureMetadata, FrameBuffer, PixelFormat};
pub use hardware::{CaptureBackend, CaptureDevice, CaptureSession, OutputKind, VirtualBackend};
pub use observer::{AudioFrameObserver, CameraObserver, VideoFrameObserver};
pub use orientation::{
    CaptureOrientation, DeviceOrientation, FixedOrientation, GravityOrientationDetector,
    ImageOrientation, OrientationSource,
};
pub use queue::SerialQueue;
pub use session::{CameraMode, GraphSnapshot};
