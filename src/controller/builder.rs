use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Inner, SimpleCamera, Status};
use crate::config::SimpleCameraConfig;
use crate::converter::{FrameConverter, ImageConverter};
use crate::error::{CameraError, Result};
use crate::events::EventBus;
use crate::hardware::CaptureBackend;
use crate::observer::{ObserverHub, PublishedState};
use crate::orientation::{GravityOrientationDetector, OrientationSource};
use crate::queue::SerialQueue;

/// Builder for a [`SimpleCamera`] controller
pub struct SimpleCameraBuilder {
    backend: Option<Arc<dyn CaptureBackend>>,
    orientation: Option<Arc<dyn OrientationSource>>,
    converter: Option<Arc<dyn FrameConverter>>,
    config: SimpleCameraConfig,
}

impl SimpleCameraBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            orientation: None,
            converter: None,
            config: SimpleCameraConfig::default(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Defaults to a [`GravityOrientationDetector`]
    pub fn orientation_source(mut self, source: Arc<dyn OrientationSource>) -> Self {
        self.orientation = Some(source);
        self
    }

    /// Defaults to [`ImageConverter`]
    pub fn converter(mut self, converter: Arc<dyn FrameConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn config(mut self, config: SimpleCameraConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the controller queues. Nothing touches the hardware until
    /// [`SimpleCamera::configure`] or [`SimpleCamera::start_running`].
    pub fn build(self) -> Result<SimpleCamera> {
        let backend = self
            .backend
            .ok_or_else(|| CameraError::system("Camera backend must be specified"))?;
        self.config.validate()?;

        let config = self.config;
        let orientation = self.orientation.unwrap_or_else(|| {
            Arc::new(GravityOrientationDetector::with_interval(
                config.orientation.sensor_interval(),
            ))
        });
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(ImageConverter));

        let session = backend.create_session();
        let inner = Inner {
            backend,
            session,
            session_queue: SerialQueue::new("simplecam.session")?,
            frame_queue: SerialQueue::new("simplecam.frames")?,
            main_queue: SerialQueue::new("simplecam.main")?,
            hardware: Mutex::new(None),
            status: RwLock::new(Status::default()),
            settings: RwLock::new(config.camera.clone()),
            pending: Mutex::new(Default::default()),
            published: Mutex::new(PublishedState::default()),
            observers: ObserverHub::new(),
            orientation,
            converter,
            events: EventBus::new(config.system.event_bus_capacity),
            settle_delay: config.recording.settle_delay(),
        };

        debug!("Controller settings: {:?}", config.camera);
        info!("Camera controller created");
        Ok(SimpleCamera {
            inner: Arc::new(inner),
        })
    }
}

impl Default for SimpleCameraBuilder {
    fn default() -> Self {
        Self::new()
    }
}
