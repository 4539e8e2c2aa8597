use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::converter::SizeLimit;
use crate::error::Result;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimpleCameraConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub orientation: OrientationConfig,
    #[serde(default)]
    pub virtual_backend: VirtualBackendConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Upper bound for the zoom factor, further capped by the device
    #[serde(default = "default_zoom_factor_limit")]
    pub zoom_factor_limit: f64,

    /// Maximum captured image size (width, height); 0 means unconstrained
    #[serde(default = "default_capture_limit_size")]
    pub capture_limit_size: (u32, u32),

    /// Mirror images taken with the front camera
    #[serde(default)]
    pub mirror_front_camera: bool,

    /// Rotate captures with the device instead of keeping them portrait
    #[serde(default = "default_follow_device_orientation")]
    pub follow_device_orientation: bool,

    /// Attach the microphone in movie mode
    #[serde(default)]
    pub audio_recording_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecordingConfig {
    /// Delay between swapping outputs and starting the movie writer
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OrientationConfig {
    /// Gravity sampling interval for the orientation detector
    #[serde(default = "default_sensor_interval_ms")]
    pub sensor_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VirtualBackendConfig {
    /// Raw frame size produced by the in-memory camera
    #[serde(default = "default_frame_size")]
    pub frame_size: (u32, u32),

    /// Interval of the frame pump
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl CameraConfig {
    pub fn capture_limit(&self) -> SizeLimit {
        SizeLimit::new(self.capture_limit_size.0, self.capture_limit_size.1)
    }
}

impl RecordingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl OrientationConfig {
    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms)
    }
}

impl VirtualBackendConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl SimpleCameraConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from_file("simplecam.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// Environment overrides use the `SIMPLECAM_` prefix and `__` between
    /// nesting levels, e.g. `SIMPLECAM_CAMERA__ZOOM_FACTOR_LIMIT=4`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.zoom_factor_limit", default_zoom_factor_limit())?
            .set_default(
                "camera.capture_limit_size",
                vec![
                    default_capture_limit_size().0,
                    default_capture_limit_size().1,
                ],
            )?
            .set_default("camera.mirror_front_camera", false)?
            .set_default(
                "camera.follow_device_orientation",
                default_follow_device_orientation(),
            )?
            .set_default("camera.audio_recording_enabled", false)?
            .set_default("recording.settle_delay_ms", default_settle_delay_ms())?
            .set_default(
                "orientation.sensor_interval_ms",
                default_sensor_interval_ms(),
            )?
            .set_default(
                "virtual_backend.frame_size",
                vec![default_frame_size().0, default_frame_size().1],
            )?
            .set_default(
                "virtual_backend.frame_interval_ms",
                default_frame_interval_ms(),
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("SIMPLECAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SimpleCameraConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.camera.zoom_factor_limit.is_finite() || self.camera.zoom_factor_limit < 1.0 {
            return Err(ConfigError::Message(
                "Zoom factor limit must be at least 1.0".to_string(),
            ));
        }

        if self.orientation.sensor_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Orientation sensor interval must be greater than 0".to_string(),
            ));
        }

        let (width, height) = self.virtual_backend.frame_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::Message(
                "Virtual frame size must be greater than 0".to_string(),
            ));
        }

        if self.virtual_backend.frame_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Virtual frame interval must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render as TOML, e.g. to seed a configuration file
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            zoom_factor_limit: default_zoom_factor_limit(),
            capture_limit_size: default_capture_limit_size(),
            mirror_front_camera: false,
            follow_device_orientation: default_follow_device_orientation(),
            audio_recording_enabled: false,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            sensor_interval_ms: default_sensor_interval_ms(),
        }
    }
}

impl Default for VirtualBackendConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl Default for SimpleCameraConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            recording: RecordingConfig::default(),
            orientation: OrientationConfig::default(),
            virtual_backend: VirtualBackendConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

// Default value functions
fn default_zoom_factor_limit() -> f64 {
    6.0
}
fn default_capture_limit_size() -> (u32, u32) {
    (0, 0)
}
fn default_follow_device_orientation() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    crate::controller::RECORDING_SETTLE_DELAY.as_millis() as u64
}

fn default_sensor_interval_ms() -> u64 {
    crate::orientation::DEFAULT_SENSOR_INTERVAL.as_millis() as u64
}

fn default_frame_size() -> (u32, u32) {
    crate::hardware::virtual_backend::DEFAULT_FRAME_SIZE
}
fn default_frame_interval_ms() -> u64 {
    33
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SimpleCameraConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.camera.zoom_factor_limit, 6.0);
        assert!(config.camera.capture_limit().is_unlimited());
        assert!(config.camera.follow_device_orientation);
        assert!(!config.camera.mirror_front_camera);
        assert_eq!(config.recording.settle_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[camera]\nzoom_factor_limit = 3.5\ncapture_limit_size = [1024, 0]\nmirror_front_camera = true"
        )
        .unwrap();

        let config = SimpleCameraConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.zoom_factor_limit, 3.5);
        assert_eq!(config.camera.capture_limit(), SizeLimit::new(1024, 0));
        assert!(config.camera.mirror_front_camera);
        assert!(config.camera.follow_device_orientation);
        assert_eq!(config.system.event_bus_capacity, 100);
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("SIMPLECAM_RECORDING__SETTLE_DELAY_MS", "50");

        let config = SimpleCameraConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.recording.settle_delay_ms, 50);

        env::remove_var("SIMPLECAM_RECORDING__SETTLE_DELAY_MS");
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimpleCameraConfig::default();
        config.camera.zoom_factor_limit = 0.5;
        assert!(config.validate().is_err());

        config.camera.zoom_factor_limit = 2.0;
        config.system.event_bus_capacity = 0;
        assert!(config.validate().is_err());

        config.system.event_bus_capacity = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_renders_as_toml() {
        let rendered = SimpleCameraConfig::default().to_toml().unwrap();
        assert!(rendered.contains("zoom_factor_limit = 6.0"));
        assert!(rendered.contains("[recording]"));
    }
}
