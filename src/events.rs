use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::device::{DevicePosition, Point};
use crate::error::EventBusError;
use crate::hardware::InterruptionReason;
use crate::observer::LifecycleEvent;
use crate::session::CameraMode;

/// Things that happen to a camera controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CameraEventKind {
    StartedRunning,
    StoppedRunning,
    ZoomFactorChanged { zoom_factor: f64 },
    FocusPointChanged { point: Point },
    ExposurePointChanged { point: Point },
    FocusAndExposureReset,
    CameraInputSwitched { position: DevicePosition },
    ModeChanged { mode: CameraMode },
    RecordingStarted { destination: PathBuf },
    RecordingFinished {
        destination: PathBuf,
        error: Option<String>,
    },
    /// A still or silent capture request completed
    ImageCaptured { request_id: Uuid, silent: bool, success: bool },
    Interrupted { reason: InterruptionReason },
    InterruptionEnded,
    RuntimeError { details: String },
}

/// A [`CameraEventKind`] stamped with an id and the time it was raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: CameraEventKind,
}

impl CameraEvent {
    pub fn new(kind: CameraEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match &self.kind {
            CameraEventKind::StartedRunning => "Session started running".to_string(),
            CameraEventKind::StoppedRunning => "Session stopped running".to_string(),
            CameraEventKind::ZoomFactorChanged { zoom_factor } => {
                format!("Zoom factor changed to {:.2}", zoom_factor)
            }
            CameraEventKind::FocusPointChanged { point } => {
                format!("Focus point moved to ({:.2}, {:.2})", point.x, point.y)
            }
            CameraEventKind::ExposurePointChanged { point } => {
                format!("Exposure point moved to ({:.2}, {:.2})", point.x, point.y)
            }
            CameraEventKind::FocusAndExposureReset => "Focus and exposure reset".to_string(),
            CameraEventKind::CameraInputSwitched { position } => {
                format!("Switched to {:?} camera", position)
            }
            CameraEventKind::ModeChanged { mode } => format!("Mode changed to {:?}", mode),
            CameraEventKind::RecordingStarted { destination } => {
                format!("Recording to {}", destination.display())
            }
            CameraEventKind::RecordingFinished { destination, error } => match error {
                Some(error) => format!("Recording {} failed: {}", destination.display(), error),
                None => format!("Recording {} finished", destination.display()),
            },
            CameraEventKind::ImageCaptured {
                request_id,
                silent,
                success,
            } => format!(
                "{} capture {} {}",
                if *silent { "Silent" } else { "Still" },
                request_id,
                if *success { "succeeded" } else { "failed" }
            ),
            CameraEventKind::Interrupted { reason } => {
                format!("Session interrupted: {:?}", reason)
            }
            CameraEventKind::InterruptionEnded => "Session interruption ended".to_string(),
            CameraEventKind::RuntimeError { details } => {
                format!("Session runtime error: {}", details)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match &self.kind {
            CameraEventKind::StartedRunning => "started_running",
            CameraEventKind::StoppedRunning => "stopped_running",
            CameraEventKind::ZoomFactorChanged { .. } => "zoom_factor_changed",
            CameraEventKind::FocusPointChanged { .. } => "focus_point_changed",
            CameraEventKind::ExposurePointChanged { .. } => "exposure_point_changed",
            CameraEventKind::FocusAndExposureReset => "focus_and_exposure_reset",
            CameraEventKind::CameraInputSwitched { .. } => "camera_input_switched",
            CameraEventKind::ModeChanged { .. } => "mode_changed",
            CameraEventKind::RecordingStarted { .. } => "recording_started",
            CameraEventKind::RecordingFinished { .. } => "recording_finished",
            CameraEventKind::ImageCaptured { .. } => "image_captured",
            CameraEventKind::Interrupted { .. } => "interrupted",
            CameraEventKind::InterruptionEnded => "interruption_ended",
            CameraEventKind::RuntimeError { .. } => "runtime_error",
        }
    }

    pub fn category(&self) -> EventCategory {
        match &self.kind {
            CameraEventKind::StartedRunning
            | CameraEventKind::StoppedRunning
            | CameraEventKind::Interrupted { .. }
            | CameraEventKind::InterruptionEnded
            | CameraEventKind::RuntimeError { .. } => EventCategory::Session,
            CameraEventKind::ZoomFactorChanged { .. }
            | CameraEventKind::FocusPointChanged { .. }
            | CameraEventKind::ExposurePointChanged { .. }
            | CameraEventKind::FocusAndExposureReset
            | CameraEventKind::CameraInputSwitched { .. } => EventCategory::Device,
            CameraEventKind::ImageCaptured { .. } => EventCategory::Capture,
            CameraEventKind::ModeChanged { .. }
            | CameraEventKind::RecordingStarted { .. }
            | CameraEventKind::RecordingFinished { .. } => EventCategory::Recording,
        }
    }

    /// Whether this event mirrors a [`LifecycleEvent`] observer callback
    pub fn lifecycle(&self) -> Option<LifecycleEvent> {
        match &self.kind {
            CameraEventKind::StartedRunning => Some(LifecycleEvent::StartedRunning),
            CameraEventKind::StoppedRunning => Some(LifecycleEvent::StoppedRunning),
            CameraEventKind::ZoomFactorChanged { .. } => Some(LifecycleEvent::ZoomFactorChanged),
            CameraEventKind::FocusPointChanged { .. } => Some(LifecycleEvent::FocusPointChanged),
            CameraEventKind::ExposurePointChanged { .. } => {
                Some(LifecycleEvent::ExposurePointChanged)
            }
            CameraEventKind::FocusAndExposureReset => Some(LifecycleEvent::FocusAndExposureReset),
            CameraEventKind::CameraInputSwitched { .. } => {
                Some(LifecycleEvent::CameraInputSwitched)
            }
            CameraEventKind::InterruptionEnded => Some(LifecycleEvent::InterruptionEnded),
            _ => None,
        }
    }
}

impl From<CameraEventKind> for CameraEvent {
    fn from(kind: CameraEventKind) -> Self {
        Self::new(kind)
    }
}

/// Broadcast bus mirroring controller activity to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CameraEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.sender.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            filter,
            skipped: 0,
        }
    }

    /// Publish an event to all subscribers, returning how many received it.
    ///
    /// Never blocks; callable from any thread.
    pub fn publish<E: Into<CameraEvent>>(&self, event: E) -> Result<usize, EventBusError> {
        let event = event.into();

        match &event.kind {
            CameraEventKind::StartedRunning | CameraEventKind::StoppedRunning => {
                info!("{}", event.description());
            }
            CameraEventKind::RecordingFinished { error: Some(_), .. }
            | CameraEventKind::Interrupted { .. }
            | CameraEventKind::RuntimeError { .. } => {
                warn!("{}", event.description());
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Publish without caring whether anyone listens
    pub fn emit(&self, kind: CameraEventKind) {
        if let Err(e) = self.publish(kind) {
            trace!("Event dropped: {}", e);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Broad groups of controller events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Running state, interruptions and runtime errors
    Session,
    /// Zoom, focus, exposure and input changes
    Device,
    /// Still and silent capture completions
    Capture,
    /// Mode switches and movie recording
    Recording,
}

/// Which events a [`EventReceiver`] hands out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Only events that mirror a [`LifecycleEvent`] observer callback
    Lifecycle,
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    pub fn matches(&self, event: &CameraEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Lifecycle => event.lifecycle().is_some(),
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

/// Subscription that skips events outside its filter and rides out lag.
///
/// Created with [`EventBus::subscribe_filtered`].
pub struct EventReceiver {
    receiver: broadcast::Receiver<CameraEvent>,
    filter: EventFilter,
    skipped: u64,
}

impl EventReceiver {
    /// Next matching event, or `None` once the bus is gone.
    ///
    /// Events lost to lag are counted in [`EventReceiver::skipped`].
    pub async fn recv(&mut self) -> Option<CameraEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event receiver lagged, {} events lost", skipped);
                    self.skipped += skipped;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed");
                    return None;
                }
            }
        }
    }

    /// Events lost because this receiver fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(CameraEventKind::ZoomFactorChanged { zoom_factor: 2.0 })
            .unwrap();
        assert_eq!(subscriber_count, 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(
            received.kind,
            CameraEventKind::ZoomFactorChanged { zoom_factor: 2.0 }
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(CameraEventKind::StartedRunning).unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_publish_without_subscribers_is_reported() {
        let event_bus = EventBus::new(4);
        assert!(!event_bus.has_subscribers());
        assert!(event_bus.publish(CameraEventKind::StoppedRunning).is_err());
        event_bus.emit(CameraEventKind::StoppedRunning);
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_categories() {
        let event_bus = EventBus::new(10);
        let mut recording =
            event_bus.subscribe_filtered(EventFilter::Categories(vec![EventCategory::Recording]));
        let mut lifecycle = event_bus.subscribe_filtered(EventFilter::Lifecycle);

        event_bus.publish(CameraEventKind::FocusAndExposureReset).unwrap();
        event_bus
            .publish(CameraEventKind::ModeChanged {
                mode: CameraMode::Movie,
            })
            .unwrap();

        let received = timeout(Duration::from_millis(100), recording.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            received.kind,
            CameraEventKind::ModeChanged {
                mode: CameraMode::Movie
            }
        );
        let received = timeout(Duration::from_millis(100), lifecycle.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, CameraEventKind::FocusAndExposureReset);
        assert!(timeout(Duration::from_millis(20), lifecycle.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_receiver_survives_lag_and_reports_close() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe_filtered(EventFilter::All);
        for _ in 0..5 {
            event_bus.emit(CameraEventKind::InterruptionEnded);
        }
        event_bus.emit(CameraEventKind::StoppedRunning);

        let mut last = None;
        while let Ok(Some(event)) = timeout(Duration::from_millis(20), receiver.recv()).await {
            last = Some(event.kind);
        }
        assert_eq!(last, Some(CameraEventKind::StoppedRunning));
        assert_eq!(receiver.skipped(), 4);

        drop(event_bus);
        assert!(receiver.recv().await.is_none());
    }

    #[test]
    fn test_event_properties() {
        let event = CameraEvent::new(CameraEventKind::ZoomFactorChanged { zoom_factor: 1.5 });
        assert_eq!(event.event_type(), "zoom_factor_changed");
        assert!(event.description().contains("1.50"));
        assert_eq!(event.lifecycle(), Some(LifecycleEvent::ZoomFactorChanged));

        assert_eq!(event.category(), EventCategory::Device);
        assert!(!EventFilter::Categories(vec![EventCategory::Capture]).matches(&event));

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ZoomFactorChanged"));
    }
}
