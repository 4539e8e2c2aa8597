//! Still photo and silent (video frame) capture
//!
//! At most one request of each kind is outstanding. The still path goes
//! through the photo output; the silent path grabs the next raw video frame.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Inner, SimpleCamera};
use crate::converter::CapturedImage;
use crate::device::DevicePosition;
use crate::error::HardwareResult;
use crate::events::CameraEventKind;
use crate::frame::{CaptureMetadata, FrameBuffer, Photo};
use crate::hardware::OutputKind;
use crate::orientation::ImageOrientation;

/// A captured image plus the attachments that came with it
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub image: CapturedImage,
    pub metadata: CaptureMetadata,
}

/// Called exactly once per accepted request, on the main queue.
/// `None` means the capture failed or was rejected.
pub type CaptureCompletion = Box<dyn FnOnce(Option<CaptureResult>) + Send + 'static>;

pub(super) struct PendingCapture {
    id: Uuid,
    /// Handed to the hardware; only then can a photo callback belong to it
    submitted: bool,
    completion: CaptureCompletion,
}

#[derive(Default)]
pub(super) struct PendingCaptures {
    pub(super) still: Option<PendingCapture>,
    pub(super) silent: Option<PendingCapture>,
}

impl PendingCaptures {
    /// Forget outstanding requests without calling their completions.
    pub(super) fn clear(&mut self) {
        let still = self.still.take();
        let silent = self.silent.take();
        if still.is_some() || silent.is_some() {
            debug!("Dropped outstanding capture requests");
        }
    }

    fn submitted_still(&mut self) -> Option<PendingCapture> {
        match &self.still {
            Some(pending) if pending.submitted => self.still.take(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureKind {
    Still,
    Silent,
}

impl SimpleCamera {
    /// Take a still photo through the photo output.
    ///
    /// Rejected with `None` while recording, while not running or while
    /// another still capture is outstanding.
    pub fn capture_photo_image<F>(&self, completion: F)
    where
        F: FnOnce(Option<CaptureResult>) + Send + 'static,
    {
        let Some(id) = self.inner.accept_capture(CaptureKind::Still, Box::new(completion)) else {
            return;
        };

        self.inner.session_async(move |inner| {
            let orientation = inner.capture_orientation();
            {
                let mut guard = inner.hardware.lock();
                if let Some(hardware) = guard.as_mut() {
                    hardware
                        .graph
                        .transaction()
                        .set_orientation(OutputKind::Photo, orientation);
                }
            }
            match inner.pending.lock().still.as_mut() {
                Some(pending) if pending.id == id => pending.submitted = true,
                _ => return,
            }
            debug!("Capturing photo {} ({:?})", id, orientation);
            if let Err(e) = inner.session.capture_photo() {
                warn!("Photo capture {} could not start: {}", id, e);
                inner.fail_still();
            }
        });
    }

    #[deprecated(note = "use capture_photo_image")]
    pub fn capture_still_image<F>(&self, completion: F)
    where
        F: FnOnce(Option<CaptureResult>) + Send + 'static,
    {
        self.capture_photo_image(completion)
    }

    /// Capture the next raw video frame as an image, without shutter sound.
    ///
    /// Rejected with `None` while recording, while not running or while
    /// another silent capture is outstanding.
    pub fn capture_silent_image<F>(&self, completion: F)
    where
        F: FnOnce(Option<CaptureResult>) + Send + 'static,
    {
        if let Some(id) = self.inner.accept_capture(CaptureKind::Silent, Box::new(completion)) {
            debug!("Silent capture {} waiting for the next frame", id);
        }
    }

    pub async fn capture_photo_image_async(&self) -> Option<CaptureResult> {
        let (tx, rx) = oneshot::channel();
        self.capture_photo_image(move |result| {
            let _ = tx.send(result);
        });
        rx.await.ok().flatten()
    }

    pub async fn capture_silent_image_async(&self) -> Option<CaptureResult> {
        let (tx, rx) = oneshot::channel();
        self.capture_silent_image(move |result| {
            let _ = tx.send(result);
        });
        rx.await.ok().flatten()
    }

    /// Whether a still or silent capture is outstanding
    pub fn is_capturing_image(&self) -> bool {
        let pending = self.inner.pending.lock();
        pending.still.is_some() || pending.silent.is_some()
    }

    /// Orientation tag applied to images made from raw video frames
    pub fn preferred_image_orientation_for_video_output(&self) -> ImageOrientation {
        self.inner.preferred_video_orientation()
    }
}

impl Inner {
    /// Check the capture preconditions and register the request.
    ///
    /// A rejected completion gets `None` on the main queue.
    fn accept_capture(
        self: &Arc<Self>,
        kind: CaptureKind,
        completion: CaptureCompletion,
    ) -> Option<Uuid> {
        let mut pending = self.pending.lock();
        let rejection = {
            let status = self.status.read();
            if !status.configured {
                Some("controller is not configured")
            } else if status.modes.is_recording() {
                Some("a movie is being recorded")
            } else {
                None
            }
        };
        let rejection =
            rejection.or_else(|| (!self.session.is_running()).then_some("session is not running"));

        let slot = match kind {
            CaptureKind::Still => &mut pending.still,
            CaptureKind::Silent => &mut pending.silent,
        };
        let rejection =
            rejection.or_else(|| slot.is_some().then_some("another capture is outstanding"));

        if let Some(reason) = rejection {
            drop(pending);
            info!("{:?} capture rejected: {}", kind, reason);
            self.complete_capture(Uuid::new_v4(), kind, completion, None);
            return None;
        }

        let id = Uuid::new_v4();
        *slot = Some(PendingCapture {
            id,
            submitted: false,
            completion,
        });
        Some(id)
    }

    /// Deliver `result` on the main queue and mirror it on the event bus.
    fn complete_capture(
        self: &Arc<Self>,
        id: Uuid,
        kind: CaptureKind,
        completion: CaptureCompletion,
        result: Option<CaptureResult>,
    ) {
        self.emit(CameraEventKind::ImageCaptured {
            request_id: id,
            silent: kind == CaptureKind::Silent,
            success: result.is_some(),
        });
        self.main_queue.run_async(move || completion(result));
    }

    pub(super) fn photo_processed(self: &Arc<Self>, result: HardwareResult<Photo>) {
        let Some(pending) = self.pending.lock().submitted_still() else {
            debug!("Photo arrived without a pending request");
            return;
        };

        let image = match result {
            Ok(photo) => {
                let limit = self.settings.read().capture_limit();
                self.converter
                    .decode_photo(&photo.data, ImageOrientation::Up, limit)
                    .map(|image| CaptureResult {
                        image: self.mirror_if_front(image),
                        metadata: photo.metadata,
                    })
            }
            Err(e) => {
                warn!("Photo {} failed: {}", pending.id, e);
                None
            }
        };
        self.complete_capture(pending.id, CaptureKind::Still, pending.completion, image);
    }

    /// The photo pipeline is done; a request still pending never got a photo.
    pub(super) fn photo_capture_finished(self: &Arc<Self>) {
        let pending = self.pending.lock().submitted_still();
        if let Some(pending) = pending {
            warn!("Photo capture {} finished without a result", pending.id);
            self.complete_capture(pending.id, CaptureKind::Still, pending.completion, None);
        }
    }

    fn fail_still(self: &Arc<Self>) {
        let pending = self.pending.lock().submitted_still();
        if let Some(pending) = pending {
            self.complete_capture(pending.id, CaptureKind::Still, pending.completion, None);
        }
    }

    /// Frame-delivery queue: serve a pending silent capture, then fan out.
    pub(super) fn deliver_video(self: &Arc<Self>, frame: FrameBuffer) {
        let pending = self.pending.lock().silent.take();
        if let Some(pending) = pending {
            let orientation = self.preferred_video_orientation();
            let limit = self.settings.read().capture_limit();
            let result = self
                .converter
                .convert(&frame, orientation, limit)
                .map(|image| CaptureResult {
                    image,
                    metadata: frame.attachments.clone(),
                });
            debug!("Silent capture {} served from frame {}", pending.id, frame.id);
            self.complete_capture(pending.id, CaptureKind::Silent, pending.completion, result);
        }

        self.observers.dispatch_video(&frame);
    }

    fn preferred_video_orientation(&self) -> ImageOrientation {
        if !self.is_running() {
            return ImageOrientation::Up;
        }
        let orientation = ImageOrientation::from(self.capture_orientation());
        if self.status.read().video_position != Some(DevicePosition::Front) {
            return orientation;
        }
        let orientation = orientation.swap_left_right();
        if self.settings.read().mirror_front_camera {
            orientation.mirrored()
        } else {
            orientation
        }
    }

    fn mirror_if_front(&self, image: CapturedImage) -> CapturedImage {
        let front = self.status.read().video_position == Some(DevicePosition::Front);
        if front && self.settings.read().mirror_front_camera {
            image.mirrored()
        } else {
            image
        }
    }
}
