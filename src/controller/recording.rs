//! Movie file recording
//!
//! Raw sample outputs and the movie file output are never attached at the
//! same time: starting a recording swaps them out, finishing swaps them back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ActiveRecording, Hardware, Inner, SimpleCamera};
use crate::error::HardwareError;
use crate::events::CameraEventKind;
use crate::hardware::OutputKind;
use crate::orientation::CaptureOrientation;

/// Pause between swapping outputs and starting the movie writer, while the
/// hardware rebuilds its pipelines.
pub const RECORDING_SETTLE_DELAY: Duration = Duration::from_millis(300);

impl SimpleCamera {
    /// Start recording a movie to `destination`.
    ///
    /// Returns false unless in movie mode, not already recording, no capture
    /// is outstanding, the destination is a writable file path and the movie
    /// output attaches.
    /// Writing begins after [`RECORDING_SETTLE_DELAY`] (or the configured
    /// delay).
    pub fn start_record_movie<P: AsRef<Path>>(&self, destination: P) -> bool {
        let destination = destination.as_ref().to_path_buf();
        if !is_valid_destination(&destination) {
            warn!("Invalid recording destination {}", destination.display());
            return false;
        }
        self.inner
            .session_sync(move |inner| inner.begin_recording(destination))
    }

    /// Stop the current recording. A recording stopped before its writer
    /// started finishes with an error.
    pub fn stop_record_movie(&self) {
        self.inner.session_async(|inner| {
            let Some(recording) = inner.status.read().recording.clone() else {
                debug!("Stop requested without an active recording");
                return;
            };
            if recording.writing {
                inner.session.stop_recording();
                return;
            }
            info!("Recording stopped before it started");
            let mut guard = inner.hardware.lock();
            if let Some(hardware) = guard.as_mut() {
                inner.complete_recording(
                    hardware,
                    Some("stopped before recording started".to_string()),
                );
            }
        });
    }
}

impl Inner {
    fn begin_recording(self: &Arc<Self>, destination: PathBuf) -> bool {
        let mut guard = self.hardware.lock();
        let Some(hardware) = guard.as_mut() else {
            return false;
        };
        // Held until the mode flips so no capture can register in between.
        let pending = self.pending.lock();
        if pending.still.is_some() || pending.silent.is_some() {
            info!("Recording refused while a capture is outstanding");
            return false;
        }
        {
            let status = self.status.read();
            if !status.configured || !status.modes.can_start_recording() {
                debug!("Recording not allowed in {:?}", status.modes);
                return false;
            }
        }
        if !self.session.can_add_output(OutputKind::MovieFile) {
            warn!("Session cannot add the movie output");
            return false;
        }

        let orientation = self.capture_orientation();
        let attached = {
            let mut tx = hardware.graph.transaction();
            tx.remove_output(OutputKind::VideoData);
            tx.remove_output(OutputKind::AudioData);
            if tx.add_output(OutputKind::MovieFile) {
                tx.set_orientation(OutputKind::MovieFile, orientation);
                true
            } else {
                restore_sample_outputs(&mut tx);
                false
            }
        };
        self.refresh_status(hardware);
        if !attached {
            return false;
        }

        let token = {
            let mut status = self.status.write();
            let began = status.modes.begin_recording();
            debug_assert!(began, "recording preconditions checked above");
            let token = status.next_recording_token;
            status.next_recording_token += 1;
            status.recording = Some(ActiveRecording {
                destination: destination.clone(),
                token,
                writing: false,
            });
            token
        };
        drop(pending);
        info!(
            "Recording to {} in {:?}",
            destination.display(),
            self.settle_delay
        );

        let weak = Arc::downgrade(self);
        self.session_queue.run_after(self.settle_delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.start_writer(token);
            }
        });
        true
    }

    /// Session queue, after the settle delay
    fn start_writer(self: &Arc<Self>, token: u64) {
        let mut guard = self.hardware.lock();
        let Some(hardware) = guard.as_mut() else {
            return;
        };
        let destination = match &self.status.read().recording {
            Some(recording) if recording.token == token && !recording.writing => {
                recording.destination.clone()
            }
            _ => {
                debug!("Recording {} was cancelled before it started", token);
                return;
            }
        };

        match self.session.start_recording(&destination) {
            Ok(()) => {
                if let Some(recording) = self.status.write().recording.as_mut() {
                    recording.writing = true;
                }
                self.emit(CameraEventKind::RecordingStarted { destination });
            }
            Err(e) => {
                warn!("Movie writer failed to start: {}", e);
                self.complete_recording(hardware, Some(e.to_string()));
            }
        }
    }

    /// Session queue, once the hardware has closed the movie file
    pub(super) fn finish_recording(
        self: &Arc<Self>,
        destination: &Path,
        error: Option<HardwareError>,
    ) {
        if self.status.read().recording.is_none() {
            debug!("Ignoring stale recording result for {}", destination.display());
            return;
        }
        let mut guard = self.hardware.lock();
        if let Some(hardware) = guard.as_mut() {
            self.complete_recording(hardware, error.map(|e| e.to_string()));
        }
    }

    /// Clear the recording state and put the raw sample outputs back.
    fn complete_recording(self: &Arc<Self>, hardware: &mut Hardware, error: Option<String>) {
        let recording = {
            let mut status = self.status.write();
            status.modes.finish_recording();
            status.recording.take()
        };
        let Some(recording) = recording else {
            return;
        };

        {
            let mut tx = hardware.graph.transaction();
            tx.remove_output(OutputKind::MovieFile);
            restore_sample_outputs(&mut tx);
        }
        self.refresh_status(hardware);

        match &error {
            Some(error) => warn!(
                "Recording {} finished with error: {}",
                recording.destination.display(),
                error
            ),
            None => info!("Recording {} finished", recording.destination.display()),
        }
        self.emit(CameraEventKind::RecordingFinished {
            destination: recording.destination,
            error,
        });
    }
}

fn restore_sample_outputs(tx: &mut crate::session::GraphTransaction<'_>) {
    for output in [OutputKind::VideoData, OutputKind::AudioData] {
        if !tx.add_output(output) {
            warn!("Could not restore {:?} output", output);
        }
    }
    tx.set_orientation(OutputKind::VideoData, CaptureOrientation::Portrait);
}

/// A local file path whose parent directory exists
fn is_valid_destination(path: &Path) -> bool {
    if path.file_name().is_none() || path.is_dir() {
        return false;
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
        _ => true,
    }
}
