use serde::{Deserialize, Serialize};

use crate::device::AspectRatio;
use crate::hardware::SessionPreset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraMode {
    #[default]
    Unknown,
    Photo,
    Movie,
}

impl CameraMode {
    pub fn target_aspect(&self) -> Option<AspectRatio> {
        match self {
            CameraMode::Unknown => None,
            CameraMode::Photo => Some(AspectRatio::FourByThree),
            CameraMode::Movie => Some(AspectRatio::SixteenByNine),
        }
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        match self {
            CameraMode::Unknown => None,
            CameraMode::Photo => Some(SessionPreset::Photo),
            CameraMode::Movie => Some(SessionPreset::High),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

/// Capture mode and the orthogonal movie recording state.
///
/// `mode` never changes while `recording` is `Recording`, and recording only
/// starts from `Movie` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModeState {
    pub mode: CameraMode,
    pub recording: RecordingState,
}

impl ModeState {
    pub fn is_recording(&self) -> bool {
        self.recording == RecordingState::Recording
    }

    /// Whether switching to `target` would do anything
    pub fn can_switch_to(&self, target: CameraMode) -> bool {
        !self.is_recording() && self.mode != target
    }

    pub fn can_start_recording(&self) -> bool {
        self.mode == CameraMode::Movie && !self.is_recording()
    }

    /// Returns false when the transition is not allowed.
    pub fn switch_to(&mut self, target: CameraMode) -> bool {
        if !self.can_switch_to(target) {
            return false;
        }
        self.mode = target;
        true
    }

    pub fn begin_recording(&mut self) -> bool {
        if !self.can_start_recording() {
            return false;
        }
        self.recording = RecordingState::Recording;
        true
    }

    pub fn finish_recording(&mut self) {
        self.recording = RecordingState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_switch_is_noop_for_same_mode() {
        let mut state = ModeState::default();
        assert!(state.switch_to(CameraMode::Photo));
        assert!(!state.can_switch_to(CameraMode::Photo));
        assert!(!state.switch_to(CameraMode::Photo));
        assert_eq!(state.mode, CameraMode::Photo);
    }

    #[test]
    fn test_recording_requires_movie_mode() {
        let mut state = ModeState::default();
        assert!(!state.begin_recording());
        state.switch_to(CameraMode::Photo);
        assert!(!state.begin_recording());
        state.switch_to(CameraMode::Movie);
        assert!(state.begin_recording());
        assert!(!state.begin_recording());
    }

    #[test]
    fn test_mode_is_pinned_while_recording() {
        let mut state = ModeState {
            mode: CameraMode::Movie,
            recording: RecordingState::Idle,
        };
        assert!(state.begin_recording());
        assert!(!state.switch_to(CameraMode::Photo));
        assert_eq!(state.mode, CameraMode::Movie);

        state.finish_recording();
        assert!(state.switch_to(CameraMode::Photo));
    }

    #[test]
    fn test_mode_targets() {
        assert_eq!(CameraMode::Photo.target_aspect(), Some(AspectRatio::FourByThree));
        assert_eq!(CameraMode::Movie.preset(), Some(SessionPreset::High));
        assert_eq!(CameraMode::Unknown.target_aspect(), None);
    }
}
