//! Capture graph transactions and the mode/recording state machine

pub mod graph;
pub mod state;

pub use graph::{CaptureGraph, GraphSnapshot, GraphTransaction};
pub use state::{CameraMode, ModeState, RecordingState};
