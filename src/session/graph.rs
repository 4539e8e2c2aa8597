use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::device::{DeviceId, DeviceInput, DevicePosition};
use crate::hardware::{CaptureSession, ConnectionSettings, OutputKind, SessionPreset};
use crate::orientation::CaptureOrientation;

/// Settled copy of the graph, published after every commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub video_input: Option<DeviceId>,
    pub video_position: Option<DevicePosition>,
    pub audio_input: Option<DeviceId>,
    pub outputs: Vec<OutputKind>,
    pub connections: Vec<(OutputKind, ConnectionSettings)>,
    pub preset: Option<SessionPreset>,
}

impl GraphSnapshot {
    pub fn has_output(&self, output: OutputKind) -> bool {
        self.outputs.contains(&output)
    }

    /// Raw frames or a movie writer are attached
    pub fn has_video_output(&self) -> bool {
        self.has_output(OutputKind::VideoData) || self.has_output(OutputKind::MovieFile)
    }
}

/// Live inputs and outputs of the hardware session.
///
/// Read access is free; every mutation goes through a [`GraphTransaction`],
/// so the hardware only ever sees complete begin/commit brackets.
pub struct CaptureGraph {
    session: Arc<dyn CaptureSession>,
    video_input: Option<DeviceInput>,
    audio_input: Option<DeviceInput>,
    outputs: Vec<OutputKind>,
    connections: HashMap<OutputKind, ConnectionSettings>,
    preset: Option<SessionPreset>,
}

impl CaptureGraph {
    pub fn new(session: Arc<dyn CaptureSession>) -> Self {
        Self {
            session,
            video_input: None,
            audio_input: None,
            outputs: Vec::new(),
            connections: HashMap::new(),
            preset: None,
        }
    }

    pub fn session(&self) -> &Arc<dyn CaptureSession> {
        &self.session
    }

    /// Open a configuration bracket; it is committed when the guard drops.
    pub fn transaction(&mut self) -> GraphTransaction<'_> {
        self.session.begin_configuration();
        GraphTransaction { graph: self }
    }

    pub fn video_input(&self) -> Option<&DeviceInput> {
        self.video_input.as_ref()
    }

    pub fn audio_input(&self) -> Option<&DeviceInput> {
        self.audio_input.as_ref()
    }

    pub fn outputs(&self) -> &[OutputKind] {
        &self.outputs
    }

    pub fn has_output(&self, output: OutputKind) -> bool {
        self.outputs.contains(&output)
    }

    pub fn connection(&self, output: OutputKind) -> Option<ConnectionSettings> {
        self.connections.get(&output).copied()
    }

    pub fn preset(&self) -> Option<SessionPreset> {
        self.preset
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut connections: Vec<_> = self.connections.iter().map(|(k, v)| (*k, *v)).collect();
        connections.sort_by_key(|(kind, _)| self.outputs.iter().position(|o| o == kind));
        GraphSnapshot {
            video_input: self.video_input.as_ref().map(|i| i.id().clone()),
            video_position: self.video_input.as_ref().map(|i| i.position()),
            audio_input: self.audio_input.as_ref().map(|i| i.id().clone()),
            outputs: self.outputs.clone(),
            connections,
            preset: self.preset,
        }
    }

    fn input_slot(&mut self, input: &DeviceInput) -> &mut Option<DeviceInput> {
        if input.is_video() {
            &mut self.video_input
        } else {
            &mut self.audio_input
        }
    }
}

/// An open begin/commit bracket on a [`CaptureGraph`].
///
/// Hardware rejections are logged and leave the graph unchanged; the boolean
/// results let callers decide on a fallback.
pub struct GraphTransaction<'a> {
    graph: &'a mut CaptureGraph,
}

impl GraphTransaction<'_> {
    pub fn graph(&self) -> &CaptureGraph {
        self.graph
    }

    /// Attach `input` if its slot is free and the hardware accepts it.
    pub fn add_input(&mut self, input: &DeviceInput) -> bool {
        if self.graph.input_slot(input).is_some() {
            warn!("Input slot for {} is occupied", input.id());
            return false;
        }
        if !self.graph.session.can_add_input(input.device().as_ref()) {
            warn!("Session cannot add input {}", input.id());
            return false;
        }
        match self.graph.session.add_input(Arc::clone(input.device())) {
            Ok(()) => {
                debug!("Attached input {}", input.id());
                *self.graph.input_slot(input) = Some(input.clone());
                true
            }
            Err(e) => {
                warn!("Failed to attach input {}: {}", input.id(), e);
                false
            }
        }
    }

    pub fn remove_video_input(&mut self) -> Option<DeviceInput> {
        let input = self.graph.video_input.take()?;
        self.graph.session.remove_input(input.id());
        // The hardware rebuilds connections for a new video input.
        for settings in self.graph.connections.values_mut() {
            *settings = ConnectionSettings::default();
        }
        debug!("Detached video input {}", input.id());
        Some(input)
    }

    pub fn remove_audio_input(&mut self) -> Option<DeviceInput> {
        let input = self.graph.audio_input.take()?;
        self.graph.session.remove_input(input.id());
        debug!("Detached audio input {}", input.id());
        Some(input)
    }

    /// Replace the video input with `input`, keeping the previous one if the
    /// hardware rejects the new combination. Returns whether `input` is now
    /// attached.
    pub fn switch_video_input(&mut self, input: &DeviceInput) -> bool {
        let previous = self.remove_video_input();
        if self.add_input(input) {
            return true;
        }
        if let Some(previous) = previous {
            if !self.add_input(&previous) {
                warn!("Could not restore previous input {}", previous.id());
            }
        }
        false
    }

    pub fn add_output(&mut self, output: OutputKind) -> bool {
        if self.graph.has_output(output) {
            return true;
        }
        if !self.graph.session.can_add_output(output) {
            warn!("Session cannot add output {:?}", output);
            return false;
        }
        match self.graph.session.add_output(output) {
            Ok(()) => {
                self.graph.outputs.push(output);
                self.graph
                    .connections
                    .insert(output, ConnectionSettings::default());
                true
            }
            Err(e) => {
                warn!("Failed to attach output {:?}: {}", output, e);
                false
            }
        }
    }

    pub fn remove_output(&mut self, output: OutputKind) {
        if self.graph.has_output(output) {
            self.graph.session.remove_output(output);
            self.graph.outputs.retain(|o| *o != output);
            self.graph.connections.remove(&output);
        }
    }

    pub fn set_preset(&mut self, preset: SessionPreset) -> bool {
        if !self.graph.session.can_set_preset(preset) {
            warn!("Session cannot use preset {:?}", preset);
            return false;
        }
        match self.graph.session.set_preset(preset) {
            Ok(()) => {
                self.graph.preset = Some(preset);
                true
            }
            Err(e) => {
                warn!("Failed to set preset {:?}: {}", preset, e);
                false
            }
        }
    }

    pub fn set_connection(&mut self, output: OutputKind, settings: ConnectionSettings) -> bool {
        if !self.graph.has_output(output) {
            return false;
        }
        match self.graph.session.set_connection(output, settings) {
            Ok(()) => {
                self.graph.connections.insert(output, settings);
                true
            }
            Err(e) => {
                warn!("Failed to configure {:?} connection: {}", output, e);
                false
            }
        }
    }

    pub fn set_orientation(&mut self, output: OutputKind, orientation: CaptureOrientation) -> bool {
        let settings = ConnectionSettings {
            orientation,
            ..self.graph.connection(output).unwrap_or_default()
        };
        self.set_connection(output, settings)
    }

    /// Detach every output and input in reverse attachment order
    pub fn clear(&mut self) {
        for output in self.graph.outputs.clone().into_iter().rev() {
            self.remove_output(output);
        }
        self.remove_audio_input();
        self.remove_video_input();
    }
}

impl Drop for GraphTransaction<'_> {
    fn drop(&mut self) {
        self.graph.session.commit_configuration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRegistry;
    use crate::hardware::{CaptureBackend, VirtualBackend, VirtualSession};

    fn fixture() -> (Arc<VirtualSession>, DeviceRegistry, CaptureGraph) {
        let backend = Arc::new(VirtualBackend::new());
        let session = backend.session();
        let registry = DeviceRegistry::discover(backend.clone());
        let graph = CaptureGraph::new(backend.create_session());
        (session, registry, graph)
    }

    #[test]
    fn test_transaction_brackets_mutations() {
        let (session, registry, mut graph) = fixture();
        {
            let mut tx = graph.transaction();
            assert!(session.is_configuring());
            assert!(tx.add_output(OutputKind::Photo));
            assert!(tx.add_output(OutputKind::VideoData));
            assert!(tx.add_input(registry.camera(DevicePosition::Back).unwrap()));
        }
        assert!(!session.is_configuring());
        assert_eq!(
            session.commit_history(),
            vec![vec![OutputKind::Photo, OutputKind::VideoData]]
        );
        assert_eq!(graph.snapshot().video_position, Some(DevicePosition::Back));
    }

    #[test]
    fn test_second_video_input_is_rejected() {
        let (_session, registry, mut graph) = fixture();
        let mut tx = graph.transaction();
        assert!(tx.add_input(registry.camera(DevicePosition::Back).unwrap()));
        assert!(!tx.add_input(registry.camera(DevicePosition::Front).unwrap()));
        drop(tx);
        assert_eq!(
            graph.video_input().map(|i| i.position()),
            Some(DevicePosition::Back)
        );
    }

    #[test]
    fn test_switch_restores_previous_input_on_rejection() {
        let (session, registry, mut graph) = fixture();
        let back = registry.camera(DevicePosition::Back).unwrap().clone();
        let front = registry.camera(DevicePosition::Front).unwrap().clone();
        graph.transaction().add_input(&back);

        session.reject_input(front.id());
        assert!(!graph.transaction().switch_video_input(&front));
        assert_eq!(graph.video_input().map(|i| i.id().clone()), Some(back.id().clone()));
        assert_eq!(session.inputs(), vec![back.id().clone()]);

        session.allow_input(front.id());
        assert!(graph.transaction().switch_video_input(&front));
        assert_eq!(session.inputs(), vec![front.id().clone()]);
    }

    #[test]
    fn test_orientation_requires_attached_output() {
        let (session, registry, mut graph) = fixture();
        let mut tx = graph.transaction();
        tx.add_input(registry.camera(DevicePosition::Back).unwrap());
        assert!(!tx.set_orientation(OutputKind::MovieFile, CaptureOrientation::LandscapeLeft));
        tx.add_output(OutputKind::MovieFile);
        assert!(tx.set_orientation(OutputKind::MovieFile, CaptureOrientation::LandscapeLeft));
        drop(tx);
        assert_eq!(
            session.connection(OutputKind::MovieFile).map(|c| c.orientation),
            Some(CaptureOrientation::LandscapeLeft)
        );
    }

    #[test]
    fn test_clear_detaches_everything() {
        let (session, registry, mut graph) = fixture();
        {
            let mut tx = graph.transaction();
            tx.add_output(OutputKind::Photo);
            tx.add_output(OutputKind::VideoData);
            tx.add_input(registry.camera(DevicePosition::Back).unwrap());
        }
        graph.transaction().clear();
        assert!(session.outputs().is_empty());
        assert!(session.inputs().is_empty());
        assert_eq!(graph.snapshot(), GraphSnapshot::default());
    }
}
