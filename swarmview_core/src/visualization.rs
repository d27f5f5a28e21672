//! Rerun render backend.
//!
//! Each agent is an entity at `world/agents/<id>`: its geometry (a point
//! and a heading arrow along the reference axis) is logged once on spawn,
//! and every update only logs the entity transform. Releasing an agent
//! clears its entity.
//!
//! Enable with the `visualization` feature flag.

use crate::agent::AgentId;
use crate::scene::{Pose, RenderBackend, RenderObject};
use rerun::{RecordingStream, RecordingStreamBuilder};
use tracing::warn;

const AGENT_RADIUS: f32 = 0.15;
const HEADING_LENGTH: f32 = 0.6;

/// Handle of one agent entity.
#[derive(Debug, Clone)]
pub struct RerunHandle {
    path: String,
}

impl RerunHandle {
    pub fn entity_path(&self) -> &str {
        &self.path
    }
}

/// Streams the scene to a Rerun viewer or recording file.
pub struct RerunBackend {
    rec: RecordingStream,
    frame: i64,
}

impl RerunBackend {
    /// Spawns a Rerun viewer and streams to it.
    pub fn new(app_id: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let rec = RecordingStreamBuilder::new(app_id).spawn()?;
        Self::with_recording(rec)
    }

    /// Writes the recording to an `.rrd` file instead.
    pub fn new_to_file(app_id: &str, path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let rec = RecordingStreamBuilder::new(app_id).save(path)?;
        Self::with_recording(rec)
    }

    fn with_recording(rec: RecordingStream) -> Result<Self, Box<dyn std::error::Error>> {
        rec.log_static("world", &rerun::ViewCoordinates::RIGHT_HAND_Z_UP())?;
        Ok(Self { rec, frame: 0 })
    }

    fn log_transform(&self, path: &str, pose: &Pose) {
        let t = pose.translation;
        let q = pose.rotation.quaternion();
        let transform = rerun::Transform3D::from_translation_rotation(
            [t.x as f32, t.y as f32, t.z as f32],
            rerun::Quaternion::from_xyzw([q.i as f32, q.j as f32, q.k as f32, q.w as f32]),
        );
        if let Err(err) = self.rec.log(path, &transform) {
            warn!("Failed to log transform for {}: {}", path, err);
        }
    }
}

impl RenderBackend for RerunBackend {
    type Handle = RerunHandle;

    fn spawn(&mut self, id: &AgentId, pose: &Pose) -> RerunHandle {
        let path = format!("world/agents/{}", id);

        let body = rerun::Points3D::new([[0.0f32, 0.0, 0.0]])
            .with_radii([AGENT_RADIUS])
            .with_colors([[0, 212, 255, 255]]);
        if let Err(err) = self.rec.log(format!("{}/body", path), &body) {
            warn!("Failed to log agent {}: {}", id, err);
        }

        // drawn in the agent frame, so the transform turns it
        let heading = rerun::Arrows3D::from_vectors([[0.0f32, HEADING_LENGTH, 0.0]])
            .with_colors([[255, 200, 0, 255]]);
        if let Err(err) = self.rec.log(format!("{}/heading", path), &heading) {
            warn!("Failed to log heading for {}: {}", id, err);
        }

        self.log_transform(&path, pose);
        RerunHandle { path }
    }

    fn update(&mut self, handle: &mut RerunHandle, pose: &Pose) {
        self.log_transform(handle.entity_path(), pose);
    }

    fn release(&mut self, handle: RerunHandle) {
        let path = handle.entity_path();
        if let Err(err) = self.rec.log(path, &rerun::Clear::recursive()) {
            warn!("Failed to clear {}: {}", path, err);
        }
    }

    fn present<'a, I>(&mut self, objects: I)
    where
        I: Iterator<Item = &'a RenderObject<RerunHandle>>,
    {
        self.frame += 1;
        self.rec.set_time_sequence("frame", self.frame);

        let count = objects.count();
        let status = rerun::TextLog::new(format!("{} agents", count));
        if let Err(err) = self.rec.log("logs/scene", &status) {
            warn!("Failed to log frame {}: {}", self.frame, err);
        }
    }
}
