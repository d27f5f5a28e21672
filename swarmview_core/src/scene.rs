//! Scene reconciliation: keeps a persistent pool of render objects in step
//! with the latest agent set.
//!
//! Objects are keyed by agent id. Each pass creates objects for new ids,
//! updates the pose of recurring ones, and releases the ones whose id is
//! gone. A recurring id keeps its backend handle for as long as it stays in
//! consecutive agent sets.

use crate::agent::{AgentId, AgentSnapshot};
use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use tracing::debug;

/// Velocities at or below this magnitude leave orientation untouched.
pub const DEFAULT_VELOCITY_EPSILON: f64 = 1e-6;

/// Translation and rotation of one render object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

impl Pose {
    /// Direction the object's reference axis currently points to.
    pub fn heading(&self, reference_axis: &Unit<Vector3<f64>>) -> Vector3<f64> {
        self.rotation * reference_axis.into_inner()
    }
}

/// Draws and releases visuals on behalf of the reconciler.
pub trait RenderBackend {
    /// Backend resource owned by one render object
    type Handle;

    /// Allocates the visual for a newly observed agent.
    fn spawn(&mut self, id: &AgentId, pose: &Pose) -> Self::Handle;

    /// Moves an existing visual.
    fn update(&mut self, handle: &mut Self::Handle, pose: &Pose);

    /// Frees a visual. The handle is never used again.
    fn release(&mut self, handle: Self::Handle);

    /// Draws one frame containing exactly `objects`.
    fn present<'a, I>(&mut self, objects: I)
    where
        I: Iterator<Item = &'a RenderObject<Self::Handle>>,
        Self::Handle: 'a;
}

/// A live visual for one agent.
#[derive(Debug)]
pub struct RenderObject<H> {
    pub id: AgentId,
    pub pose: Pose,
    pub handle: H,
}

/// Counts for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub released: usize,
}

impl ReconcileStats {
    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.released == 0
    }
}

/// Owns the render pool and its backend.
///
/// Every object still in the pool is released when the reconciler is
/// cleared or dropped.
pub struct SceneReconciler<B: RenderBackend> {
    backend: B,
    objects: HashMap<AgentId, RenderObject<B::Handle>>,
    reference_axis: Unit<Vector3<f64>>,
    velocity_epsilon: f64,
}

impl<B: RenderBackend> SceneReconciler<B> {
    /// Creates an empty scene. Objects face +Y until they move.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            objects: HashMap::new(),
            reference_axis: Vector3::y_axis(),
            velocity_epsilon: DEFAULT_VELOCITY_EPSILON,
        }
    }

    /// Sets the model axis aligned with velocity. A zero axis is ignored.
    pub fn with_reference_axis(mut self, axis: Vector3<f64>) -> Self {
        if let Some(axis) = Unit::try_new(axis, f64::EPSILON) {
            self.reference_axis = axis;
        }
        self
    }

    /// Sets the velocity magnitude below which orientation is kept.
    pub fn with_velocity_epsilon(mut self, epsilon: f64) -> Self {
        self.velocity_epsilon = epsilon.max(0.0);
        self
    }

    /// Brings the pool in line with `agents`.
    ///
    /// If an id appears more than once, the last record wins.
    pub fn reconcile(&mut self, agents: &[AgentSnapshot]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let mut seen: HashSet<&AgentId> = HashSet::with_capacity(agents.len());

        for agent in agents {
            seen.insert(&agent.id);
            let rotation = agent.velocity_vec().and_then(|v| self.align(&v));

            match self.objects.get_mut(&agent.id) {
                Some(object) => {
                    object.pose.translation = agent.position_vec();
                    if let Some(rotation) = rotation {
                        object.pose.rotation = rotation;
                    }
                    self.backend.update(&mut object.handle, &object.pose);
                    stats.updated += 1;
                }
                None => {
                    let pose = Pose {
                        translation: agent.position_vec(),
                        rotation: rotation.unwrap_or_else(UnitQuaternion::identity),
                    };
                    let handle = self.backend.spawn(&agent.id, &pose);
                    self.objects.insert(
                        agent.id.clone(),
                        RenderObject {
                            id: agent.id.clone(),
                            pose,
                            handle,
                        },
                    );
                    stats.created += 1;
                }
            }
        }

        let stale: Vec<AgentId> = self
            .objects
            .keys()
            .filter(|id| !seen.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(object) = self.objects.remove(&id) {
                self.backend.release(object.handle);
                stats.released += 1;
            }
        }

        if !stats.is_noop() {
            debug!(
                "Reconciled scene: +{} ~{} -{} ({} live)",
                stats.created,
                stats.updated,
                stats.released,
                self.objects.len()
            );
        }
        stats
    }

    /// Draws the current pool.
    pub fn present(&mut self) {
        self.backend.present(self.objects.values());
    }

    /// Releases every object. Returns how many were released.
    pub fn clear(&mut self) -> usize {
        let released = self.objects.len();
        for (_, object) in self.objects.drain() {
            self.backend.release(object.handle);
        }
        if released > 0 {
            debug!("Cleared scene: {} objects released", released);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn pose(&self, id: &AgentId) -> Option<&Pose> {
        self.objects.get(id).map(|object| &object.pose)
    }

    pub fn handle(&self, id: &AgentId) -> Option<&B::Handle> {
        self.objects.get(id).map(|object| &object.handle)
    }

    /// Ids currently in the pool, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &AgentId> {
        self.objects.keys()
    }

    pub fn reference_axis(&self) -> &Unit<Vector3<f64>> {
        &self.reference_axis
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Rotation taking the reference axis onto `velocity`, or `None` when
    /// the velocity is too small to define a direction.
    fn align(&self, velocity: &Vector3<f64>) -> Option<UnitQuaternion<f64>> {
        let speed = velocity.norm();
        if !speed.is_finite() || speed <= self.velocity_epsilon {
            return None;
        }
        let direction = velocity / speed;
        let axis = self.reference_axis.into_inner();

        UnitQuaternion::rotation_between(&axis, &direction)
            .or_else(|| Some(half_turn_about_perpendicular(&axis)))
    }
}

impl<B: RenderBackend> Drop for SceneReconciler<B> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// 180 degree turn about some axis perpendicular to `axis`.
fn half_turn_about_perpendicular(axis: &Vector3<f64>) -> UnitQuaternion<f64> {
    let candidate = axis.cross(&Vector3::x());
    let perpendicular = if candidate.norm_squared() > 1e-12 {
        candidate
    } else {
        axis.cross(&Vector3::z())
    };
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(perpendicular), PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn agent(id: &str, position: [f64; 3]) -> AgentSnapshot {
        AgentSnapshot::new(id, position)
    }

    fn moving(id: &str, velocity: [f64; 3]) -> AgentSnapshot {
        AgentSnapshot::new(id, [0.0; 3]).with_velocity(velocity)
    }

    #[test]
    fn test_create_update_release() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());

        let stats = scene.reconcile(&[
            agent("a1", [0.0; 3]),
            agent("a2", [1.0, 0.0, 0.0]),
            agent("a3", [2.0, 0.0, 0.0]),
        ]);
        assert_eq!(stats, ReconcileStats { created: 3, updated: 0, released: 0 });
        assert_eq!(scene.len(), 3);

        let a1_handle = *scene.handle(&AgentId::from("a1")).unwrap();
        let stats = scene.reconcile(&[agent("a1", [5.0, 5.0, 5.0]), agent("a2", [1.0, 1.0, 0.0])]);
        assert_eq!(stats, ReconcileStats { created: 0, updated: 2, released: 1 });
        assert_eq!(scene.len(), 2);
        assert!(!scene.contains(&AgentId::from("a3")));
        assert_eq!(*scene.handle(&AgentId::from("a1")).unwrap(), a1_handle);
        assert_eq!(
            scene.pose(&AgentId::from("a1")).unwrap().translation,
            Vector3::new(5.0, 5.0, 5.0)
        );

        let stats = scene.backend().stats();
        assert_eq!(stats.spawned(), 3);
        assert_eq!(stats.released(), 1);
        assert_eq!(stats.live(), 2);
    }

    #[test]
    fn test_empty_set_releases_everything() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[agent("a", [0.0; 3]), agent("b", [0.0; 3])]);

        let stats = scene.reconcile(&[]);
        assert_eq!(stats.released, 2);
        assert!(scene.is_empty());
        assert_eq!(scene.backend().stats().live(), 0);
    }

    #[test]
    fn test_orientation_follows_velocity() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[moving("a", [3.0, 0.0, 0.0])]);

        let pose = scene.pose(&AgentId::from("a")).unwrap();
        let heading = pose.heading(scene.reference_axis());
        assert_relative_eq!(heading, Vector3::x(), epsilon = 1e-9);
    }

    #[test]
    fn test_orientation_kept_below_epsilon() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[moving("a", [0.0, 0.0, 2.0])]);
        let before = scene.pose(&AgentId::from("a")).unwrap().rotation;

        scene.reconcile(&[moving("a", [1e-9, 0.0, 0.0])]);
        let after = scene.pose(&AgentId::from("a")).unwrap().rotation;
        assert_relative_eq!(before, after, epsilon = 1e-12);

        // missing velocity also keeps it
        scene.reconcile(&[agent("a", [1.0, 1.0, 1.0])]);
        let after = scene.pose(&AgentId::from("a")).unwrap().rotation;
        assert_relative_eq!(before, after, epsilon = 1e-12);
    }

    #[test]
    fn test_custom_velocity_epsilon() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new()).with_velocity_epsilon(0.5);
        scene.reconcile(&[moving("a", [0.0, 0.0, 2.0])]);
        let before = scene.pose(&AgentId::from("a")).unwrap().rotation;

        // slower than the threshold: orientation kept
        scene.reconcile(&[moving("a", [0.4, 0.0, 0.0])]);
        let after = scene.pose(&AgentId::from("a")).unwrap().rotation;
        assert_relative_eq!(before, after, epsilon = 1e-12);

        scene.reconcile(&[moving("a", [0.6, 0.0, 0.0])]);
        let pose = scene.pose(&AgentId::from("a")).unwrap();
        assert_relative_eq!(pose.heading(scene.reference_axis()), Vector3::x(), epsilon = 1e-9);
    }

    #[test]
    fn test_new_object_without_velocity_is_identity() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[moving("still", [0.0, 0.0, 0.0])]);
        let pose = scene.pose(&AgentId::from("still")).unwrap();
        assert_eq!(pose.rotation, UnitQuaternion::identity());
    }

    #[test]
    fn test_antiparallel_velocity() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[moving("a", [0.0, -4.0, 0.0])]);

        let pose = scene.pose(&AgentId::from("a")).unwrap();
        let heading = pose.heading(scene.reference_axis());
        assert_relative_eq!(heading, -Vector3::y(), epsilon = 1e-9);
    }

    #[test]
    fn test_custom_reference_axis() {
        let mut scene =
            SceneReconciler::new(HeadlessBackend::new()).with_reference_axis(Vector3::z() * 2.0);
        scene.reconcile(&[moving("a", [0.0, 1.0, 0.0])]);

        let pose = scene.pose(&AgentId::from("a")).unwrap();
        assert_relative_eq!(pose.heading(scene.reference_axis()), Vector3::y(), epsilon = 1e-9);
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[agent("dup", [1.0, 0.0, 0.0]), agent("dup", [2.0, 0.0, 0.0])]);

        assert_eq!(scene.len(), 1);
        assert_eq!(scene.backend().stats().spawned(), 1);
        assert_eq!(
            scene.pose(&AgentId::from("dup")).unwrap().translation,
            Vector3::new(2.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_present_draws_pool() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[agent("a", [0.0; 3]), agent("b", [0.0; 3])]);
        scene.present();
        scene.present();

        let stats = scene.backend().stats();
        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.last_frame_objects(), 2);
    }

    #[test]
    fn test_drop_releases_everything() {
        let backend = HeadlessBackend::new();
        let stats = backend.stats();
        {
            let mut scene = SceneReconciler::new(backend);
            scene.reconcile(&[agent("a", [0.0; 3]), agent("b", [0.0; 3])]);
            assert_eq!(stats.live(), 2);
        }
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.released(), 2);
    }

    #[test]
    fn test_clear() {
        let mut scene = SceneReconciler::new(HeadlessBackend::new());
        scene.reconcile(&[agent("a", [0.0; 3])]);
        assert_eq!(scene.clear(), 1);
        assert_eq!(scene.clear(), 0);
        assert!(scene.is_empty());
    }

    proptest! {
        #[test]
        fn prop_pool_matches_latest_ids(
            frames in prop::collection::vec(prop::collection::vec(0u8..16, 0..12), 1..20)
        ) {
            let mut scene = SceneReconciler::new(HeadlessBackend::new());
            let mut previous: HashMap<AgentId, u64> = HashMap::new();

            for ids in frames {
                let agents: Vec<AgentSnapshot> = ids
                    .iter()
                    .map(|id| AgentSnapshot::new(AgentId::new(format!("agent-{}", id)), [*id as f64, 0.0, 0.0]))
                    .collect();
                scene.reconcile(&agents);

                let expected: HashSet<AgentId> = agents.iter().map(|a| a.id.clone()).collect();
                let actual: HashSet<AgentId> = scene.ids().cloned().collect();
                prop_assert_eq!(&actual, &expected);
                prop_assert_eq!(scene.backend().stats().live(), expected.len());

                // recurring ids keep their handle
                for id in &expected {
                    let handle = *scene.handle(id).unwrap();
                    if let Some(old) = previous.get(id) {
                        prop_assert_eq!(handle, *old);
                    }
                }
                previous = expected
                    .iter()
                    .map(|id| (id.clone(), *scene.handle(id).unwrap()))
                    .collect();
            }
        }

        #[test]
        fn prop_heading_matches_velocity(
            x in -100.0f64..100.0, y in -100.0f64..100.0, z in -100.0f64..100.0
        ) {
            let velocity = Vector3::new(x, y, z);
            prop_assume!(velocity.norm() > 1e-3);

            let mut scene = SceneReconciler::new(HeadlessBackend::new());
            scene.reconcile(&[AgentSnapshot::new("a", [0.0; 3]).with_velocity([x, y, z])]);

            let pose = scene.pose(&AgentId::from("a")).unwrap();
            let heading = pose.heading(scene.reference_axis());
            let expected = velocity.normalize();
            prop_assert!((heading - expected).norm() < 1e-6);
        }
    }
}
