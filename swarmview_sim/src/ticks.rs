//! Deterministic synthetic tick generator.
//!
//! Produces the agent sets a simulation service would stream: agents move
//! with constant velocity inside a periodic box, and with churn enabled some
//! despawn and new ones appear between ticks. Everything derives from one
//! seed, so a scenario replays identically.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use swarmview_core::{AgentId, AgentSnapshot, ServerFrame};

/// One synthetic agent.
#[derive(Debug, Clone)]
struct SyntheticAgent {
    position: Vector3<f64>,
    velocity: Vector3<f64>,
}

/// Seeded source of snapshot/tick frames.
pub struct TickSource {
    rng: ChaCha8Rng,
    agents: BTreeMap<u64, SyntheticAgent>,
    next_id: u64,
    tick: u64,

    /// Seconds advanced per tick
    timestep: f64,

    /// Side length of the periodic box
    box_size: f64,

    /// Per-agent probability of despawning on a tick
    despawn_rate: f64,

    /// Expected spawns per tick
    spawn_rate: f64,

    /// Probability that a spawned agent stands still
    still_fraction: f64,
}

impl TickSource {
    /// Creates a source with `num_agents` agents and no churn.
    pub fn new(seed: u64, num_agents: u32) -> Self {
        let mut source = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            agents: BTreeMap::new(),
            next_id: 0,
            tick: 0,
            timestep: 0.1,
            box_size: 10.0,
            despawn_rate: 0.0,
            spawn_rate: 0.0,
            still_fraction: 0.0,
        };
        for _ in 0..num_agents {
            source.spawn();
        }
        source
    }

    /// Enables churn: each agent despawns with `despawn_rate` per tick and
    /// on average `spawn_rate` agents appear per tick.
    pub fn with_churn(mut self, despawn_rate: f64, spawn_rate: f64) -> Self {
        self.despawn_rate = despawn_rate.clamp(0.0, 1.0);
        self.spawn_rate = spawn_rate.max(0.0);
        self
    }

    /// Fraction of newly spawned agents with zero velocity.
    pub fn with_still_fraction(mut self, fraction: f64) -> Self {
        self.still_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Current agent set, ordered by id.
    pub fn agents(&self) -> Vec<AgentSnapshot> {
        self.agents
            .iter()
            .map(|(id, agent)| AgentSnapshot {
                id: AgentId::from(*id),
                position: agent.position.into(),
                velocity: Some(agent.velocity.into()),
            })
            .collect()
    }

    /// The frame sent when a stream opens.
    pub fn snapshot(&self) -> ServerFrame {
        ServerFrame::Snapshot {
            tick: self.tick,
            agents: self.agents(),
        }
    }

    /// Advances one step and returns the tick frame.
    pub fn next_frame(&mut self) -> ServerFrame {
        self.step();
        ServerFrame::tick(self.tick, self.agents())
    }

    fn step(&mut self) {
        self.tick += 1;

        if self.despawn_rate > 0.0 {
            let rate = self.despawn_rate;
            let rng = &mut self.rng;
            self.agents.retain(|_, _| !rng.gen_bool(rate));
        }

        let whole = self.spawn_rate.floor() as u32;
        let extra = self.spawn_rate - self.spawn_rate.floor();
        let spawns = whole + u32::from(extra > 0.0 && self.rng.gen_bool(extra));
        for _ in 0..spawns {
            self.spawn();
        }

        let size = self.box_size;
        for agent in self.agents.values_mut() {
            agent.position += agent.velocity * self.timestep;
            // rem_euclid can round up to `size` for tiny negatives
            agent.position = agent.position.map(|c| {
                let wrapped = c.rem_euclid(size);
                if wrapped >= size {
                    0.0
                } else {
                    wrapped
                }
            });
        }
    }

    fn spawn(&mut self) {
        let size = self.box_size;
        let position = Vector3::new(
            self.rng.gen_range(0.0..size),
            self.rng.gen_range(0.0..size),
            self.rng.gen_range(0.0..size),
        );
        let velocity = if self.still_fraction > 0.0 && self.rng.gen_bool(self.still_fraction) {
            Vector3::zeros()
        } else {
            Vector3::new(
                self.rng.gen_range(-1.0..1.0),
                self.rng.gen_range(-1.0..1.0),
                self.rng.gen_range(-1.0..1.0),
            )
        };

        self.agents.insert(self.next_id, SyntheticAgent { position, velocity });
        self.next_id += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_seed_same_frames() {
        let mut a = TickSource::new(7, 5).with_churn(0.2, 1.0);
        let mut b = TickSource::new(7, 5).with_churn(0.2, 1.0);
        for _ in 0..20 {
            assert_eq!(a.next_frame(), b.next_frame());
        }
    }

    #[test]
    fn test_ticks_increase() {
        let mut source = TickSource::new(1, 3);
        assert!(matches!(source.snapshot(), ServerFrame::Snapshot { tick: 0, .. }));
        assert!(matches!(source.next_frame(), ServerFrame::Tick { tick: 1, .. }));
        assert!(matches!(source.next_frame(), ServerFrame::Tick { tick: 2, .. }));
    }

    #[test]
    fn test_churn_changes_membership() {
        let mut source = TickSource::new(3, 10).with_churn(0.3, 3.0);
        let before: Vec<AgentId> = source.agents().into_iter().map(|a| a.id).collect();
        for _ in 0..5 {
            source.next_frame();
        }
        let after: Vec<AgentId> = source.agents().into_iter().map(|a| a.id).collect();
        assert_ne!(before, after);
    }

    #[test]
    fn test_positions_stay_in_box() {
        let mut source = TickSource::new(9, 8).with_timestep(5.0);
        for _ in 0..10 {
            source.next_frame();
        }
        for agent in source.agents() {
            assert!(agent.position.iter().all(|c| (0.0..10.0).contains(c)));
        }
    }

    #[test]
    fn test_still_agents() {
        let source = TickSource::new(2, 6).with_still_fraction(1.0);
        // fraction applies to agents spawned after it is set
        assert!(source.agents().iter().all(|a| a.velocity.is_some()));

        let mut source = TickSource::new(2, 0).with_still_fraction(1.0).with_churn(0.0, 2.0);
        source.next_frame();
        assert_eq!(source.len(), 2);
        assert!(source
            .agents()
            .iter()
            .all(|a| a.velocity == Some([0.0, 0.0, 0.0])));
    }

    proptest! {
        #[test]
        fn prop_despawned_ids_never_return(seed in any::<u64>(), steps in 1usize..40) {
            let mut source = TickSource::new(seed, 8).with_churn(0.25, 2.0);
            let mut gone: HashSet<AgentId> = HashSet::new();
            let mut current: HashSet<AgentId> = source.agents().into_iter().map(|a| a.id).collect();

            for _ in 0..steps {
                source.next_frame();
                let next: HashSet<AgentId> = source.agents().into_iter().map(|a| a.id).collect();
                prop_assert!(next.is_disjoint(&gone));
                gone.extend(current.difference(&next).cloned());
                current = next;
            }
        }
    }
}
