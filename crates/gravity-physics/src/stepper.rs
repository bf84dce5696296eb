//! Physics stepper: tree build, force accumulation, integration
//!
//! The tree solver is one [`Backend`]. [`DirectBackend`] computes exact
//! pairwise forces behind the same interface and serves as a reference.

use std::time::{Duration, Instant};

use glam::DVec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::constants::*;
use crate::forces::{direct_deltas, ForceAccumulator};
use crate::particle::Particle;
use crate::tree::{SpatialTree, TreeParams, TreeStats};

/// Immutable parameters for one configuration of the physics core
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsParams {
    pub gravity: f64,
    /// Velocity multiplier per step, in `(0, 1]`
    pub resistance: f64,
    /// Squared minimum interaction distance
    pub min_distance_sq: f64,
    pub tree: TreeParams,
    /// Seed for the tree jitter
    pub seed: u64,
    /// Measure build and integration times
    pub collect_stats: bool,
    /// Keep per-particle velocity deltas after each step
    pub debug_forces: bool,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            resistance: RESISTANCE,
            min_distance_sq: MIN_DISTANCE * MIN_DISTANCE,
            tree: TreeParams::default(),
            seed: 0,
            collect_stats: false,
            debug_forces: false,
        }
    }
}

/// Statistics of a single step
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepStats {
    pub particle_count: usize,
    pub tree: TreeStats,
    /// Time spent building the tree
    pub tree_time: Duration,
    /// Time spent accumulating forces and integrating
    pub force_time: Duration,
}

/// Something that can advance a particle set by one step.
pub trait Backend: Send {
    /// Advance `particles` in place by one step
    fn step(&mut self, particles: &mut [Particle]) -> StepStats;

    /// Velocity deltas of the last step, when force debugging is enabled
    fn forces(&self) -> Option<&[DVec2]> {
        None
    }

    /// Spatial tree of the last step, for backends that build one
    fn tree(&self) -> Option<&SpatialTree> {
        None
    }
}

/// Apply velocity deltas, damp, then move.
pub fn integrate(particles: &mut [Particle], deltas: &[DVec2], resistance: f64) {
    for (particle, delta) in particles.iter_mut().zip(deltas) {
        let velocity = (particle.vel() + *delta) * resistance;
        particle.set_vel(velocity);
        particle.set_pos(particle.pos() + velocity);
    }
}

/// Barnes-Hut style stepper over a freshly built [`SpatialTree`].
#[derive(Clone, Debug)]
pub struct PhysicsStepper {
    params: PhysicsParams,
    rng: ChaCha8Rng,
    accumulator: ForceAccumulator,
    deltas: Vec<DVec2>,
    last_tree: Option<SpatialTree>,
}

impl PhysicsStepper {
    pub fn new(params: PhysicsParams) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(params.seed),
            accumulator: ForceAccumulator::new(params.gravity, params.min_distance_sq),
            deltas: Vec::new(),
            last_tree: None,
            params,
        }
    }

    pub fn params(&self) -> &PhysicsParams {
        &self.params
    }

    /// Build a tree, accumulate forces and integrate. Returns the tree so
    /// callers can extract structural debug data.
    pub fn step_tree(&mut self, particles: &mut [Particle]) -> (SpatialTree, StepStats) {
        let started = self.params.collect_stats.then(Instant::now);
        let tree = SpatialTree::build(particles, &self.params.tree, &mut self.rng);
        let built = self.params.collect_stats.then(Instant::now);

        self.deltas.resize(particles.len(), DVec2::ZERO);
        self.accumulator.accumulate(&tree, particles, &mut self.deltas);
        integrate(particles, &self.deltas, self.params.resistance);

        let mut stats = StepStats {
            particle_count: particles.len(),
            tree: tree.stats(),
            ..Default::default()
        };
        if let (Some(started), Some(built)) = (started, built) {
            stats.tree_time = built - started;
            stats.force_time = built.elapsed();
        }
        (tree, stats)
    }
}

impl Backend for PhysicsStepper {
    fn step(&mut self, particles: &mut [Particle]) -> StepStats {
        let (tree, stats) = self.step_tree(particles);
        self.last_tree = Some(tree);
        stats
    }

    fn forces(&self) -> Option<&[DVec2]> {
        self.params.debug_forces.then_some(self.deltas.as_slice())
    }

    fn tree(&self) -> Option<&SpatialTree> {
        self.last_tree.as_ref()
    }
}

/// Exact all-pairs stepper with the same force law and integration.
#[derive(Clone, Debug)]
pub struct DirectBackend {
    params: PhysicsParams,
    deltas: Vec<DVec2>,
}

impl DirectBackend {
    pub fn new(params: PhysicsParams) -> Self {
        Self {
            params,
            deltas: Vec::new(),
        }
    }
}

impl Backend for DirectBackend {
    fn step(&mut self, particles: &mut [Particle]) -> StepStats {
        let started = self.params.collect_stats.then(Instant::now);

        self.deltas.resize(particles.len(), DVec2::ZERO);
        direct_deltas(
            particles,
            self.params.gravity,
            self.params.min_distance_sq,
            &mut self.deltas,
        );
        integrate(particles, &self.deltas, self.params.resistance);

        StepStats {
            particle_count: particles.len(),
            force_time: started.map(|s| s.elapsed()).unwrap_or_default(),
            ..Default::default()
        }
    }

    fn forces(&self) -> Option<&[DVec2]> {
        self.params.debug_forces.then_some(self.deltas.as_slice())
    }
}
