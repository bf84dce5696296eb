//! Runtime configuration
//!
//! A [`SimulationConfig`] is validated and frozen once per (re)configuration.
//! Components receive the derived parameter structs, never the config itself.

use gravity_physics::{Initializer, PhysicsParams, SpawnParams, TreeParams};
use gravity_physics::{GRAVITY, MAX_MASS, MIN_DISTANCE, MIN_MASS, RESISTANCE, WORLD_RADIUS};
use serde::{Deserialize, Serialize};

use crate::interpolation::InterpolationParams;

/// Deepest tree a configuration may ask for
pub const MAX_TREE_DEPTH: u32 = 64;

/// Which force solver the producer runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Spatial tree approximation
    #[default]
    Tree,
    /// Exact all-pairs interaction
    Direct,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("particle count must be at least 1")]
    NoParticles,
    #[error("tree leaf threshold must be at least 1")]
    LeafThreshold,
    #[error("tree divide factor must be at least 2, got {0}")]
    DivideFactor(usize),
    #[error("tree max depth must be within 1..={max}, got {0}", max = MAX_TREE_DEPTH)]
    MaxDepth(u32),
    #[error("tree min extent must be positive and finite, got {0}")]
    MinExtent(f64),
    #[error("tree randomness must be within [0, 1], got {0}")]
    Randomness(f64),
    #[error("resistance must be within (0, 1], got {0}")]
    Resistance(f64),
    #[error("{name} must be a finite non-negative number, got {value}")]
    NotFinite { name: &'static str, value: f64 },
    #[error("buffer count must be at least 1")]
    BufferCount,
    #[error("target rate must be positive, got {0}")]
    TargetRate(f64),
    #[error("rate history must hold at least one sample")]
    RateHistory,
    #[error("mass range must be positive and ordered, got {min}..{max}")]
    MassRange { min: f64, max: f64 },
}

/// Full configuration surface of the simulation core
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub particle_count: usize,
    pub gravity: f64,
    /// Velocity damping per step, in `(0, 1]`
    pub resistance: f64,
    /// Interactions closer than this contribute no force
    pub min_distance: f64,
    pub tree: TreeParams,
    /// Steps the producer may run ahead of the consumer
    pub buffer_count: usize,
    /// Display refresh rate the consumer targets, in frames per second
    pub target_rate: f64,
    /// Upper bound on synthesized frames between two steps
    pub max_interpolation_frames: u32,
    /// Samples in the step/render interval moving averages
    pub rate_history: usize,
    pub initializer: Initializer,
    pub world_radius: f64,
    pub min_mass: f64,
    pub max_mass: f64,
    pub seed: u64,
    pub backend: BackendKind,
    pub collect_stats: bool,
    /// Send per-particle force vectors with every frame
    pub debug_forces: bool,
    /// Send the tree's rectangles with every frame
    pub debug_tree: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            particle_count: 2000,
            gravity: GRAVITY,
            resistance: RESISTANCE,
            min_distance: MIN_DISTANCE,
            tree: TreeParams::default(),
            buffer_count: 3,
            target_rate: 60.0,
            max_interpolation_frames: 4,
            rate_history: 30,
            initializer: Initializer::default(),
            world_radius: WORLD_RADIUS,
            min_mass: MIN_MASS,
            max_mass: MAX_MASS,
            seed: 0,
            backend: BackendKind::default(),
            collect_stats: true,
            debug_forces: false,
            debug_tree: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count == 0 {
            return Err(ConfigError::NoParticles);
        }
        if self.tree.max_count == 0 {
            return Err(ConfigError::LeafThreshold);
        }
        if self.tree.divide_factor < 2 {
            return Err(ConfigError::DivideFactor(self.tree.divide_factor));
        }
        if !(1..=MAX_TREE_DEPTH).contains(&self.tree.max_depth) {
            return Err(ConfigError::MaxDepth(self.tree.max_depth));
        }
        if !(self.tree.min_extent > 0.0 && self.tree.min_extent.is_finite()) {
            return Err(ConfigError::MinExtent(self.tree.min_extent));
        }
        if !(0.0..=1.0).contains(&self.tree.randomness) {
            return Err(ConfigError::Randomness(self.tree.randomness));
        }
        if !(self.resistance > 0.0 && self.resistance <= 1.0) {
            return Err(ConfigError::Resistance(self.resistance));
        }
        for (name, value) in [
            ("gravity", self.gravity),
            ("min_distance", self.min_distance),
            ("world_radius", self.world_radius),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NotFinite { name, value });
            }
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::BufferCount);
        }
        if !(self.target_rate > 0.0 && self.target_rate.is_finite()) {
            return Err(ConfigError::TargetRate(self.target_rate));
        }
        if self.rate_history == 0 {
            return Err(ConfigError::RateHistory);
        }
        if !(self.min_mass > 0.0 && self.max_mass >= self.min_mass) {
            return Err(ConfigError::MassRange {
                min: self.min_mass,
                max: self.max_mass,
            });
        }
        Ok(())
    }

    /// Parameters for the physics stepper
    pub fn physics(&self) -> PhysicsParams {
        PhysicsParams {
            gravity: self.gravity,
            resistance: self.resistance,
            min_distance_sq: self.min_distance * self.min_distance,
            tree: self.tree,
            seed: self.seed,
            collect_stats: self.collect_stats,
            debug_forces: self.debug_forces,
        }
    }

    /// Parameters for the initializer
    pub fn spawn(&self) -> SpawnParams {
        SpawnParams {
            radius: self.world_radius,
            min_mass: self.min_mass,
            max_mass: self.max_mass,
        }
    }

    /// Parameters for the frame interpolator
    pub fn interpolation(&self) -> InterpolationParams {
        InterpolationParams {
            max_frames: self.max_interpolation_frames,
            history: self.rate_history,
        }
    }

    /// Interval between two display frames, in milliseconds
    pub fn render_interval_ms(&self) -> f64 {
        1000.0 / self.target_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(SimulationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            SimulationConfig {
                particle_count: 0,
                ..Default::default()
            },
            SimulationConfig {
                resistance: 0.0,
                ..Default::default()
            },
            SimulationConfig {
                buffer_count: 0,
                ..Default::default()
            },
            SimulationConfig {
                target_rate: -1.0,
                ..Default::default()
            },
            SimulationConfig {
                gravity: f64::NAN,
                ..Default::default()
            },
            SimulationConfig {
                tree: TreeParams {
                    divide_factor: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
            SimulationConfig {
                tree: TreeParams {
                    min_extent: 0.0,
                    ..Default::default()
                },
                ..Default::default()
            },
            SimulationConfig {
                tree: TreeParams {
                    max_depth: 2_000_000,
                    ..Default::default()
                },
                ..Default::default()
            },
            SimulationConfig {
                tree: TreeParams {
                    max_depth: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            SimulationConfig {
                tree: TreeParams {
                    randomness: 1.5,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn test_physics_squares_min_distance() {
        let config = SimulationConfig {
            min_distance: 3.0,
            ..Default::default()
        };
        assert_eq!(config.physics().min_distance_sq, 9.0);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "particle_count: 500\ninitializer: galaxy\ntree:\n  max_count: 4\n";
        let config: SimulationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.particle_count, 500);
        assert_eq!(config.initializer, Initializer::Galaxy);
        assert_eq!(config.tree.max_count, 4);
        assert_eq!(config.tree.divide_factor, TreeParams::default().divide_factor);
        assert_eq!(config.buffer_count, 3);
    }

    #[test]
    fn test_bundled_configs_are_valid() {
        for yaml in [
            include_str!("../../../configs/default.yaml"),
            include_str!("../../../configs/galaxy.yaml"),
            include_str!("../../../configs/collision-direct.yaml"),
        ] {
            let config: SimulationConfig = serde_yaml::from_str(yaml).unwrap();
            assert_eq!(config.validate(), Ok(()));
        }
    }
}
