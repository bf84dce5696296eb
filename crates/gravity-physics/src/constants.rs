//! Default constants for the gravity simulation
//!
//! The values are tuned for a visually pleasing simulation rather than
//! physical accuracy. Everything here can be overridden through the
//! runtime configuration.

/// Attraction constant applied to every interaction
pub const GRAVITY: f64 = 0.1;

/// Velocity damping applied once per step (1.0 = no damping)
pub const RESISTANCE: f64 = 0.999;

/// Interactions closer than this contribute no force
pub const MIN_DISTANCE: f64 = 2.0;

/// Maximum number of particles in a terminal leaf before it is split
pub const TREE_MAX_COUNT: usize = 8;

/// Number of sub-regions per axis when a node is split
pub const TREE_DIVIDE_FACTOR: usize = 2;

/// Jitter applied to sub-region extents, as a fraction of the nominal step
pub const TREE_RANDOMNESS: f64 = 0.5;

/// Hard cap on tree depth; particles still over the threshold form one leaf
pub const TREE_MAX_DEPTH: u32 = 32;

/// Regions smaller than this on both axes are never split
pub const TREE_MIN_EXTENT: f64 = 1e-6;

/// Number of scalars per particle in an output buffer record
pub const RECORD_WIDTH: usize = 5;

/// Radius of the region initializers spawn particles in
pub const WORLD_RADIUS: f64 = 500.0;

/// Default mass range for spawned particles
pub const MIN_MASS: f64 = 1.0;
pub const MAX_MASS: f64 = 1.0;
