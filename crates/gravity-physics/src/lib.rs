//! # Gravity Physics
//!
//! Approximate N-body attraction for large 2D particle populations: a
//! spatial tree rebuilt every step, a hierarchical force accumulator and the
//! integrator that ties them together.

pub mod bounds;
pub mod constants;
pub mod forces;
pub mod initializers;
pub mod particle;
pub mod stepper;
pub mod tree;

pub use bounds::*;
pub use constants::*;
pub use forces::*;
pub use initializers::*;
pub use particle::*;
pub use stepper::*;
pub use tree::*;
