//! # Gravity Simulation
//!
//! Runs the physics core behind a bounded producer/consumer pipeline and
//! turns its output into smooth display frames or binary recordings.

pub mod buffer_pool;
pub mod interpolation;
pub mod params;
pub mod pipeline;
pub mod recording;

pub use buffer_pool::*;
pub use interpolation::*;
pub use params::*;
pub use pipeline::*;
pub use recording::*;
