//! Particle record shared by the physics stepper and the output buffers

use bytemuck::{Pod, Zeroable};
use glam::DVec2;

use crate::constants::RECORD_WIDTH;

/// A point mass.
///
/// Laid out as exactly [`RECORD_WIDTH`] consecutive `f64`s so a particle
/// slice can be copied straight into an output buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Position (x, y)
    pub position: [f64; 2],
    /// Velocity (x, y), in units per step
    pub velocity: [f64; 2],
    /// Mass, always positive
    pub mass: f64,
}

const _: () = assert!(std::mem::size_of::<Particle>() == RECORD_WIDTH * std::mem::size_of::<f64>());

impl Particle {
    /// Create a particle at rest
    pub fn new(position: DVec2, mass: f64) -> Self {
        Self {
            position: position.to_array(),
            velocity: [0.0; 2],
            mass,
        }
    }

    /// Builder-style velocity setter
    pub fn with_velocity(mut self, velocity: DVec2) -> Self {
        self.velocity = velocity.to_array();
        self
    }

    pub fn pos(&self) -> DVec2 {
        DVec2::from_array(self.position)
    }

    pub fn vel(&self) -> DVec2 {
        DVec2::from_array(self.velocity)
    }

    pub fn set_pos(&mut self, position: DVec2) {
        self.position = position.to_array();
    }

    pub fn set_vel(&mut self, velocity: DVec2) {
        self.velocity = velocity.to_array();
    }
}

/// Total mass of a set of particles
pub fn total_mass(particles: &[Particle]) -> f64 {
    particles.iter().map(|p| p.mass).sum()
}

/// Mass-weighted center of a set of particles, or `None` when empty
pub fn center_of_mass(particles: &[Particle]) -> Option<DVec2> {
    let mass = total_mass(particles);
    if particles.is_empty() || mass <= 0.0 {
        return None;
    }
    let weighted = particles
        .iter()
        .fold(DVec2::ZERO, |acc, p| acc + p.pos() * p.mass);
    Some(weighted / mass)
}
