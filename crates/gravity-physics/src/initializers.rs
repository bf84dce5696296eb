//! Initial particle layouts
//!
//! All layouts are centered on the origin and fully determined by the RNG
//! they are given, so a seeded RNG reproduces a run exactly.

use std::f64::consts::TAU;

use glam::DVec2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::particle::Particle;

/// Speed scale of the initial velocities, in units per step
const BASE_SPEED: f64 = 0.5;

/// Number of clusters in the rotation layout
const ROTATION_CLUSTERS: usize = 3;

/// Initial particle layout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Uniform scatter over a square, at rest
    #[default]
    Uniform,
    /// Thin circular ring moving tangentially
    Ring,
    /// Dense core flying apart radially
    BigBang,
    /// Two clusters heading into each other
    Collision,
    /// Several clusters orbiting the origin
    Rotation,
    /// Rotating disc
    Galaxy,
}

/// Shape of the spawned population
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnParams {
    pub radius: f64,
    pub min_mass: f64,
    pub max_mass: f64,
}

impl Default for SpawnParams {
    fn default() -> Self {
        Self {
            radius: WORLD_RADIUS,
            min_mass: MIN_MASS,
            max_mass: MAX_MASS,
        }
    }
}

impl Initializer {
    /// Spawn `count` particles with this layout
    pub fn spawn<R: Rng + ?Sized>(
        self,
        count: usize,
        params: &SpawnParams,
        rng: &mut R,
    ) -> Vec<Particle> {
        let radius = params.radius;
        (0..count)
            .map(|i| {
                let mass = sample_mass(params, rng);
                let (position, velocity) = match self {
                    Initializer::Uniform => (
                        DVec2::new(
                            rng.random_range(-radius..=radius),
                            rng.random_range(-radius..=radius),
                        ),
                        DVec2::ZERO,
                    ),
                    Initializer::Ring => {
                        let angle = rng.random::<f64>() * TAU;
                        let r = radius * rng.random_range(0.9..=1.0);
                        let dir = DVec2::from_angle(angle);
                        (dir * r, dir.perp() * BASE_SPEED)
                    }
                    Initializer::BigBang => {
                        let offset = disc_point(radius * 0.05, rng);
                        (offset, offset / (radius * 0.05) * BASE_SPEED * 4.0)
                    }
                    Initializer::Collision => {
                        let side = if i % 2 == 0 { -1.0 } else { 1.0 };
                        let center = DVec2::new(side * radius * 0.5, side * radius * 0.1);
                        let position = center + disc_point(radius * 0.25, rng);
                        (position, DVec2::new(-side * BASE_SPEED, 0.0))
                    }
                    Initializer::Rotation => {
                        let cluster = i % ROTATION_CLUSTERS;
                        let angle = cluster as f64 / ROTATION_CLUSTERS as f64 * TAU;
                        let dir = DVec2::from_angle(angle);
                        let center = dir * radius * 0.5;
                        let local = disc_point(radius * 0.2, rng);
                        let orbit = dir.perp() * BASE_SPEED;
                        let spin = local.perp() / (radius * 0.2) * BASE_SPEED * 0.5;
                        (center + local, orbit + spin)
                    }
                    Initializer::Galaxy => {
                        let position = disc_point(radius, rng);
                        let r = position.length() / radius;
                        let speed = BASE_SPEED * r.sqrt() * 2.0;
                        (position, position.perp().normalize_or_zero() * speed)
                    }
                };
                Particle::new(position, mass).with_velocity(velocity)
            })
            .collect()
    }
}

fn sample_mass<R: Rng + ?Sized>(params: &SpawnParams, rng: &mut R) -> f64 {
    if params.max_mass > params.min_mass {
        rng.random_range(params.min_mass..=params.max_mass)
    } else {
        params.min_mass
    }
}

/// Uniformly distributed point in a disc of the given radius
fn disc_point<R: Rng + ?Sized>(radius: f64, rng: &mut R) -> DVec2 {
    let angle = rng.random::<f64>() * TAU;
    let r = radius * rng.random::<f64>().sqrt();
    DVec2::from_angle(angle) * r
}
