//! Inverse-square attraction and the tree-walking force accumulator
//!
//! Everything here produces velocity deltas (accelerations per step); the
//! stepper applies them. Positions are never touched.

use glam::DVec2;

use crate::particle::Particle;
use crate::tree::{NodeId, SpatialTree};

/// Attraction of `p1` toward `p2`.
///
/// `strength` is the attraction constant already scaled by the acting mass.
/// Returns `(p1 - p2) * (-strength / d²)`, or zero when the squared distance
/// is below `min_distance_sq` (this also covers coincident points).
#[inline]
pub fn point_force(p1: DVec2, p2: DVec2, strength: f64, min_distance_sq: f64) -> DVec2 {
    let diff = p1 - p2;
    let d2 = diff.length_squared();
    if d2 < min_distance_sq || d2 == 0.0 {
        return DVec2::ZERO;
    }
    diff * (-strength / d2)
}

/// Force on `a` from `b`. Antisymmetric: `pair_force(a, b) == -pair_force(b, a)`.
#[inline]
pub fn pair_force(a: &Particle, b: &Particle, gravity: f64, min_distance_sq: f64) -> DVec2 {
    point_force(a.pos(), b.pos(), gravity * a.mass * b.mass, min_distance_sq)
}

/// Hierarchical force accumulation over a [`SpatialTree`].
///
/// At every internal node each child is pulled by its siblings, each sibling
/// treated as one point mass at the center of its rectangle. That pull is
/// threaded down to the child's descendants as an offset. At terminal leaves
/// every unordered pair of particles interacts exactly once, and the pair
/// force is divided by each particle's own mass.
#[derive(Clone, Debug)]
pub struct ForceAccumulator {
    gravity: f64,
    min_distance_sq: f64,
    scratch: Vec<DVec2>,
}

impl ForceAccumulator {
    pub fn new(gravity: f64, min_distance_sq: f64) -> Self {
        Self {
            gravity,
            min_distance_sq,
            scratch: Vec::new(),
        }
    }

    /// Overwrite `deltas[i]` with the velocity delta of particle `i`.
    ///
    /// `tree` must have been built over `particles`.
    pub fn accumulate(&mut self, tree: &SpatialTree, particles: &[Particle], deltas: &mut [DVec2]) {
        debug_assert_eq!(particles.len(), deltas.len());
        deltas.fill(DVec2::ZERO);
        if let Some(root) = tree.root() {
            self.visit(tree, root, DVec2::ZERO, particles, deltas);
        }
    }

    fn visit(
        &mut self,
        tree: &SpatialTree,
        id: NodeId,
        offset: DVec2,
        particles: &[Particle],
        deltas: &mut [DVec2],
    ) {
        let node = tree.node(id);
        if node.is_leaf() {
            self.leaf(tree.particles(id), offset, particles, deltas);
            return;
        }

        for child in tree.children(id) {
            let center = tree.node(child).rect.center();
            let mut force = offset;
            for sibling in tree.children(id).filter(|&s| s != child) {
                let other = tree.node(sibling);
                force += point_force(
                    center,
                    other.rect.center(),
                    self.gravity * other.mass,
                    self.min_distance_sq,
                );
            }
            self.visit(tree, child, force, particles, deltas);
        }
    }

    fn leaf(
        &mut self,
        indices: &[u32],
        offset: DVec2,
        particles: &[Particle],
        deltas: &mut [DVec2],
    ) {
        self.scratch.clear();
        self.scratch.resize(indices.len(), DVec2::ZERO);

        for (a, &i) in indices.iter().enumerate() {
            let pi = &particles[i as usize];
            for (b, &j) in indices.iter().enumerate().skip(a + 1) {
                let pj = &particles[j as usize];
                let force = pair_force(pi, pj, self.gravity, self.min_distance_sq);
                self.scratch[a] += force;
                self.scratch[b] -= force;
            }
        }

        for (a, &i) in indices.iter().enumerate() {
            let mass = particles[i as usize].mass;
            deltas[i as usize] = offset + self.scratch[a] / mass;
        }
    }
}

/// Exact O(N²) velocity deltas with the same force law and mass convention
/// as the leaf interactions of [`ForceAccumulator`].
pub fn direct_deltas(
    particles: &[Particle],
    gravity: f64,
    min_distance_sq: f64,
    deltas: &mut [DVec2],
) {
    debug_assert_eq!(particles.len(), deltas.len());
    deltas.fill(DVec2::ZERO);
    for i in 0..particles.len() {
        for j in i + 1..particles.len() {
            let force = pair_force(&particles[i], &particles[j], gravity, min_distance_sq);
            deltas[i] += force;
            deltas[j] -= force;
        }
    }
    for (delta, particle) in deltas.iter_mut().zip(particles) {
        *delta /= particle.mass;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeParams;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn build(particles: &[Particle], params: &TreeParams) -> SpatialTree {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        SpatialTree::build(particles, params, &mut rng)
    }

    #[test]
    fn test_point_force_attracts() {
        let f = point_force(DVec2::new(2.0, 0.0), DVec2::ZERO, 1.0, 0.0);
        // (p1 - p2) * -g/d² = (2, 0) * -1/4
        assert_eq!(f, DVec2::new(-0.5, 0.0));
    }

    #[test]
    fn test_coincident_points_give_zero_force() {
        let p = DVec2::new(3.0, -7.0);
        assert_eq!(point_force(p, p, 10.0, 0.0), DVec2::ZERO);
        assert_eq!(point_force(p, p, 10.0, 4.0), DVec2::ZERO);

        let particles = [Particle::new(p, 1.0), Particle::new(p, 1.0)];
        let mut deltas = [DVec2::ONE; 2];
        let tree = build(&particles, &TreeParams::default());
        ForceAccumulator::new(10.0, 4.0).accumulate(&tree, &particles, &mut deltas);
        assert!(deltas.iter().all(|d| *d == DVec2::ZERO && d.is_finite()));
    }

    #[test]
    fn test_min_distance_cutoff() {
        let a = DVec2::ZERO;
        let b = DVec2::new(1.5, 0.0);
        assert_eq!(point_force(a, b, 1.0, 4.0), DVec2::ZERO);
        assert_ne!(point_force(a, b, 1.0, 1.0), DVec2::ZERO);
    }

    #[test]
    fn test_leaf_pair_is_equal_and_opposite() {
        let particles = [
            Particle::new(DVec2::new(0.0, 0.0), 2.0),
            Particle::new(DVec2::new(3.0, 4.0), 5.0),
        ];
        let tree = build(&particles, &TreeParams::default());
        assert!(tree.node(tree.root().unwrap()).is_leaf());

        let mut deltas = [DVec2::ZERO; 2];
        ForceAccumulator::new(0.7, 0.0).accumulate(&tree, &particles, &mut deltas);

        let f0 = deltas[0] * particles[0].mass;
        let f1 = deltas[1] * particles[1].mass;
        assert_relative_eq!(f0.x, -f1.x, epsilon = 1e-12);
        assert_relative_eq!(f0.y, -f1.y, epsilon = 1e-12);
        // Pulled toward each other
        assert!(deltas[0].x > 0.0 && deltas[1].x < 0.0);
    }

    #[test]
    fn test_single_leaf_matches_direct() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let particles: Vec<Particle> = (0..6)
            .map(|_| {
                Particle::new(
                    DVec2::new(rng.random_range(-50.0..50.0), rng.random_range(-50.0..50.0)),
                    rng.random_range(0.5..3.0),
                )
            })
            .collect();
        let params = TreeParams {
            max_count: 16,
            ..Default::default()
        };
        let tree = build(&particles, &params);

        let mut tree_deltas = vec![DVec2::ZERO; particles.len()];
        let mut exact = vec![DVec2::ZERO; particles.len()];
        ForceAccumulator::new(1.0, 1.0).accumulate(&tree, &particles, &mut tree_deltas);
        direct_deltas(&particles, 1.0, 1.0, &mut exact);

        for (a, b) in tree_deltas.iter().zip(&exact) {
            assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_far_clusters_attract_each_other() {
        let mut particles = Vec::new();
        for i in 0..4 {
            particles.push(Particle::new(DVec2::new(i as f64, 0.0), 1.0));
            particles.push(Particle::new(DVec2::new(1000.0 + i as f64, 0.0), 1.0));
        }
        let params = TreeParams {
            max_count: 4,
            randomness: 0.0,
            ..Default::default()
        };
        let tree = build(&particles, &params);
        assert!(tree.node_count() > 1);

        let mut deltas = vec![DVec2::ZERO; particles.len()];
        ForceAccumulator::new(1.0, 0.0).accumulate(&tree, &particles, &mut deltas);
        let left: f64 = (0..8).step_by(2).map(|i| deltas[i].x).sum();
        let right: f64 = (1..8).step_by(2).map(|i| deltas[i].x).sum();
        assert!(left > 0.0);
        assert!(right < 0.0);
    }

    #[test]
    fn test_heavier_particle_accelerates_less() {
        let particles = [
            Particle::new(DVec2::new(0.0, 0.0), 1.0),
            Particle::new(DVec2::new(10.0, 0.0), 4.0),
        ];
        let mut deltas = [DVec2::ZERO; 2];
        direct_deltas(&particles, 1.0, 0.0, &mut deltas);
        assert_relative_eq!(deltas[0].length(), 4.0 * deltas[1].length(), epsilon = 1e-12);
    }
}
