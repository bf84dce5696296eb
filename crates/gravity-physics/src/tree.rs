//! Arena-based spatial tree rebuilt every simulation step.
//!
//! Nodes live contiguously in a `Vec` and refer to each other by index. The
//! tree never copies particles: it keeps a permutation of particle indices
//! that is partitioned in place during the build, so every node owns one
//! contiguous range of that permutation and the children of a node split
//! their parent's range exactly.
//!
//! A node is split only when it holds more than `max_count` particles. It is
//! divided into `divide_factor x divide_factor` cells whose extents are
//! jittered by `randomness` to avoid grid-aligned artifacts between steps.
//! Empty cells are pruned.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bounds::Rect;
use crate::constants::*;
use crate::particle::Particle;

/// Parameters controlling how the tree subdivides space
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    /// Split a node when it holds more than this many particles
    pub max_count: usize,
    /// Cells per axis on every split (at least 2)
    pub divide_factor: usize,
    /// Jitter applied to cell extents, in `[0, 1]`
    pub randomness: f64,
    /// Nodes at this depth are never split
    pub max_depth: u32,
    /// Nodes narrower than this on both axes are never split
    pub min_extent: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_count: TREE_MAX_COUNT,
            divide_factor: TREE_DIVIDE_FACTOR,
            randomness: TREE_RANDOMNESS,
            max_depth: TREE_MAX_DEPTH,
            min_extent: TREE_MIN_EXTENT,
        }
    }
}

/// Index into the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    fn new(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize, "NodeId overflow");
        NodeId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A region of space with the particles inside it.
#[derive(Clone, Debug)]
pub struct Node {
    /// Region covered by this node
    pub rect: Rect,
    /// Sum of contained particle masses
    pub mass: f64,
    /// Root is depth 0
    pub depth: u32,
    start: u32,
    end: u32,
    first_child: u32,
    child_count: u32,
}

impl Node {
    fn new(rect: Rect, start: usize, end: usize, mass: f64, depth: u32) -> Self {
        Self {
            rect,
            mass,
            depth,
            start: start as u32,
            end: end as u32,
            first_child: 0,
            child_count: 0,
        }
    }

    /// Number of particles in this region
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Terminal leaves have no children
    pub fn is_leaf(&self) -> bool {
        self.child_count == 0
    }
}

/// Structural statistics of a built tree
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub max_depth: u32,
    /// Leaves that stayed over `max_count` because of the depth or size floor
    pub capped_leaves: usize,
    /// Estimated interaction count: squared child counts of every internal
    /// node plus squared particle counts of every leaf
    pub interactions: u64,
}

/// Spatial partition of a particle slice.
///
/// Holds particle indices, not particles, so it stays valid as a debug
/// handle after the particles it was built from have been integrated.
#[derive(Clone, Debug, Default)]
pub struct SpatialTree {
    nodes: Vec<Node>,
    order: Vec<u32>,
    capped_leaves: usize,
}

impl SpatialTree {
    /// Build a tree over `particles`. An empty slice gives an empty tree.
    pub fn build<R: Rng + ?Sized>(
        particles: &[Particle],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut tree = SpatialTree {
            nodes: Vec::with_capacity(particles.len() / params.max_count.max(1) * 2 + 1),
            order: (0..particles.len() as u32).collect(),
            capped_leaves: 0,
        };

        let Some(rect) = Rect::enclosing(particles) else {
            return tree;
        };

        let mass = particles.iter().map(|p| p.mass).sum();
        tree.nodes.push(Node::new(rect, 0, particles.len(), mass, 0));

        // Explicit work stack, so deep trees cannot exhaust the thread's stack
        let mut scratch = Vec::with_capacity(particles.len());
        let mut pending = vec![NodeId::ROOT];
        while let Some(id) = pending.pop() {
            tree.split(id, particles, params, rng, &mut scratch, &mut pending);
        }
        tree
    }

    /// Subdivide one node, pushing its new children onto `pending`
    fn split<R: Rng + ?Sized>(
        &mut self,
        id: NodeId,
        particles: &[Particle],
        params: &TreeParams,
        rng: &mut R,
        scratch: &mut Vec<(usize, u32)>,
        pending: &mut Vec<NodeId>,
    ) {
        let node = self.nodes[id.index()].clone();
        if node.len() <= params.max_count {
            return;
        }

        let too_small =
            node.rect.width() < params.min_extent && node.rect.height() < params.min_extent;
        if node.depth >= params.max_depth || too_small {
            log::debug!(
                "tree leaf capped at depth {} with {} particles",
                node.depth,
                node.len()
            );
            self.capped_leaves += 1;
            return;
        }

        let divide_factor = params.divide_factor.max(2);
        let grid = node.rect.grid(divide_factor, params.randomness, rng);
        let cell_count = divide_factor * divide_factor;

        // Counting sort of this node's range by cell
        let range = node.start as usize..node.end as usize;
        let mut counts = vec![0usize; cell_count];
        scratch.clear();
        for &index in &self.order[range.clone()] {
            let cell = grid.cell_of(particles[index as usize].pos());
            counts[cell] += 1;
            scratch.push((cell, index));
        }

        let mut cursors = Vec::with_capacity(cell_count);
        let mut offset = range.start;
        for &count in &counts {
            cursors.push(offset);
            offset += count;
        }
        for &(cell, index) in scratch.iter() {
            self.order[cursors[cell]] = index;
            cursors[cell] += 1;
        }

        // A split that puts everything in one cell covering the whole node
        // makes no progress, e.g. coincident particles in a one-ulp rect
        let mut occupied = counts.iter().enumerate().filter(|(_, count)| **count > 0);
        if let (Some((cell, _)), None) = (occupied.next(), occupied.next()) {
            if grid.cell_rect(cell) == node.rect {
                log::debug!(
                    "tree leaf capped at depth {}: {} particles cannot be separated",
                    node.depth,
                    node.len()
                );
                self.capped_leaves += 1;
                return;
            }
        }

        let first_child = self.nodes.len();
        let mut start = range.start;
        for (cell, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let end = start + count;
            let mass = self.order[start..end]
                .iter()
                .map(|&i| particles[i as usize].mass)
                .sum();
            self.nodes
                .push(Node::new(grid.cell_rect(cell), start, end, mass, node.depth + 1));
            start = end;
        }

        let child_count = self.nodes.len() - first_child;
        let parent = &mut self.nodes[id.index()];
        parent.first_child = first_child as u32;
        parent.child_count = child_count as u32;

        pending.extend((first_child..first_child + child_count).rev().map(NodeId::new));
    }

    /// Root node, `None` for a tree over no particles
    pub fn root(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then_some(NodeId::ROOT)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children of a node; siblings are stored next to each other
    pub fn children(&self, id: NodeId) -> impl ExactSizeIterator<Item = NodeId> {
        let node = &self.nodes[id.index()];
        let first = node.first_child as usize;
        (first..first + node.child_count as usize).map(NodeId::new)
    }

    /// Indices of the particles inside a node
    pub fn particles(&self, id: NodeId) -> &[u32] {
        let node = &self.nodes[id.index()];
        &self.order[node.start as usize..node.end as usize]
    }

    /// All terminal leaves
    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_leaf())
            .map(|(i, _)| NodeId::new(i))
    }

    /// Boundary rectangles of every node, for debug overlays
    pub fn rects(&self) -> Vec<Rect> {
        self.nodes.iter().map(|node| node.rect).collect()
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            nodes: self.nodes.len(),
            capped_leaves: self.capped_leaves,
            ..Default::default()
        };
        for node in &self.nodes {
            stats.max_depth = stats.max_depth.max(node.depth);
            if node.is_leaf() {
                stats.leaves += 1;
                stats.interactions += (node.len() as u64).pow(2);
            } else {
                stats.interactions += (node.child_count as u64).pow(2);
            }
        }
        stats
    }
}
