//! Axis-aligned boundary rectangles used by the spatial tree

use glam::DVec2;
use rand::Rng;

use crate::particle::Particle;

/// An axis-aligned rectangle in screen orientation (`top < bottom`).
///
/// Containment is half-open: `[left, right) x [top, bottom)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Smallest rectangle containing every particle under half-open rules.
    ///
    /// The far edges sit one ulp past the largest coordinate so the extreme
    /// particles are still inside. Returns `None` for an empty slice.
    pub fn enclosing(particles: &[Particle]) -> Option<Self> {
        if particles.is_empty() {
            return None;
        }
        let (min, max) = particles.iter().fold(
            (DVec2::splat(f64::INFINITY), DVec2::splat(f64::NEG_INFINITY)),
            |(min, max), p| (min.min(p.pos()), max.max(p.pos())),
        );
        Some(Self::new(min.x, min.y, max.x.next_up(), max.y.next_up()))
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> DVec2 {
        DVec2::new(
            (self.left + self.right) * 0.5,
            (self.top + self.bottom) * 0.5,
        )
    }

    pub fn contains(&self, point: DVec2) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }

    /// Split boundaries for subdividing this rectangle into `divide_factor`
    /// cells per axis. See [`axis_boundaries`].
    pub fn grid<R: Rng + ?Sized>(
        &self,
        divide_factor: usize,
        randomness: f64,
        rng: &mut R,
    ) -> Grid {
        Grid {
            xs: axis_boundaries(self.left, self.right, divide_factor, randomness, rng),
            ys: axis_boundaries(self.top, self.bottom, divide_factor, randomness, rng),
        }
    }
}

/// Cell boundaries along both axes of a subdivided rectangle.
///
/// Each axis holds `divide_factor + 1` non-decreasing values; the first and
/// last are the parent's edges.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

impl Grid {
    pub fn divide_factor(&self) -> usize {
        self.xs.len() - 1
    }

    /// Row-major index of the first cell containing `point`.
    ///
    /// The point must lie inside the parent rectangle.
    pub fn cell_of(&self, point: DVec2) -> usize {
        let column = cell_on_axis(&self.xs, point.x);
        let row = cell_on_axis(&self.ys, point.y);
        row * self.divide_factor() + column
    }

    pub fn cell_rect(&self, cell: usize) -> Rect {
        let d = self.divide_factor();
        let (row, column) = (cell / d, cell % d);
        Rect::new(
            self.xs[column],
            self.ys[row],
            self.xs[column + 1],
            self.ys[row + 1],
        )
    }
}

/// Last cell whose start is `<= value`, i.e. the cell `[b_i, b_i+1)` that
/// holds it. Zero-width cells are skipped because a later equal boundary wins.
fn cell_on_axis(boundaries: &[f64], value: f64) -> usize {
    let interior = &boundaries[1..boundaries.len() - 1];
    interior.partition_point(|&b| b <= value)
}

/// Boundaries splitting `[start, end)` into `divide_factor` cells.
///
/// Every cell but the last is `extent / divide_factor` wide, scaled by a
/// random factor in `1 ± randomness / 2`. The running boundary never passes
/// `end`, and the last cell takes whatever extent remains.
pub fn axis_boundaries<R: Rng + ?Sized>(
    start: f64,
    end: f64,
    divide_factor: usize,
    randomness: f64,
    rng: &mut R,
) -> Vec<f64> {
    let step = (end - start) / divide_factor as f64;
    let mut boundaries = Vec::with_capacity(divide_factor + 1);
    boundaries.push(start);

    let mut cursor = start;
    for _ in 1..divide_factor {
        let jitter = if randomness > 0.0 {
            (rng.random::<f64>() - 0.5) * randomness
        } else {
            0.0
        };
        cursor = (cursor + step * (1.0 + jitter)).min(end);
        boundaries.push(cursor);
    }

    boundaries.push(end);
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_contains_is_half_open() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(rect.contains(DVec2::new(0.0, 0.0)));
        assert!(rect.contains(DVec2::new(9.999, 9.999)));
        assert!(!rect.contains(DVec2::new(10.0, 5.0)));
        assert!(!rect.contains(DVec2::new(5.0, 10.0)));
    }

    #[test]
    fn test_enclosing_contains_extremes() {
        let particles = [
            Particle::new(DVec2::new(-3.0, 2.0), 1.0),
            Particle::new(DVec2::new(7.0, -1.0), 1.0),
        ];
        let rect = Rect::enclosing(&particles).unwrap();
        assert_eq!(rect.left, -3.0);
        assert_eq!(rect.top, -1.0);
        for p in &particles {
            assert!(rect.contains(p.pos()));
        }
        assert!(Rect::enclosing(&[]).is_none());
    }

    #[test]
    fn test_axis_boundaries_without_randomness() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let b = axis_boundaries(0.0, 12.0, 3, 0.0, &mut rng);
        assert_eq!(b, vec![0.0, 4.0, 8.0, 12.0]);
    }

    #[test]
    fn test_axis_boundaries_stay_ordered_with_jitter() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let b = axis_boundaries(-5.0, 5.0, 6, 1.0, &mut rng);
            assert_eq!(b.len(), 7);
            assert_eq!(b[0], -5.0);
            assert_eq!(b[6], 5.0);
            assert!(b.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_cell_of_matches_cell_rect() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rect = Rect::new(0.0, 0.0, 9.0, 9.0);
        let grid = rect.grid(3, 0.4, &mut rng);
        for i in 0..90 {
            let point = DVec2::new(i as f64 * 0.1, 8.95 - i as f64 * 0.099);
            let cell = grid.cell_of(point);
            assert!(grid.cell_rect(cell).contains(point));
        }
    }
}
