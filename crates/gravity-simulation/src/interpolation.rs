//! Dynamic frame-rate interpolation
//!
//! Physics steps and display frames run at different rates. The
//! interpolator spreads every committed step over `n + 1` display frames,
//! blending from the last rendered positions toward the next step, where
//! `n = ceil(step_interval / render_interval - 1)` clamped to
//! `[0, max_frames]`. Both intervals are smoothed moving averages.

use std::collections::VecDeque;

use glam::DVec2;

use crate::buffer_pool::FrameBuffer;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpolationParams {
    /// Upper bound on synthesized frames between two steps
    pub max_frames: u32,
    /// Samples kept by each moving average
    pub history: usize,
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            max_frames: 4,
            history: 30,
        }
    }
}

/// Moving average that damps outliers.
///
/// Each new sample is clamped to `[0.5, 2]` times the current average
/// before it enters the window.
#[derive(Clone, Debug)]
pub struct RateSmoother {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RateSmoother {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Add a sample; non-finite and negative samples are ignored
    pub fn push(&mut self, sample: f64) {
        if !sample.is_finite() || sample < 0.0 {
            return;
        }
        let sample = match self.average() {
            Some(avg) if avg > 0.0 => sample.clamp(avg * 0.5, avg * 2.0),
            _ => sample,
        };
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Number of frames to synthesize between two steps.
///
/// Always within `[0, max_frames]`, including for zero, infinite or NaN
/// intervals.
pub fn interpolation_frames(step_interval: f64, render_interval: f64, max_frames: u32) -> u32 {
    if !(render_interval > 0.0) || !(step_interval >= 0.0) {
        return 0;
    }
    let n = (step_interval / render_interval - 1.0).ceil();
    if n.is_nan() {
        return 0;
    }
    n.clamp(0.0, max_frames as f64) as u32
}

/// Counters describing how well the display kept up
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterpolationStats {
    /// Steps committed
    pub commits: u64,
    /// Commits without a next step, extrapolated from velocity
    pub extrapolated: u64,
    /// Display frames that repeated the last state
    pub dropped: u64,
}

/// Synthesizes display positions between committed steps.
#[derive(Clone, Debug)]
pub struct FrameInterpolator {
    params: InterpolationParams,
    step_interval: RateSmoother,
    render_interval: RateSmoother,
    last_render_at: Option<f64>,
    base: Vec<DVec2>,
    delta: Vec<DVec2>,
    rendered: Vec<DVec2>,
    frames: u32,
    sub_frame: u32,
    stalled: bool,
    stats: InterpolationStats,
}

impl FrameInterpolator {
    pub fn new(params: InterpolationParams) -> Self {
        Self {
            step_interval: RateSmoother::new(params.history),
            render_interval: RateSmoother::new(params.history),
            params,
            last_render_at: None,
            base: Vec::new(),
            delta: Vec::new(),
            rendered: Vec::new(),
            frames: 0,
            sub_frame: 0,
            stalled: false,
            stats: InterpolationStats::default(),
        }
    }

    /// Start blending toward a new step.
    ///
    /// `current` is the step being committed and `next` the following one if
    /// it has already been delivered. Without `next`, the target is each
    /// particle's position advanced by its own velocity. `step_interval_ms`
    /// is how long the producer took for the step.
    ///
    /// Returns the number of frames that will be synthesized.
    pub fn commit(
        &mut self,
        current: &FrameBuffer,
        next: Option<&FrameBuffer>,
        step_interval_ms: f64,
    ) -> u32 {
        self.step_interval.push(step_interval_ms);

        let count = current.particle_count();
        if self.rendered.len() != count {
            self.rendered = current.positions().collect();
        }
        self.base.clone_from(&self.rendered);

        self.delta.clear();
        match next.filter(|next| next.particle_count() == count) {
            Some(next) => {
                self.delta
                    .extend(next.positions().zip(&self.base).map(|(target, base)| target - *base));
            }
            None => {
                self.stats.extrapolated += 1;
                log::debug!("no step ahead, extrapolating {count} particles from velocity");
                self.delta.extend((0..count).map(|i| {
                    current.position(i) + current.velocity(i) - self.base[i]
                }));
            }
        }

        if self.stalled {
            log::debug!("interpolation resumed after {} held frames", self.stats.dropped);
            self.stalled = false;
        }

        self.frames = self.frame_count();
        self.sub_frame = 0;
        self.stats.commits += 1;
        self.frames
    }

    /// Positions for a display frame rendered at `now_ms`.
    ///
    /// Past the last sub-frame the final state is held and the frame counts
    /// as dropped.
    pub fn render(&mut self, now_ms: f64) -> &[DVec2] {
        if let Some(last) = self.last_render_at {
            self.render_interval.push(now_ms - last);
        }
        self.last_render_at = Some(now_ms);

        if self.rendered.is_empty() {
            return &self.rendered;
        }

        if self.sub_frame <= self.frames {
            self.sub_frame += 1;
        } else {
            self.stats.dropped += 1;
            if !self.stalled {
                log::warn!("dropped frame: no new step after {} sub-frames", self.frames + 1);
                self.stalled = true;
            }
        }

        let blend = self.blend();
        for ((out, base), delta) in self.rendered.iter_mut().zip(&self.base).zip(&self.delta) {
            *out = *base + *delta * blend;
        }
        &self.rendered
    }

    /// True once every sub-frame of the current step has been shown
    pub fn needs_step(&self) -> bool {
        self.rendered.is_empty() || self.sub_frame > self.frames
    }

    /// Blend factor of the last rendered frame, in `[0, 1]`
    pub fn blend(&self) -> f64 {
        (self.sub_frame as f64 / (self.frames + 1) as f64).min(1.0)
    }

    /// Synthesized frames for the current smoothed rates
    pub fn frame_count(&self) -> u32 {
        match (self.step_interval.average(), self.render_interval.average()) {
            (Some(step), Some(render)) => {
                interpolation_frames(step, render, self.params.max_frames)
            }
            _ => 0,
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn positions(&self) -> &[DVec2] {
        &self.rendered
    }

    pub fn stats(&self) -> InterpolationStats {
        self.stats
    }

    pub fn step_interval(&self) -> Option<f64> {
        self.step_interval.average()
    }

    pub fn render_interval(&self) -> Option<f64> {
        self.render_interval.average()
    }

    /// Forget rendered state and rate history, e.g. after reconfiguration
    pub fn reset(&mut self) {
        *self = Self::new(self.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use approx::assert_relative_eq;
    use gravity_physics::Particle;
    use proptest::prelude::*;

    fn frame(pool: &mut BufferPool, particles: &[Particle]) -> FrameBuffer {
        let mut buffer = pool.checkout().unwrap();
        buffer.fill_from(particles);
        buffer
    }

    fn at(x: f64, vx: f64) -> Particle {
        Particle::new(DVec2::new(x, 0.0), 1.0).with_velocity(DVec2::new(vx, 0.0))
    }

    /// Interpolator that has seen steady 16ms render ticks
    fn warmed(max_frames: u32, clock: &mut f64) -> FrameInterpolator {
        let mut interp = FrameInterpolator::new(InterpolationParams {
            max_frames,
            history: 10,
        });
        for _ in 0..5 {
            interp.render(*clock);
            *clock += 16.0;
        }
        interp
    }

    #[test]
    fn test_smoother_clamps_outliers() {
        let mut s = RateSmoother::new(4);
        s.push(10.0);
        s.push(1000.0);
        assert_eq!(s.average(), Some(15.0));
        s.push(0.0);
        // clamped to half of 15
        assert_relative_eq!(s.average().unwrap(), (10.0 + 20.0 + 7.5) / 3.0);
    }

    #[test]
    fn test_smoother_window() {
        let mut s = RateSmoother::new(2);
        s.push(10.0);
        s.push(12.0);
        s.push(14.0);
        assert_eq!(s.len(), 2);
        assert_eq!(s.average(), Some(13.0));
        s.push(f64::NAN);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_frame_count_formula() {
        assert_eq!(interpolation_frames(16.0, 16.0, 5), 0);
        assert_eq!(interpolation_frames(33.0, 16.0, 5), 2);
        assert_eq!(interpolation_frames(32.0, 16.0, 5), 1);
        assert_eq!(interpolation_frames(8.0, 16.0, 5), 0);
        assert_eq!(interpolation_frames(1000.0, 16.0, 5), 5);
        assert_eq!(interpolation_frames(10.0, 0.0, 5), 0);
        assert_eq!(interpolation_frames(f64::INFINITY, 16.0, 3), 3);
        assert_eq!(interpolation_frames(f64::NAN, 16.0, 3), 0);
    }

    #[test]
    fn test_blends_toward_next_step() {
        let mut clock = 0.0;
        let mut interp = warmed(4, &mut clock);
        let mut pool = BufferPool::new(2, 1, 0);
        let current = frame(&mut pool, &[at(0.0, 0.0)]);
        let next = frame(&mut pool, &[at(12.0, 0.0)]);

        // 48ms steps at 16ms frames: two synthesized frames, three in total
        let n = interp.commit(&current, Some(&next), 48.0);
        assert_eq!(n, 2);

        let mut xs = Vec::new();
        for _ in 0..3 {
            xs.push(interp.render(clock)[0].x);
            clock += 16.0;
        }
        assert_relative_eq!(xs[0], 4.0);
        assert_relative_eq!(xs[1], 8.0);
        assert_relative_eq!(xs[2], 12.0);
        assert!(interp.needs_step());
    }

    #[test]
    fn test_extrapolates_from_velocity_without_next() {
        let mut clock = 0.0;
        let mut interp = warmed(4, &mut clock);
        let mut pool = BufferPool::new(1, 1, 0);
        let current = frame(&mut pool, &[at(5.0, 2.0)]);

        interp.commit(&current, None, 16.0);
        let x = interp.render(clock)[0].x;
        assert_relative_eq!(x, 7.0);
        assert_eq!(interp.stats().extrapolated, 1);
    }

    #[test]
    fn test_holds_and_counts_dropped_frames() {
        let mut clock = 0.0;
        let mut interp = warmed(0, &mut clock);
        let mut pool = BufferPool::new(2, 1, 0);
        let current = frame(&mut pool, &[at(0.0, 0.0)]);
        let next = frame(&mut pool, &[at(3.0, 0.0)]);

        interp.commit(&current, Some(&next), 100.0);
        assert_eq!(interp.frames(), 0);
        assert_eq!(interp.render(clock)[0].x, 3.0);
        for _ in 0..3 {
            clock += 16.0;
            assert_eq!(interp.render(clock)[0].x, 3.0);
        }
        assert_eq!(interp.stats().dropped, 3);
    }

    #[test]
    fn test_recommit_starts_from_rendered_positions() {
        let mut clock = 0.0;
        let mut interp = warmed(4, &mut clock);
        let mut pool = BufferPool::new(3, 1, 0);
        let a = frame(&mut pool, &[at(0.0, 1.0)]);
        let b = frame(&mut pool, &[at(1.5, 0.0)]);

        // Extrapolate to x = 1, then the real step lands at 1.5
        interp.commit(&a, None, 16.0);
        assert_relative_eq!(interp.render(clock)[0].x, 1.0);
        interp.commit(&b, None, 16.0);
        let x = interp.render(clock + 16.0)[0].x;
        assert_relative_eq!(x, 1.5);
    }

    #[test]
    fn test_blend_is_monotonic() {
        let mut clock = 0.0;
        let mut interp = warmed(8, &mut clock);
        let mut pool = BufferPool::new(2, 1, 0);
        let current = frame(&mut pool, &[at(0.0, 0.0)]);
        let next = frame(&mut pool, &[at(1.0, 0.0)]);
        interp.commit(&current, Some(&next), 80.0);

        let mut last = 0.0;
        for _ in 0..12 {
            interp.render(clock);
            clock += 16.0;
            assert!(interp.blend() >= last);
            assert!(interp.blend() <= 1.0);
            last = interp.blend();
        }
        assert_eq!(last, 1.0);
    }

    proptest! {
        #[test]
        fn prop_frame_count_is_bounded(
            step in prop::num::f64::ANY,
            render in prop::num::f64::ANY,
            max_frames in 0u32..20,
        ) {
            let n = interpolation_frames(step, render, max_frames);
            prop_assert!(n <= max_frames);
        }

        #[test]
        fn prop_smoothed_frame_count_is_bounded(
            steps in prop::collection::vec(0.0f64..1e9, 1..40),
            renders in prop::collection::vec(0.0f64..1e3, 1..40),
            max_frames in 0u32..10,
        ) {
            let mut interp = FrameInterpolator::new(InterpolationParams { max_frames, history: 8 });
            let mut pool = BufferPool::new(1, 1, 0);
            let current = frame(&mut pool, &[at(0.0, 1.0)]);
            let mut clock = 0.0;
            for (step, render) in steps.iter().zip(renders.iter().cycle()) {
                clock += render;
                interp.render(clock);
                let n = interp.commit(&current, None, *step);
                prop_assert!(n <= max_frames);
            }
        }
    }
}
