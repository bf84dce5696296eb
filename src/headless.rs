//! Window-less drivers for the pipeline: a fixed-rate render loop, a
//! record-as-fast-as-possible loop and recording playback.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use glam::DVec2;
use gravity_simulation::{
    FrameInterpolator, Pipeline, Playback, Recorder, Recording, SimulationConfig,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Frame time and step rate bookkeeping, reported once per second
struct Throughput {
    frame_times: VecDeque<f64>,
    last_frame_at: Option<f64>,
    last_report_at: f64,
    steps: u64,
    step_ms: f64,
    center: Option<DVec2>,
}

impl Throughput {
    fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(100),
            last_frame_at: None,
            last_report_at: 0.0,
            steps: 0,
            step_ms: 0.0,
            center: None,
        }
    }

    fn step(&mut self, step_ms: f64, center: Option<DVec2>) {
        self.steps += 1;
        self.step_ms += step_ms;
        self.center = center;
    }

    fn frame(&mut self, now_ms: f64) {
        if let Some(last) = self.last_frame_at {
            self.frame_times.push_back(now_ms - last);
            if self.frame_times.len() > 100 {
                self.frame_times.pop_front();
            }
        }
        self.last_frame_at = Some(now_ms);
    }

    fn report(&mut self, now_ms: f64, interpolator: &FrameInterpolator, pipeline: &Pipeline) {
        let elapsed = now_ms - self.last_report_at;
        if elapsed < 1000.0 {
            return;
        }
        let avg_frame_time = if self.frame_times.is_empty() {
            0.0
        } else {
            self.frame_times.iter().sum::<f64>() / self.frame_times.len() as f64
        };
        let fps = if avg_frame_time > 0.0 { 1000.0 / avg_frame_time } else { 0.0 };
        let steps_per_sec = self.steps as f64 * 1000.0 / elapsed;
        let avg_step = if self.steps > 0 { self.step_ms / self.steps as f64 } else { 0.0 };
        let stats = interpolator.stats();
        log::info!(
            "{fps:.1} fps, {steps_per_sec:.1} steps/s ({avg_step:.2}ms each), \
             {} interpolated frames, {} dropped, {} skipped steps",
            interpolator.frames(),
            stats.dropped,
            pipeline.skipped()
        );
        if let Some(center) = self.center {
            log::debug!("center of mass ({:.2}, {:.2})", center.x, center.y);
        }
        self.last_report_at = now_ms;
        self.steps = 0;
        self.step_ms = 0.0;
    }
}

fn wait_ready(pipeline: &mut Pipeline) -> Result<()> {
    while !pipeline.is_ready() {
        pipeline.poll_timeout(POLL_INTERVAL)?;
    }
    log::info!("✓ Pipeline ready with {} particles", pipeline.particle_count());
    Ok(())
}

fn recording_rate(config: &SimulationConfig) -> u32 {
    config.target_rate.round().max(1.0) as u32
}

/// Render at `target_rate` for `seconds`, interpolating between steps.
/// With `record` set, the delivered steps are captured at the same rate.
pub fn run(config: &SimulationConfig, seconds: f64, record: bool) -> Result<Option<Recording>> {
    let mut pipeline = Pipeline::spawn(config.clone(), None)?;
    wait_ready(&mut pipeline)?;

    let mut interpolator = FrameInterpolator::new(config.interpolation());
    let mut recorder =
        record.then(|| Recorder::new(recording_rate(config), pipeline.particle_count()));
    let mut throughput = Throughput::new();

    let frame_interval = Duration::from_secs_f64(1.0 / config.target_rate);
    let started = Instant::now();
    let mut next_tick = started;

    while started.elapsed().as_secs_f64() < seconds {
        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        pipeline.poll()?;
        pipeline.request_steps(now_ms)?;

        if interpolator.needs_step() {
            if let Some(frame) = pipeline.next_frame() {
                let next = pipeline.peek().map(|f| &f.buffer);
                interpolator.commit(&frame.buffer, next, frame.step_ms);
                if let Some(recorder) = recorder.as_mut() {
                    recorder.offer(now_ms, &frame.buffer)?;
                }
                throughput.step(frame.step_ms, frame.buffer.center_of_mass());
                pipeline.ack(frame.buffer)?;
            }
        }

        interpolator.render(now_ms);
        throughput.frame(now_ms);
        throughput.report(now_ms, &interpolator, &pipeline);

        next_tick += frame_interval;
        match next_tick.checked_duration_since(Instant::now()) {
            Some(wait) => thread::sleep(wait),
            // Fell behind, don't try to catch up
            None => next_tick = Instant::now(),
        }
    }

    let stats = interpolator.stats();
    log::info!(
        "✓ Finished: {} steps committed, {} extrapolated, {} dropped frames",
        stats.commits,
        stats.extrapolated,
        stats.dropped
    );
    pipeline.dispose();
    Ok(recorder.map(Recorder::finish))
}

/// Step as fast as the pipeline delivers until `frames` steps are recorded
pub fn record(config: &SimulationConfig, frames: usize) -> Result<Recording> {
    let mut pipeline = Pipeline::spawn(config.clone(), None)?;
    wait_ready(&mut pipeline)?;

    let mut recording = Recording::new(recording_rate(config), pipeline.particle_count());
    let started = Instant::now();
    let mut last_report = started;

    while recording.frame_count() < frames {
        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        pipeline.request_steps(now_ms)?;
        pipeline.poll_timeout(POLL_INTERVAL)?;
        while let Some(frame) = pipeline.next_frame() {
            if recording.frame_count() < frames {
                recording.push_buffer(&frame.buffer)?;
            }
            pipeline.ack(frame.buffer)?;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            log::info!("recorded {}/{frames} frames", recording.frame_count());
            last_report = Instant::now();
        }
    }

    log::info!(
        "✓ Recorded {frames} frames in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    pipeline.dispose();
    Ok(recording)
}

/// Mean position of one recorded frame
pub fn centroid(frame: &[f32], components: usize) -> Option<DVec2> {
    if components < 2 || frame.len() < components {
        return None;
    }
    let (sum, count) = frame
        .chunks_exact(components)
        .fold((DVec2::ZERO, 0usize), |(sum, count), p| {
            (sum + DVec2::new(p[0] as f64, p[1] as f64), count + 1)
        });
    Some(sum / count as f64)
}

/// Replay a recording in real time, logging the centroid once per second
pub fn play(recording: Recording, looping: bool, seconds: Option<f64>) -> Result<()> {
    log::info!(
        "Recording: {} frames of {} particles at {} fps ({} components)",
        recording.frame_count(),
        recording.particle_count(),
        recording.rate(),
        recording.component_count()
    );
    let components = recording.component_count();
    let playback = Playback::new(recording, looping);
    let limit_ms = seconds.map(|s| s * 1000.0);
    let frame_interval = match playback.recording().rate() {
        0 => Duration::from_millis(16),
        rate => Duration::from_secs_f64(1.0 / rate as f64),
    };

    let started = Instant::now();
    let mut shown = 0u64;
    let mut last_index = None;
    let mut last_second = None;
    loop {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        if limit_ms.is_some_and(|limit| elapsed_ms >= limit) {
            break;
        }
        let Some(index) = playback.frame_index_at(elapsed_ms) else {
            break;
        };
        if last_index != Some(index) {
            last_index = Some(index);
            shown += 1;
        }

        let second = (elapsed_ms / 1000.0) as u64;
        if last_second != Some(second) {
            last_second = Some(second);
            let frame = playback.recording().frame(index);
            if let Some(center) = frame.and_then(|f| centroid(f, components)) {
                log::info!(
                    "t={second}s frame {index}: centroid ({:.2}, {:.2})",
                    center.x,
                    center.y
                );
            }
        }
        thread::sleep(frame_interval);
    }

    log::info!("✓ Played {shown} frames");
    Ok(())
}
