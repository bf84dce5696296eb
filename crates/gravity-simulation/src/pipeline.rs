//! Producer/consumer pipeline between the physics stepper and a render loop
//!
//! The producer owns the particle state, the backend and the [`BufferPool`].
//! It runs on its own thread and only talks to the consumer through two
//! channels: [`Command`]s in, [`Event`]s out. Buffers travel by move.
//!
//! [`Producer`] is the synchronous command handler and can be driven
//! directly without a thread. [`Pipeline`] is the consumer-side handle that
//! spawns the producer and applies flow control.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use glam::DVec2;
use gravity_physics::{
    total_mass, Backend, DirectBackend, Particle, PhysicsStepper, Rect, SpatialTree, StepStats,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::buffer_pool::{BufferPool, FrameBuffer, PoolCounts, PoolError};
use crate::params::{BackendKind, ConfigError, SimulationConfig};

/// Messages from the consumer to the producer
#[derive(Debug)]
pub enum Command {
    /// Set up particles, backend and pool. Without `particles` the configured
    /// initializer spawns them.
    Init {
        config: SimulationConfig,
        particles: Option<Vec<Particle>>,
    },
    /// Run one step into a pooled buffer
    Step { timestamp: f64 },
    /// Return a delivered buffer
    Ack(FrameBuffer),
    /// Full reinitialization, same as `Init`
    Reconfigure {
        config: SimulationConfig,
        particles: Option<Vec<Particle>>,
    },
    Dispose,
}

/// Optional per-step diagnostics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugPayload {
    /// Velocity delta of every particle
    pub forces: Option<Vec<DVec2>>,
    /// Rectangles of every tree node
    pub rects: Option<Vec<Rect>>,
}

/// One completed step
#[derive(Debug)]
pub struct Frame {
    /// Timestamp of the request that produced this step
    pub timestamp: f64,
    pub buffer: FrameBuffer,
    pub debug: Option<DebugPayload>,
    pub stats: StepStats,
    /// Wall time the producer spent on the step
    pub step_ms: f64,
}

/// Messages from the producer to the consumer
#[derive(Debug)]
pub enum Event {
    Ready {
        generation: u64,
        particle_count: usize,
    },
    Data(Frame),
    /// A step request found no available buffer, or arrived before init
    Skipped { timestamp: f64, generation: u64 },
    /// The producer refused a configuration and kept its previous state
    Rejected(ConfigError),
}

struct Session {
    config: SimulationConfig,
    particles: Vec<Particle>,
    backend: Box<dyn Backend>,
    pool: BufferPool,
}

/// Producer side command handler
#[derive(Default)]
pub struct Producer {
    generation: u64,
    session: Option<Session>,
}

impl Producer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the current configuration, 0 before init
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn particles(&self) -> &[Particle] {
        self.session.as_ref().map_or(&[], |s| s.particles.as_slice())
    }

    pub fn pool_counts(&self) -> Option<PoolCounts> {
        self.session.as_ref().map(|s| s.pool.counts())
    }

    /// Handle one command. `Break` means the producer should stop.
    pub fn handle(&mut self, command: Command) -> ControlFlow<(), Option<Event>> {
        let event = match command {
            Command::Init { config, particles } | Command::Reconfigure { config, particles } => {
                Some(self.configure(config, particles))
            }
            Command::Step { timestamp } => Some(self.step(timestamp)),
            Command::Ack(buffer) => {
                self.acknowledge(buffer);
                None
            }
            Command::Dispose => {
                log::info!("producer disposed at generation {}", self.generation);
                return ControlFlow::Break(());
            }
        };
        ControlFlow::Continue(event)
    }

    fn configure(&mut self, config: SimulationConfig, particles: Option<Vec<Particle>>) -> Event {
        if let Err(err) = config.validate() {
            log::error!("rejected configuration: {err}");
            return Event::Rejected(err);
        }

        let particles = match particles {
            Some(particles) if !particles.is_empty() => particles,
            _ => {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
                config
                    .initializer
                    .spawn(config.particle_count, &config.spawn(), &mut rng)
            }
        };

        let backend: Box<dyn Backend> = match config.backend {
            BackendKind::Tree => Box::new(PhysicsStepper::new(config.physics())),
            BackendKind::Direct => Box::new(DirectBackend::new(config.physics())),
        };

        self.generation += 1;
        let pool = BufferPool::new(config.buffer_count, particles.len(), self.generation);
        log::info!(
            "producer ready: {} particles (total mass {:.1}), {} buffers, {:?} backend, \
             generation {}",
            particles.len(),
            total_mass(&particles),
            config.buffer_count,
            config.backend,
            self.generation
        );

        let particle_count = particles.len();
        self.session = Some(Session {
            config,
            particles,
            backend,
            pool,
        });
        Event::Ready {
            generation: self.generation,
            particle_count,
        }
    }

    fn step(&mut self, timestamp: f64) -> Event {
        let generation = self.generation;
        let Some(session) = self.session.as_mut() else {
            log::warn!("step requested before init, skipping");
            return Event::Skipped { timestamp, generation };
        };

        let mut buffer = match session.pool.checkout() {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("skipping step at {timestamp:.1}ms: {err}");
                return Event::Skipped { timestamp, generation };
            }
        };

        let started = Instant::now();
        let stats = session.backend.step(&mut session.particles);
        buffer.fill_from(&session.particles);
        let step_ms = started.elapsed().as_secs_f64() * 1000.0;

        let config = &session.config;
        let debug = (config.debug_forces || config.debug_tree).then(|| DebugPayload {
            forces: session.backend.forces().map(<[DVec2]>::to_vec),
            rects: config
                .debug_tree
                .then(|| session.backend.tree().map(SpatialTree::rects))
                .flatten(),
        });

        // Ownership moves to the consumer with the event
        if let Err(err) = session.pool.mark_delivered(buffer.id()) {
            log::error!("pool out of sync on delivery: {err}");
        }

        Event::Data(Frame {
            timestamp,
            buffer,
            debug,
            stats,
            step_ms,
        })
    }

    fn acknowledge(&mut self, buffer: FrameBuffer) {
        let Some(session) = self.session.as_mut() else {
            log::debug!("dropping buffer {} acknowledged before init", buffer.id());
            return;
        };
        match session.pool.acknowledge(buffer) {
            Ok(()) => {}
            Err(err @ PoolError::StaleGeneration { .. }) => log::debug!("dropping {err}"),
            Err(err) => log::error!("acknowledge failed: {err}"),
        }
    }
}

fn run_producer(mut producer: Producer, commands: Receiver<Command>, events: Sender<Event>) {
    log::info!("producer thread started");
    while let Ok(command) = commands.recv() {
        match producer.handle(command) {
            ControlFlow::Break(()) => break,
            ControlFlow::Continue(Some(event)) => {
                if events.send(event).is_err() {
                    log::info!("consumer gone, stopping producer");
                    break;
                }
            }
            ControlFlow::Continue(None) => {}
        }
    }
    log::info!("producer thread stopped");
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("producer thread is gone")]
    Disconnected,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("producer rejected configuration: {0}")]
    Rejected(ConfigError),
    #[error("failed to spawn producer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Consumer side handle of a running producer.
///
/// Requests steps only while `delivered + held + pending < buffer_count`, so
/// the producer never runs more than the pool size ahead. Frames handed out
/// by [`Pipeline::next_frame`] count as held until their buffer is acked.
pub struct Pipeline {
    commands: Sender<Command>,
    events: Receiver<Event>,
    thread: Option<JoinHandle<()>>,
    config: SimulationConfig,
    generation: u64,
    ready: bool,
    particle_count: usize,
    pending_requests: usize,
    held: usize,
    delivered: VecDeque<Frame>,
    skipped: u64,
}

impl Pipeline {
    /// Spawn the producer thread and send it `Init`
    pub fn spawn(
        config: SimulationConfig,
        particles: Option<Vec<Particle>>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("gravity-producer".into())
            .spawn(move || run_producer(Producer::new(), command_rx, event_tx))?;

        let pipeline = Self {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
            config: config.clone(),
            generation: 1,
            ready: false,
            particle_count: 0,
            pending_requests: 0,
            held: 0,
            delivered: VecDeque::new(),
            skipped: 0,
        };
        pipeline.send(Command::Init { config, particles })?;
        Ok(pipeline)
    }

    fn send(&self, command: Command) -> Result<(), PipelineError> {
        self.commands
            .send(command)
            .map_err(|_| PipelineError::Disconnected)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the producer confirmed the current configuration
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn pending_requests(&self) -> usize {
        self.pending_requests
    }

    pub fn delivered(&self) -> usize {
        self.delivered.len()
    }

    /// Step requests that came back without a frame
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Top up step requests to the flow control limit. Returns how many were sent.
    pub fn request_steps(&mut self, timestamp: f64) -> Result<usize, PipelineError> {
        let mut sent = 0;
        while self.ready
            && self.delivered.len() + self.held + self.pending_requests < self.config.buffer_count
        {
            self.send(Command::Step { timestamp })?;
            self.pending_requests += 1;
            sent += 1;
        }
        Ok(sent)
    }

    /// Drain every event that has already arrived, without blocking.
    /// Returns the number of new frames.
    pub fn poll(&mut self) -> Result<usize, PipelineError> {
        let mut frames = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => frames += self.on_event(event)?,
                Err(TryRecvError::Empty) => return Ok(frames),
                Err(TryRecvError::Disconnected) => return Err(PipelineError::Disconnected),
            }
        }
    }

    /// Wait up to `timeout` for one event, then drain the rest.
    /// Returns the number of new frames.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Result<usize, PipelineError> {
        let frames = match self.events.recv_timeout(timeout) {
            Ok(event) => self.on_event(event)?,
            Err(RecvTimeoutError::Timeout) => return Ok(0),
            Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::Disconnected),
        };
        Ok(frames + self.poll()?)
    }

    fn on_event(&mut self, event: Event) -> Result<usize, PipelineError> {
        match event {
            Event::Ready {
                generation,
                particle_count,
            } => {
                if generation == self.generation {
                    self.ready = true;
                    self.particle_count = particle_count;
                }
                Ok(0)
            }
            Event::Data(frame) => {
                if frame.buffer.generation() != self.generation {
                    // Let the producer drop it
                    self.send(Command::Ack(frame.buffer))?;
                    return Ok(0);
                }
                self.pending_requests = self.pending_requests.saturating_sub(1);
                self.delivered.push_back(frame);
                Ok(1)
            }
            Event::Skipped { generation, .. } => {
                if generation == self.generation {
                    self.pending_requests = self.pending_requests.saturating_sub(1);
                    self.skipped += 1;
                }
                Ok(0)
            }
            Event::Rejected(err) => Err(PipelineError::Rejected(err)),
        }
    }

    /// Oldest delivered frame. Its buffer must be returned with [`Pipeline::ack`].
    pub fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.delivered.pop_front()?;
        self.held += 1;
        Some(frame)
    }

    /// The frame [`Pipeline::next_frame`] would return
    pub fn peek(&self) -> Option<&Frame> {
        self.delivered.front()
    }

    /// Hand a buffer back to the producer
    pub fn ack(&mut self, buffer: FrameBuffer) -> Result<(), PipelineError> {
        if buffer.generation() == self.generation {
            self.held = self.held.saturating_sub(1);
        }
        self.send(Command::Ack(buffer))
    }

    /// Reinitialize particles and buffers. Frames of the old configuration
    /// still on their way are returned and discarded.
    pub fn reconfigure(
        &mut self,
        config: SimulationConfig,
        particles: Option<Vec<Particle>>,
    ) -> Result<(), PipelineError> {
        config.validate()?;
        self.send(Command::Reconfigure {
            config: config.clone(),
            particles,
        })?;
        for frame in std::mem::take(&mut self.delivered) {
            self.send(Command::Ack(frame.buffer))?;
        }
        self.config = config;
        self.generation += 1;
        self.ready = false;
        self.pending_requests = 0;
        self.held = 0;
        Ok(())
    }

    /// Stop the producer and wait for its thread. Undelivered buffers are dropped.
    pub fn dispose(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(Command::Dispose);
        if thread.join().is_err() {
            log::error!("producer thread panicked");
        }
        self.delivered.clear();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(particle_count: usize, buffer_count: usize) -> SimulationConfig {
        SimulationConfig {
            particle_count,
            buffer_count,
            seed: 7,
            ..Default::default()
        }
    }

    fn init(producer: &mut Producer, config: SimulationConfig) -> Event {
        producer
            .handle(Command::Init {
                config,
                particles: None,
            })
            .continue_value()
            .flatten()
            .unwrap()
    }

    fn step(producer: &mut Producer, timestamp: f64) -> Event {
        producer
            .handle(Command::Step { timestamp })
            .continue_value()
            .flatten()
            .unwrap()
    }

    fn frame(event: Event) -> Frame {
        match event {
            Event::Data(frame) => frame,
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn test_init_reports_ready() {
        let mut producer = Producer::new();
        match init(&mut producer, config(50, 2)) {
            Event::Ready {
                generation,
                particle_count,
            } => {
                assert_eq!(generation, 1);
                assert_eq!(particle_count, 50);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(producer.particles().len(), 50);
        assert_eq!(producer.pool_counts().unwrap().available, 2);
    }

    #[test]
    fn test_step_before_init_is_skipped() {
        let mut producer = Producer::new();
        assert!(matches!(step(&mut producer, 1.0), Event::Skipped { generation: 0, .. }));
        assert!(producer
            .handle(Command::Ack(BufferPool::new(1, 1, 0).checkout().unwrap()))
            .continue_value()
            .is_some());
    }

    #[test]
    fn test_underrun_skips_without_breaking_pool() {
        let mut producer = Producer::new();
        init(&mut producer, config(20, 2));

        let a = frame(step(&mut producer, 1.0));
        let b = frame(step(&mut producer, 2.0));
        assert_ne!(a.buffer.id(), b.buffer.id());

        for t in 3..6 {
            assert!(matches!(step(&mut producer, t as f64), Event::Skipped { .. }));
        }
        let counts = producer.pool_counts().unwrap();
        assert_eq!(counts.pending_ack, 2);
        assert_eq!(counts.total(), 2);

        let id = a.buffer.id();
        producer.handle(Command::Ack(a.buffer));
        let c = frame(step(&mut producer, 6.0));
        assert_eq!(c.buffer.id(), id);
        assert_eq!(c.timestamp, 6.0);
    }

    #[test]
    fn test_double_ack_is_not_fatal() {
        let mut producer = Producer::new();
        init(&mut producer, config(5, 1));
        let first = frame(step(&mut producer, 0.0));
        producer.handle(Command::Ack(first.buffer));
        // a second buffer with the same id would overflow the full pool
        let stray = BufferPool::new(1, 5, 1).checkout().unwrap();
        producer.handle(Command::Ack(stray));
        assert_eq!(producer.pool_counts().unwrap().available, 1);
    }

    #[test]
    fn test_steps_are_deterministic() {
        let run = || {
            let mut producer = Producer::new();
            init(&mut producer, config(80, 1));
            let mut last = Vec::new();
            for t in 0..5 {
                let frame = frame(step(&mut producer, t as f64));
                last = frame.buffer.as_slice().to_vec();
                producer.handle(Command::Ack(frame.buffer));
            }
            last
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_reconfigure_from_delivered_frame() {
        let mut producer = Producer::new();
        init(&mut producer, config(30, 2));
        let frame = frame(step(&mut producer, 0.0));
        let particles = frame.buffer.to_particles();
        assert_eq!(particles.as_slice(), producer.particles());

        let event = producer
            .handle(Command::Reconfigure {
                config: config(999, 3),
                particles: Some(particles.clone()),
            })
            .continue_value()
            .flatten()
            .unwrap();
        assert!(matches!(event, Event::Ready { generation: 2, particle_count: 30 }));
        assert_eq!(producer.particles(), particles.as_slice());

        // the old buffer does not enter the new pool
        producer.handle(Command::Ack(frame.buffer));
        let counts = producer.pool_counts().unwrap();
        assert_eq!(counts.available, 3);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut producer = Producer::new();
        init(&mut producer, config(10, 1));
        let event = init(&mut producer, config(0, 1));
        assert!(matches!(event, Event::Rejected(ConfigError::NoParticles)));
        assert_eq!(producer.generation(), 1);
        assert_eq!(producer.particles().len(), 10);
    }

    #[test]
    fn test_debug_payloads() {
        let mut producer = Producer::new();
        init(
            &mut producer,
            SimulationConfig {
                debug_forces: true,
                debug_tree: true,
                ..config(40, 1)
            },
        );
        let frame = frame(step(&mut producer, 0.0));
        let debug = frame.debug.unwrap();
        assert_eq!(debug.forces.unwrap().len(), 40);
        let rects = debug.rects.unwrap();
        assert_eq!(rects.len(), frame.stats.tree.nodes);

        let mut plain = Producer::new();
        init(&mut plain, config(40, 1));
        assert!(self::frame(step(&mut plain, 0.0)).debug.is_none());
    }

    #[test]
    fn test_direct_backend_has_no_tree() {
        let mut producer = Producer::new();
        init(
            &mut producer,
            SimulationConfig {
                backend: BackendKind::Direct,
                debug_tree: true,
                ..config(10, 1)
            },
        );
        let frame = frame(step(&mut producer, 0.0));
        assert_eq!(frame.debug.unwrap().rects, None);
        assert_eq!(frame.stats.tree.nodes, 0);
    }

    #[test]
    fn test_dispose_breaks() {
        let mut producer = Producer::new();
        assert!(producer.handle(Command::Dispose).is_break());
    }
}
