//! Reusable output buffers and the state machine that circulates them
//!
//! Every buffer is in exactly one state:
//!
//! ```text
//! Available --checkout--> InFlight --mark_delivered--> PendingAck --acknowledge--> Available
//! ```
//!
//! A buffer has one owner at a time and is moved, never shared, so the pool
//! only tracks states by id. `available + in_flight + pending_ack` always
//! equals the capacity.

use glam::DVec2;
use gravity_physics::{center_of_mass, Particle, RECORD_WIDTH};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Available,
    InFlight,
    PendingAck,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no buffer available")]
    Underrun,
    #[error("acknowledged buffer {id} but all {capacity} buffers are already available")]
    Overflow { id: BufferId, capacity: usize },
    #[error("buffer {id} does not belong to this pool")]
    UnknownBuffer { id: BufferId },
    #[error("buffer {id} cannot leave state {state:?} this way")]
    IllegalTransition { id: BufferId, state: BufferState },
    #[error("buffer {id} is from generation {generation}, pool is at {current}")]
    StaleGeneration {
        id: BufferId,
        generation: u64,
        current: u64,
    },
}

/// Flat particle records, [`RECORD_WIDTH`] scalars per particle:
/// `x, y, vel_x, vel_y, mass`.
#[derive(Debug, PartialEq)]
pub struct FrameBuffer {
    id: BufferId,
    generation: u64,
    data: Vec<f64>,
}

impl FrameBuffer {
    fn new(id: BufferId, generation: u64, particle_count: usize) -> Self {
        Self {
            id,
            generation,
            data: vec![0.0; particle_count * RECORD_WIDTH],
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn particle_count(&self) -> usize {
        self.data.len() / RECORD_WIDTH
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn position(&self, index: usize) -> DVec2 {
        let base = index * RECORD_WIDTH;
        DVec2::new(self.data[base], self.data[base + 1])
    }

    pub fn velocity(&self, index: usize) -> DVec2 {
        let base = index * RECORD_WIDTH;
        DVec2::new(self.data[base + 2], self.data[base + 3])
    }

    pub fn positions(&self) -> impl ExactSizeIterator<Item = DVec2> + '_ {
        self.data
            .chunks_exact(RECORD_WIDTH)
            .map(|r| DVec2::new(r[0], r[1]))
    }

    /// Copy particle state into the buffer, resizing it if the population changed
    pub fn fill_from(&mut self, particles: &[Particle]) {
        self.data.clear();
        self.data.extend_from_slice(bytemuck::cast_slice(particles));
    }

    /// View the records as particles
    pub fn particles(&self) -> &[Particle] {
        bytemuck::cast_slice(&self.data)
    }

    /// Decode the records back into owned particles
    pub fn to_particles(&self) -> Vec<Particle> {
        self.particles().to_vec()
    }

    /// Mass-weighted mean position, `None` for an empty or massless buffer
    pub fn center_of_mass(&self) -> Option<DVec2> {
        center_of_mass(self.particles())
    }
}

/// Occupancy of a pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub available: usize,
    pub in_flight: usize,
    pub pending_ack: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.available + self.in_flight + self.pending_ack
    }
}

/// Fixed set of output buffers for one generation of the pipeline.
#[derive(Debug)]
pub struct BufferPool {
    generation: u64,
    available: Vec<FrameBuffer>,
    states: Vec<BufferState>,
}

impl BufferPool {
    pub fn new(capacity: usize, particle_count: usize, generation: u64) -> Self {
        let available = (0..capacity as u32)
            .rev()
            .map(|id| FrameBuffer::new(BufferId(id), generation, particle_count))
            .collect();
        Self {
            generation,
            available,
            states: vec![BufferState::Available; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.states.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.states.get(id.0 as usize).copied()
    }

    /// Take an available buffer to fill. `Underrun` leaves the pool untouched.
    pub fn checkout(&mut self) -> Result<FrameBuffer, PoolError> {
        let buffer = self.available.pop().ok_or(PoolError::Underrun)?;
        self.states[buffer.id.0 as usize] = BufferState::InFlight;
        Ok(buffer)
    }

    /// Record that a checked out buffer reached the consumer
    pub fn mark_delivered(&mut self, id: BufferId) -> Result<(), PoolError> {
        self.transition(id, BufferState::InFlight, BufferState::PendingAck)
    }

    /// Return a buffer the consumer is done with.
    ///
    /// On error the buffer is dropped and the pool is left as it was.
    pub fn acknowledge(&mut self, buffer: FrameBuffer) -> Result<(), PoolError> {
        let id = buffer.id;
        if buffer.generation != self.generation {
            return Err(PoolError::StaleGeneration {
                id,
                generation: buffer.generation,
                current: self.generation,
            });
        }
        if self.available.len() >= self.capacity() {
            return Err(PoolError::Overflow {
                id,
                capacity: self.capacity(),
            });
        }
        self.transition(id, BufferState::PendingAck, BufferState::Available)?;
        self.available.push(buffer);
        Ok(())
    }

    fn transition(
        &mut self,
        id: BufferId,
        from: BufferState,
        to: BufferState,
    ) -> Result<(), PoolError> {
        let state = self
            .states
            .get_mut(id.0 as usize)
            .ok_or(PoolError::UnknownBuffer { id })?;
        if *state != from {
            return Err(PoolError::IllegalTransition { id, state: *state });
        }
        *state = to;
        Ok(())
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for state in &self.states {
            match state {
                BufferState::Available => counts.available += 1,
                BufferState::InFlight => counts.in_flight += 1,
                BufferState::PendingAck => counts.pending_ack += 1,
            }
        }
        counts
    }

    /// The conservation invariant, including agreement between the state
    /// table and the buffers actually held
    pub fn is_consistent(&self) -> bool {
        let counts = self.counts();
        counts.total() == self.capacity() && counts.available == self.available.len()
    }
}
