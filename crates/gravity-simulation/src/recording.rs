//! Binary recordings of particle positions
//!
//! Layout, all little-endian:
//!
//! ```text
//! offset 0:  u32 header length in words (6)
//! offset 4:  u32 format version (1)
//! offset 8:  u32 recorded rate (frames per second)
//! offset 12: u32 frame count
//! offset 16: u32 particle count
//! offset 20: u32 component count (2: x, y)
//! offset 24: frame count x particle count x component count f32, row-major
//! ```

use crate::buffer_pool::FrameBuffer;

pub const HEADER_LENGTH: u32 = 6;
pub const FORMAT_VERSION: u32 = 1;
pub const COMPONENT_COUNT: u32 = 2;

const HEADER_BYTES: usize = HEADER_LENGTH as usize * 4;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("recording is {len} bytes, shorter than its header")]
    TooShort { len: usize },
    #[error("header length is {found} words, expected {expected}", expected = HEADER_LENGTH)]
    HeaderLength { found: u32 },
    #[error("unsupported format version {found}, expected {expected}", expected = FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("component count must be at least 1")]
    InvalidComponentCount,
    #[error("declared recording size does not fit in memory")]
    SizeOverflow,
    #[error("recording should be {expected} bytes but is {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("frame has {actual} particles, recording has {expected}")]
    ParticleCount { expected: usize, actual: usize },
    #[error(
        "recording has {found} components per particle, positions need {expected}",
        expected = COMPONENT_COUNT
    )]
    ComponentMismatch { found: u32 },
}

/// An in-memory recorded sequence of position frames
#[derive(Clone, Debug, PartialEq)]
pub struct Recording {
    rate: u32,
    frame_count: u32,
    particle_count: u32,
    component_count: u32,
    data: Vec<f32>,
}

impl Recording {
    /// Empty recording of `particle_count` particles captured at `rate` fps
    pub fn new(rate: u32, particle_count: usize) -> Self {
        Self {
            rate,
            frame_count: 0,
            particle_count: particle_count as u32,
            component_count: COMPONENT_COUNT,
            data: Vec::new(),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count as usize
    }

    pub fn component_count(&self) -> usize {
        self.component_count as usize
    }

    fn frame_len(&self) -> usize {
        self.particle_count() * self.component_count()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count as usize
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        if index >= self.frame_count() {
            return None;
        }
        let len = self.frame_len();
        self.data.get(index * len..(index + 1) * len)
    }

    /// Append the positions of a delivered buffer
    pub fn push_buffer(&mut self, buffer: &FrameBuffer) -> Result<(), FormatError> {
        if self.component_count != COMPONENT_COUNT {
            return Err(FormatError::ComponentMismatch {
                found: self.component_count,
            });
        }
        if buffer.particle_count() != self.particle_count() {
            return Err(FormatError::ParticleCount {
                expected: self.particle_count(),
                actual: buffer.particle_count(),
            });
        }
        for position in buffer.positions() {
            self.data.push(position.x as f32);
            self.data.push(position.y as f32);
        }
        self.frame_count += 1;
        Ok(())
    }

    /// Append one frame of raw scalars, `particle_count x component_count` long
    pub fn push_frame(&mut self, frame: &[f32]) -> Result<(), FormatError> {
        if frame.len() != self.frame_len() {
            return Err(FormatError::ParticleCount {
                expected: self.particle_count(),
                actual: frame.len() / self.component_count(),
            });
        }
        self.data.extend_from_slice(frame);
        self.frame_count += 1;
        Ok(())
    }

    /// Size of the encoded recording in bytes
    pub fn byte_len(&self) -> usize {
        HEADER_BYTES + self.data.len() * 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for word in [
            HEADER_LENGTH,
            FORMAT_VERSION,
            self.rate,
            self.frame_count,
            self.particle_count,
            self.component_count,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        for value in &self.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_BYTES {
            return Err(FormatError::TooShort { len: bytes.len() });
        }
        let word = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_le_bytes(raw)
        };

        let header_length = word(0);
        if header_length != HEADER_LENGTH {
            return Err(FormatError::HeaderLength {
                found: header_length,
            });
        }
        let version = word(1);
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion { found: version });
        }
        let rate = word(2);
        let frame_count = word(3);
        let particle_count = word(4);
        let component_count = word(5);
        if component_count == 0 {
            return Err(FormatError::InvalidComponentCount);
        }

        let scalars = (frame_count as usize)
            .checked_mul(particle_count as usize)
            .and_then(|n| n.checked_mul(component_count as usize))
            .ok_or(FormatError::SizeOverflow)?;
        let expected = scalars
            .checked_mul(4)
            .and_then(|n| n.checked_add(HEADER_BYTES))
            .ok_or(FormatError::SizeOverflow)?;
        if bytes.len() != expected {
            return Err(FormatError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let data = bytes[HEADER_BYTES..]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            rate,
            frame_count,
            particle_count,
            component_count,
            data,
        })
    }
}

/// Captures delivered frames at the recording rate.
///
/// Frames offered faster than the rate are skipped. A recorder that falls
/// behind does not try to catch up.
#[derive(Clone, Debug)]
pub struct Recorder {
    recording: Recording,
    interval_ms: f64,
    next_capture_ms: Option<f64>,
}

impl Recorder {
    pub fn new(rate: u32, particle_count: usize) -> Self {
        let interval_ms = if rate == 0 { 0.0 } else { 1000.0 / rate as f64 };
        Self {
            recording: Recording::new(rate, particle_count),
            interval_ms,
            next_capture_ms: None,
        }
    }

    /// Record `buffer` if a capture is due at `now_ms`. Returns whether it was taken.
    pub fn offer(&mut self, now_ms: f64, buffer: &FrameBuffer) -> Result<bool, FormatError> {
        if self.next_capture_ms.is_some_and(|next| now_ms < next) {
            return Ok(false);
        }
        self.recording.push_buffer(buffer)?;
        let next = self.next_capture_ms.unwrap_or(now_ms) + self.interval_ms;
        self.next_capture_ms = Some(if next < now_ms { now_ms + self.interval_ms } else { next });
        Ok(true)
    }

    pub fn frame_count(&self) -> usize {
        self.recording.frame_count()
    }

    pub fn finish(self) -> Recording {
        self.recording
    }
}

/// Replays a recording against a clock
#[derive(Clone, Debug)]
pub struct Playback {
    recording: Recording,
    looping: bool,
}

impl Playback {
    pub fn new(recording: Recording, looping: bool) -> Self {
        Self { recording, looping }
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    /// Length of one pass through the recording
    pub fn duration_ms(&self) -> f64 {
        if self.recording.rate == 0 {
            return 0.0;
        }
        self.recording.frame_count() as f64 * 1000.0 / self.recording.rate as f64
    }

    /// Frame shown `elapsed_ms` after playback started, `None` once a
    /// non-looping playback has finished
    pub fn frame_index_at(&self, elapsed_ms: f64) -> Option<usize> {
        let count = self.recording.frame_count();
        if count == 0 || self.recording.rate == 0 || elapsed_ms < 0.0 {
            return None;
        }
        let index = (elapsed_ms * self.recording.rate as f64 / 1000.0).floor() as usize;
        if self.looping {
            Some(index % count)
        } else {
            (index < count).then_some(index)
        }
    }

    pub fn frame_at(&self, elapsed_ms: f64) -> Option<&[f32]> {
        self.frame_index_at(elapsed_ms)
            .and_then(|index| self.recording.frame(index))
    }
}
