//! Caller-owned sample storage filled by [`crate::acquisition`].

use core::fmt;

use heapless::Vec as HeaplessVec;
use thiserror::Error;

use crate::device::{Channel, DeviceProfile};

/// Largest number of samples rendered in a single diagnostic window.
pub const MAX_WINDOW_SAMPLES: usize = 32;

/// Whether samples were captured with the calibrated or raw front-end path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationMode {
    Raw,
    Calibrated,
}

/// Reasons a capture buffer could not be set up.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BufferError {
    #[error("capture buffer needs at least one channel")]
    NoChannels,
    #[error("capture buffer needs a non-zero capacity")]
    ZeroCapacity,
    #[error("unsupported sample width of {bits} bits")]
    SampleWidth { bits: u8 },
    #[error("could not allocate {samples} samples for the capture buffer")]
    Allocation { samples: usize },
}

/// Fixed-capacity, channel-major sample buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureBuffer {
    channels: usize,
    capacity: usize,
    sample_bits: u8,
    mode: CalibrationMode,
    samples: Vec<i16>,
}

impl CaptureBuffer {
    /// Allocates a zeroed buffer holding `capacity` samples per channel.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError`] when the geometry is empty, the sample width
    /// does not fit in 16 bits, or the allocation fails.
    pub fn new(
        channels: usize,
        capacity: usize,
        sample_bits: u8,
        mode: CalibrationMode,
    ) -> Result<Self, BufferError> {
        if channels == 0 {
            return Err(BufferError::NoChannels);
        }
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        if !(2..=16).contains(&sample_bits) {
            return Err(BufferError::SampleWidth { bits: sample_bits });
        }

        let total = channels
            .checked_mul(capacity)
            .ok_or(BufferError::Allocation { samples: usize::MAX })?;
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(total)
            .map_err(|_| BufferError::Allocation { samples: total })?;
        samples.resize(total, 0);

        Ok(Self {
            channels,
            capacity,
            sample_bits,
            mode,
            samples,
        })
    }

    /// Allocates a buffer matching the acquisition geometry of `profile`.
    ///
    /// # Errors
    ///
    /// See [`CaptureBuffer::new`].
    pub fn for_profile(profile: &DeviceProfile, mode: CalibrationMode) -> Result<Self, BufferError> {
        Self::new(
            usize::from(profile.input_channels),
            profile.buffer_capacity as usize,
            profile.adc_bits,
            mode,
        )
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Samples held per channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_bits(&self) -> u8 {
        self.sample_bits
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Largest representable sample magnitude.
    pub fn full_scale(&self) -> i32 {
        1 << (self.sample_bits - 1)
    }

    /// Samples for `channel`, or an empty slice when the buffer lacks it.
    pub fn channel(&self, channel: Channel) -> &[i16] {
        let index = channel.as_index();
        if index >= self.channels {
            return &[];
        }
        let start = index * self.capacity;
        &self.samples[start..start + self.capacity]
    }

    /// Mutable samples for `channel`, or an empty slice when the buffer lacks it.
    pub fn channel_mut(&mut self, channel: Channel) -> &mut [i16] {
        let index = channel.as_index();
        if index >= self.channels {
            return &mut [];
        }
        let start = index * self.capacity;
        &mut self.samples[start..start + self.capacity]
    }

    /// Overwrites every sample on every channel.
    pub fn fill(&mut self, value: i16) {
        self.samples.fill(value);
    }

    /// Copies a circular window of `len` samples starting at `offset`.
    ///
    /// Negative offsets count back from the end of the buffer, so
    /// `window(ch, -5, 10)` straddles the wrap point.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn window(&self, channel: Channel, offset: isize, len: usize) -> BufferWindow {
        let data = self.channel(channel);
        let mut samples = HeaplessVec::new();
        if !data.is_empty() {
            let capacity = data.len() as isize;
            for step in 0..len.min(MAX_WINDOW_SAMPLES) {
                let index = (offset + step as isize).rem_euclid(capacity) as usize;
                // Capacity is bounded by MAX_WINDOW_SAMPLES above.
                let _ = samples.push((index, data[index]));
            }
        }
        BufferWindow { channel, samples }
    }
}

/// Excerpt of one channel rendered in failure diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferWindow {
    pub channel: Channel,
    pub samples: HeaplessVec<(usize, i16), MAX_WINDOW_SAMPLES>,
}

impl fmt::Display for BufferWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.channel)?;
        for (index, value) in &self.samples {
            write!(f, " [{index}]={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_geometry() {
        assert_eq!(
            CaptureBuffer::new(0, 16, 14, CalibrationMode::Raw),
            Err(BufferError::NoChannels)
        );
        assert_eq!(
            CaptureBuffer::new(2, 0, 14, CalibrationMode::Raw),
            Err(BufferError::ZeroCapacity)
        );
        assert_eq!(
            CaptureBuffer::new(2, 16, 24, CalibrationMode::Raw),
            Err(BufferError::SampleWidth { bits: 24 })
        );
    }

    #[test]
    fn channels_are_independent_slices() {
        let mut buffer = CaptureBuffer::new(2, 4, 14, CalibrationMode::Calibrated).unwrap();
        buffer.channel_mut(Channel::Ch2).copy_from_slice(&[1, 2, 3, 4]);

        assert_eq!(buffer.channel(Channel::Ch1), &[0, 0, 0, 0]);
        assert_eq!(buffer.channel(Channel::Ch2), &[1, 2, 3, 4]);
        assert_eq!(buffer.full_scale(), 8_192);
    }

    #[test]
    fn missing_channel_reads_empty() {
        let buffer = CaptureBuffer::new(1, 4, 14, CalibrationMode::Raw).unwrap();
        assert!(buffer.channel(Channel::Ch2).is_empty());
    }

    #[test]
    fn window_wraps_around_the_buffer_start() {
        let mut buffer = CaptureBuffer::new(1, 8, 14, CalibrationMode::Raw).unwrap();
        buffer
            .channel_mut(Channel::Ch1)
            .copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);

        let window = buffer.window(Channel::Ch1, -2, 4);
        let indices: Vec<usize> = window.samples.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, vec![6, 7, 0, 1]);
        assert_eq!(window.to_string(), "CH1: [6]=6 [7]=7 [0]=0 [1]=1");
    }

    #[test]
    fn window_is_bounded() {
        let buffer = CaptureBuffer::new(1, 128, 14, CalibrationMode::Raw).unwrap();
        assert_eq!(buffer.window(Channel::Ch1, 0, 100).samples.len(), MAX_WINDOW_SAMPLES);
    }
}
