//! Geometry checks applied to a fetched capture.
//!
//! Validators are pure: they read one channel of a [`CaptureBuffer`] whose
//! first sample is the trigger sample and either accept it or describe the
//! first offending sample together with the window worth dumping.

use core::fmt;

use thiserror::Error;

use crate::buffer::{BufferWindow, CaptureBuffer};
use crate::device::{Channel, Edge};

/// Fraction of full scale a sample must reach to count as post-step data.
///
/// Kept below full scale so the step's rise time and ringing still count.
pub const DELAY_THRESHOLD_FRACTION: f32 = 0.7;

/// Which check rejected the buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Position(Edge),
    DelayCount,
    NoiseGlitch,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Position(edge) => write!(f, "{edge} edge position"),
            FailureKind::DelayCount => f.write_str("delay count"),
            FailureKind::NoiseGlitch => f.write_str("noise immunity"),
        }
    }
}

/// What the offending sample should have looked like.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Expectation {
    NonNegative,
    Negative,
    NonPositive,
    Positive,
    Count(usize),
    /// Same sign as both neighbours, which were positive when `true`.
    SignOfNeighbours(bool),
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::NonNegative => f.write_str(">= 0"),
            Expectation::Negative => f.write_str("< 0"),
            Expectation::NonPositive => f.write_str("<= 0"),
            Expectation::Positive => f.write_str("> 0"),
            Expectation::Count(count) => write!(f, "{count} samples"),
            Expectation::SignOfNeighbours(true) => f.write_str("> 0 like its neighbours"),
            Expectation::SignOfNeighbours(false) => f.write_str("< 0 like its neighbours"),
        }
    }
}

/// Circular window to dump when a check fails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiagnosticWindow {
    pub offset: isize,
    pub len: usize,
}

impl DiagnosticWindow {
    #[must_use]
    pub const fn new(offset: isize, len: usize) -> Self {
        Self { offset, len }
    }
}

/// A buffer that does not look like a correct capture.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind} check failed on {channel} at sample {index}: observed {observed}, expected {expected}")]
pub struct ValidationFailure {
    pub kind: FailureKind,
    pub channel: Channel,
    pub index: usize,
    pub observed: i64,
    pub expected: Expectation,
    pub window: DiagnosticWindow,
}

impl ValidationFailure {
    /// Copies the diagnostic window out of `buffer`.
    pub fn excerpt(&self, buffer: &CaptureBuffer) -> BufferWindow {
        buffer.window(self.channel, self.window.offset, self.window.len)
    }
}

/// Checks the sign geometry around a trigger at the buffer midpoint.
///
/// For a rising edge the trigger sample must be non-negative and the sample
/// preceding it (the last one, after wrap) negative. Falling mirrors this.
///
/// # Errors
///
/// Returns the first sample whose sign is wrong.
pub fn validate_position(
    buffer: &CaptureBuffer,
    channel: Channel,
    edge: Edge,
) -> Result<(), ValidationFailure> {
    let samples = buffer.channel(channel);
    let window = DiagnosticWindow::new(-5, 10);
    let failure = |index: usize, observed: i16, expected| ValidationFailure {
        kind: FailureKind::Position(edge),
        channel,
        index,
        observed: i64::from(observed),
        expected,
        window,
    };

    let (Some(&first), Some(&last)) = (samples.first(), samples.last()) else {
        return Err(failure(0, 0, Expectation::Count(1)));
    };
    let last_index = samples.len() - 1;

    match edge {
        Edge::Rising => {
            if first < 0 {
                return Err(failure(0, first, Expectation::NonNegative));
            }
            if last >= 0 {
                return Err(failure(last_index, last, Expectation::Negative));
            }
        }
        Edge::Falling => {
            if first > 0 {
                return Err(failure(0, first, Expectation::NonPositive));
            }
            if last <= 0 {
                return Err(failure(last_index, last, Expectation::Positive));
            }
        }
    }
    Ok(())
}

/// Counts the contiguous samples from index 0 whose magnitude reaches
/// `fraction` of full scale.
pub fn count_leading_at_or_above(buffer: &CaptureBuffer, channel: Channel, fraction: f32) -> usize {
    let threshold = f64::from(fraction) * f64::from(buffer.full_scale());
    buffer
        .channel(channel)
        .iter()
        .take_while(|sample| f64::from(sample.unsigned_abs()) >= threshold)
        .count()
}

/// Checks that exactly `expected` post-trigger samples carry the step.
///
/// Returns the measured count.
///
/// # Errors
///
/// Returns a failure pointing at the first sample past the measured run.
pub fn validate_delay_count(
    buffer: &CaptureBuffer,
    channel: Channel,
    expected: usize,
    fraction: f32,
) -> Result<usize, ValidationFailure> {
    let count = count_leading_at_or_above(buffer, channel, fraction);
    if count == expected {
        return Ok(count);
    }
    Err(ValidationFailure {
        kind: FailureKind::DelayCount,
        channel,
        index: count,
        observed: i64::try_from(count).unwrap_or(i64::MAX),
        expected: Expectation::Count(expected),
        window: DiagnosticWindow::new(-2, count + 3),
    })
}

/// Rejects isolated sign flips between two same-signed neighbours.
///
/// # Errors
///
/// Returns the start index of the first offending 3-sample window.
pub fn validate_noise_immunity(buffer: &CaptureBuffer, channel: Channel) -> Result<(), ValidationFailure> {
    let samples = buffer.channel(channel);
    for (index, window) in samples.windows(3).enumerate() {
        let [before, middle, after] = [window[0], window[1], window[2]];
        let expected = if before > 0 && after > 0 && middle <= 0 {
            Some(Expectation::SignOfNeighbours(true))
        } else if before < 0 && after < 0 && middle >= 0 {
            Some(Expectation::SignOfNeighbours(false))
        } else {
            None
        };

        if let Some(expected) = expected {
            return Err(ValidationFailure {
                kind: FailureKind::NoiseGlitch,
                channel,
                index,
                observed: i64::from(middle),
                expected,
                window: DiagnosticWindow::new(isize::try_from(index).unwrap_or(0), 3),
            });
        }
    }
    Ok(())
}
