//! Device-facing abstractions consumed by the trigger validation engine.
//!
//! The acquisition front-end, the stimulus generator, and the calibration
//! store are external collaborators. The engine only ever talks to them
//! through the traits in this module so the same scenarios can drive real
//! hardware drivers, the loopback simulator in [`crate::sim`], or scripted
//! test doubles.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use thiserror::Error;

/// Smallest decimation factor accepted by the acquisition registers.
pub const MIN_DECIMATION: u32 = 1;
/// Largest decimation factor accepted by the acquisition registers.
pub const MAX_DECIMATION: u32 = 65_536;

/// Failure reported by a device driver for a single register access.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum DeviceError {
    /// The device refused the write or read with a driver-specific code.
    #[error("{operation} rejected by device (code {code})")]
    Rejected { operation: &'static str, code: i32 },
    /// The operation is not available on this device.
    #[error("{operation} is not supported by this device")]
    Unsupported { operation: &'static str },
    /// Sample retrieval from the device buffer failed.
    #[error("buffer read failed at position {position}")]
    ReadFailed { position: u32 },
}

/// Analog input channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Channel {
    Ch1,
    Ch2,
}

impl Channel {
    /// Every input channel in register order.
    pub const ALL: [Channel; 2] = [Channel::Ch1, Channel::Ch2];

    /// Deterministic index used for per-channel storage.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            Channel::Ch1 => 0,
            Channel::Ch2 => 1,
        }
    }

    /// Attempts to construct a [`Channel`] from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Channel::Ch1),
            1 => Some(Channel::Ch2),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Ch1 => f.write_str("CH1"),
            Channel::Ch2 => f.write_str("CH2"),
        }
    }
}

/// Slope an edge trigger reacts to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Rising,
    Falling,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Rising => f.write_str("rising"),
            Edge::Falling => f.write_str("falling"),
        }
    }
}

/// Condition that moves an armed capture into the triggered state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriggerSource {
    Disabled,
    Now,
    ChARising,
    ChAFalling,
    ChBRising,
    ChBFalling,
}

impl TriggerSource {
    /// Builds the edge trigger for `channel` and `edge`.
    #[must_use]
    pub const fn edge(channel: Channel, edge: Edge) -> Self {
        match (channel, edge) {
            (Channel::Ch1, Edge::Rising) => TriggerSource::ChARising,
            (Channel::Ch1, Edge::Falling) => TriggerSource::ChAFalling,
            (Channel::Ch2, Edge::Rising) => TriggerSource::ChBRising,
            (Channel::Ch2, Edge::Falling) => TriggerSource::ChBFalling,
        }
    }

    /// Channel observed by an edge trigger.
    #[must_use]
    pub const fn channel(self) -> Option<Channel> {
        match self {
            TriggerSource::ChARising | TriggerSource::ChAFalling => Some(Channel::Ch1),
            TriggerSource::ChBRising | TriggerSource::ChBFalling => Some(Channel::Ch2),
            TriggerSource::Disabled | TriggerSource::Now => None,
        }
    }

    /// Slope of an edge trigger.
    #[must_use]
    pub const fn slope(self) -> Option<Edge> {
        match self {
            TriggerSource::ChARising | TriggerSource::ChBRising => Some(Edge::Rising),
            TriggerSource::ChAFalling | TriggerSource::ChBFalling => Some(Edge::Falling),
            TriggerSource::Disabled | TriggerSource::Now => None,
        }
    }

    /// Register-style label used in diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TriggerSource::Disabled => "DISABLED",
            TriggerSource::Now => "NOW",
            TriggerSource::ChARising => "CHA_PE",
            TriggerSource::ChAFalling => "CHA_NE",
            TriggerSource::ChBRising => "CHB_PE",
            TriggerSource::ChBFalling => "CHB_NE",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Trigger status register as seen by the poller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TriggerState {
    Idle,
    Triggered,
}

/// Generator output channel. The bench only ever drives OUT1 and OUT2.
pub type OutputChannel = Channel;

/// Waveforms the stimulus generator can synthesize.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    RampUp,
    RampDown,
    Dc,
    Pwm,
    Arbitrary,
    DcNeg,
    Sweep,
}

impl Waveform {
    /// Human readable label for progress output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Triangle => "triangle",
            Waveform::RampUp => "sawtooth",
            Waveform::RampDown => "reversed sawtooth",
            Waveform::Dc => "dc",
            Waveform::Pwm => "pwm",
            Waveform::Arbitrary => "arbitrary",
            Waveform::DcNeg => "negative dc",
            Waveform::Sweep => "sweep",
        }
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Board family the bench runs against.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DeviceModel {
    /// 14-bit, DC-coupled front-end.
    #[default]
    Standard,
    /// 16-bit front-end whose stimulus path cannot resolve low frequencies.
    LowResolution,
}

impl DeviceModel {
    /// Stimulus frequencies below this floor are skipped, if the model has one.
    #[must_use]
    pub const fn frequency_floor(self) -> Option<u32> {
        match self {
            DeviceModel::Standard => None,
            DeviceModel::LowResolution => Some(100_000),
        }
    }

    /// Parses the command-line tag for a model.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("standard") {
            Some(DeviceModel::Standard)
        } else if tag.eq_ignore_ascii_case("low-res") {
            Some(DeviceModel::LowResolution)
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceModel::Standard => f.write_str("standard"),
            DeviceModel::LowResolution => f.write_str("low-res"),
        }
    }
}

/// Static description of the digitizer and generator under test.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DeviceProfile {
    pub model: DeviceModel,
    /// Raw ADC sample clock in Hz.
    pub sample_rate: u32,
    /// Samples per channel held by the acquisition buffer.
    pub buffer_capacity: u32,
    pub adc_bits: u8,
    pub input_channels: u8,
    pub dac_channels: u8,
    /// Highest frequency the generator output stage can reproduce.
    pub dac_max_frequency: u32,
    /// Full-scale amplitude of generator output 1, in volts.
    pub dac_gain_ch1: f32,
}

impl DeviceProfile {
    /// 125 MS/s, 14-bit, two-channel board.
    pub const STANDARD: DeviceProfile = DeviceProfile {
        model: DeviceModel::Standard,
        sample_rate: 125_000_000,
        buffer_capacity: 16_384,
        adc_bits: 14,
        input_channels: 2,
        dac_channels: 2,
        dac_max_frequency: 17_000_000,
        dac_gain_ch1: 1.0,
    };

    /// 122.88 MS/s, 16-bit, two-channel board.
    pub const LOW_RESOLUTION: DeviceProfile = DeviceProfile {
        model: DeviceModel::LowResolution,
        sample_rate: 122_880_000,
        buffer_capacity: 16_384,
        adc_bits: 16,
        input_channels: 2,
        dac_channels: 2,
        dac_max_frequency: 17_000_000,
        dac_gain_ch1: 1.0,
    };

    /// Returns the preset matching `model`.
    #[must_use]
    pub const fn for_model(model: DeviceModel) -> Self {
        match model {
            DeviceModel::Standard => Self::STANDARD,
            DeviceModel::LowResolution => Self::LOW_RESOLUTION,
        }
    }

    /// Largest representable sample magnitude.
    #[must_use]
    pub const fn full_scale(&self) -> i32 {
        1 << (self.adc_bits - 1)
    }

    /// Returns `true` when the bench can drive both stimulus outputs.
    #[must_use]
    pub const fn has_stimulus_outputs(&self) -> bool {
        self.dac_channels >= 2
    }

    /// Time needed to fill the buffer at the slowest decimation.
    ///
    /// Every wait phase uses this as its timeout regardless of the decimation
    /// actually configured.
    #[must_use]
    pub fn max_capture_timeout(&self) -> Duration {
        let nanos = u128::from(self.buffer_capacity) * u128::from(MAX_DECIMATION) * 1_000_000_000
            / u128::from(self.sample_rate.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Register-level control of the acquisition front-end.
pub trait AcquisitionDevice {
    fn reset(&mut self) -> Result<(), DeviceError>;
    fn set_decimation(&mut self, factor: u32) -> Result<(), DeviceError>;
    fn set_trigger_level(&mut self, channel: Channel, volts: f32) -> Result<(), DeviceError>;
    fn set_trigger_hysteresis(&mut self, volts: f32) -> Result<(), DeviceError>;
    /// Number of samples written after the trigger fires.
    fn set_trigger_delay(&mut self, samples: u32) -> Result<(), DeviceError>;
    /// Enables automatic re-arming after a capture completes.
    fn set_arm_keep_alive(&mut self, enabled: bool) -> Result<(), DeviceError>;
    fn start(&mut self) -> Result<(), DeviceError>;
    fn stop(&mut self) -> Result<(), DeviceError>;
    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DeviceError>;
    /// Pre-trigger samples buffered since the last `start`.
    fn pre_trigger_count(&mut self) -> Result<u32, DeviceError>;
    fn trigger_state(&mut self) -> Result<TriggerState, DeviceError>;
    /// Returns `true` once the post-trigger portion has been written.
    fn fill_state(&mut self) -> Result<bool, DeviceError>;
    fn write_pointer_at_trigger(&mut self) -> Result<u32, DeviceError>;
    fn write_pointer(&mut self) -> Result<u32, DeviceError>;
    /// Copies `buffer.capacity()` samples per channel starting at `position`.
    fn read_data(
        &mut self,
        position: u32,
        buffer: &mut crate::buffer::CaptureBuffer,
    ) -> Result<(), DeviceError>;

    /// Exposes the extended debug register map, when the driver has one.
    fn enable_debug_registers(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Turns off board indicators that couple switching noise into the inputs.
    fn quiet_indicators(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Register-level control of the stimulus generator.
pub trait SignalGenerator {
    fn reset(&mut self) -> Result<(), DeviceError>;
    fn set_offset(&mut self, channel: OutputChannel, volts: f32) -> Result<(), DeviceError>;
    fn set_amplitude(&mut self, channel: OutputChannel, volts: f32) -> Result<(), DeviceError>;
    fn set_waveform(&mut self, channel: OutputChannel, waveform: Waveform)
    -> Result<(), DeviceError>;
    fn set_frequency(&mut self, channel: OutputChannel, hertz: u32) -> Result<(), DeviceError>;
    fn enable_output(&mut self, channel: OutputChannel) -> Result<(), DeviceError>;
    fn trigger_once(&mut self, channel: OutputChannel) -> Result<(), DeviceError>;
}

/// Persistent front-end calibration.
pub trait CalibrationStore {
    type Params: Clone + fmt::Debug;

    fn current(&mut self) -> Result<Self::Params, DeviceError>;
    fn default_params(&mut self) -> Result<Self::Params, DeviceError>;
    fn apply(&mut self, params: &Self::Params) -> Result<(), DeviceError>;
}

/// Monotonic time source used for phase deadlines and settle delays.
pub trait Clock {
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    fn now(&self) -> Self::Instant;

    fn sleep(&mut self, duration: Duration);
}

/// [`Clock`] backed by the host's monotonic clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
