//! Loopback model of the bench wiring: generator OUT1 feeds IN1 and IN2.
//!
//! The model has no notion of wall time. Acquisition progresses only when the
//! controller observes it: every status or pointer read generates
//! [`CHUNK_SAMPLES`] decimated samples, which keeps polling loops bounded and
//! runs deterministic. [`VirtualClock`] pairs with it so phase deadlines
//! still elapse.

use core::cell::{Cell, RefCell};
use core::f64::consts::TAU;
use core::ops::Add;
use core::time::Duration;
use std::rc::Rc;

use tracing::debug;

use crate::buffer::CaptureBuffer;
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, DeviceError, DeviceProfile, Edge,
    OutputChannel, SignalGenerator, TriggerSource, TriggerState, Waveform,
};

/// Decimated samples generated per observed register read.
pub const CHUNK_SAMPLES: u32 = 256;
/// Virtual time consumed by each [`VirtualClock::now`] call.
pub const DEFAULT_TICK: Duration = Duration::from_micros(100);

/// Per-input front-end correction applied to simulated samples.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationParams {
    pub gain: [f32; 2],
    pub offset: [i16; 2],
}

impl CalibrationParams {
    pub const DEFAULT: CalibrationParams = CalibrationParams {
        gain: [1.0, 1.0],
        offset: [0, 0],
    };

    /// Slightly off-nominal values the simulated board boots with.
    pub const FACTORY: CalibrationParams = CalibrationParams {
        gain: [0.98, 1.01],
        offset: [2, -3],
    };
}

/// Misbehaviour injected into the simulated board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimFault {
    /// No trigger source ever fires.
    NeverTrigger,
    /// The pre-trigger counter stops advancing.
    FrozenPretrigger,
    /// The named operation is rejected with a driver error.
    Reject(&'static str),
    /// Writes of the `NOW` trigger source are accepted but dropped.
    IgnoreNow,
    /// The keep-alive bit is ignored, so writing stops once the buffer fills.
    IgnoreKeepArm,
    /// The trigger pointer latches on the first trigger after reset and
    /// never updates again.
    StaleTriggerPointer,
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Output {
    waveform: Waveform,
    frequency: u32,
    amplitude: f32,
    offset: f32,
    enabled: bool,
    origin: u64,
}

impl Output {
    const IDLE: Output = Output {
        waveform: Waveform::Sine,
        frequency: 1_000,
        amplitude: 1.0,
        offset: 0.0,
        enabled: false,
        origin: 0,
    };

    #[allow(clippy::cast_precision_loss)]
    fn volts(&self, tick: u64, sample_rate: u32) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let seconds = tick.saturating_sub(self.origin) as f64 / f64::from(sample_rate.max(1));
        let phase = (seconds * f64::from(self.frequency)).fract();
        let amplitude = f64::from(self.amplitude);
        let shape = match self.waveform {
            Waveform::Sine => (TAU * phase).sin(),
            Waveform::Square | Waveform::Pwm => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::RampUp => 2.0 * phase - 1.0,
            Waveform::RampDown => 1.0 - 2.0 * phase,
            Waveform::Dc => 1.0,
            Waveform::DcNeg => -1.0,
            Waveform::Arbitrary | Waveform::Sweep => 0.0,
        };
        amplitude * shape + f64::from(self.offset)
    }
}

/// Shared register file and sample memory of the simulated board.
#[derive(Debug)]
pub struct SimState {
    profile: DeviceProfile,
    decimation: u32,
    levels: [f32; 2],
    hysteresis: f32,
    delay: u32,
    keep_armed: bool,
    source: TriggerSource,
    running: bool,
    writing: bool,
    triggered: bool,
    filled: bool,
    pretrigger: u32,
    post_written: u32,
    write_pointer: u32,
    trigger_pointer: u32,
    trigger_latched: bool,
    rising_ready: [bool; 2],
    falling_ready: [bool; 2],
    memory: Vec<i16>,
    tick: u64,
    outputs: [Output; 2],
    calibration: CalibrationParams,
    debug_registers: bool,
    indicators_on: bool,
    fault: Option<SimFault>,
}

impl SimState {
    fn new(profile: DeviceProfile) -> Self {
        let capacity = profile.buffer_capacity.max(1) as usize;
        Self {
            profile,
            decimation: 1,
            levels: [0.0; 2],
            hysteresis: 0.0,
            delay: 0,
            keep_armed: false,
            source: TriggerSource::Disabled,
            running: false,
            writing: false,
            triggered: false,
            filled: false,
            pretrigger: 0,
            post_written: 0,
            write_pointer: 0,
            trigger_pointer: 0,
            trigger_latched: false,
            rising_ready: [false; 2],
            falling_ready: [false; 2],
            memory: vec![0; capacity * usize::from(profile.input_channels)],
            tick: 0,
            outputs: [Output::IDLE; 2],
            calibration: CalibrationParams::FACTORY,
            debug_registers: false,
            indicators_on: true,
            fault: None,
        }
    }

    fn capacity(&self) -> u32 {
        self.profile.buffer_capacity.max(1)
    }

    fn inputs(&self) -> usize {
        usize::from(self.profile.input_channels).min(2)
    }

    fn check(&self, operation: &'static str) -> Result<(), DeviceError> {
        match self.fault {
            Some(SimFault::Reject(rejected)) if rejected == operation => {
                Err(DeviceError::Rejected { operation, code: -1 })
            }
            _ => Ok(()),
        }
    }

    fn reset_acquisition(&mut self) {
        self.decimation = 1;
        self.levels = [0.0; 2];
        self.hysteresis = 0.0;
        self.delay = 0;
        self.keep_armed = false;
        self.source = TriggerSource::Disabled;
        self.running = false;
        self.writing = false;
        self.triggered = false;
        self.filled = false;
        self.pretrigger = 0;
        self.post_written = 0;
        self.write_pointer = 0;
        self.trigger_pointer = 0;
        self.trigger_latched = false;
        self.rising_ready = [false; 2];
        self.falling_ready = [false; 2];
    }

    fn full_scale(&self) -> f64 {
        f64::from(self.profile.full_scale())
    }

    // Clamped to the i16 range before the cast.
    #[allow(clippy::cast_possible_truncation)]
    fn code(&self, input: usize, volts: f64) -> i16 {
        let gain = self.calibration.gain.get(input).copied().unwrap_or(1.0);
        let offset = self.calibration.offset.get(input).copied().unwrap_or(0);
        let raw = (volts * f64::from(gain) * self.full_scale()).floor() + f64::from(offset);
        raw.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }

    #[allow(clippy::cast_possible_truncation)]
    fn level_code(&self, input: usize) -> i32 {
        let level = self.levels.get(input).copied().unwrap_or(0.0);
        (f64::from(level) * self.full_scale()).floor() as i32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn hysteresis_code(&self) -> i32 {
        (f64::from(self.hysteresis) * self.full_scale()) as i32
    }

    fn fires(&self, codes: &[i16; 2]) -> bool {
        if self.fault == Some(SimFault::NeverTrigger) {
            return false;
        }
        match self.source {
            TriggerSource::Disabled => false,
            TriggerSource::Now => true,
            edge => {
                let (Some(channel), Some(slope)) = (edge.channel(), edge.slope()) else {
                    return false;
                };
                let input = channel.as_index();
                if input >= self.inputs() {
                    return false;
                }
                let code = i32::from(codes[input]);
                let level = self.level_code(input);
                match slope {
                    Edge::Rising => self.rising_ready[input] && code >= level,
                    Edge::Falling => self.falling_ready[input] && code <= level,
                }
            }
        }
    }

    fn track_edges(&mut self, codes: &[i16; 2]) {
        let hysteresis = self.hysteresis_code();
        for input in 0..self.inputs() {
            let code = i32::from(codes[input]);
            let level = self.level_code(input);
            if code < level - hysteresis {
                self.rising_ready[input] = true;
            } else if code >= level {
                self.rising_ready[input] = false;
            }
            if code > level + hysteresis {
                self.falling_ready[input] = true;
            } else if code <= level {
                self.falling_ready[input] = false;
            }
        }
    }

    /// Generates up to `samples` decimated samples.
    fn advance(&mut self, samples: u32) {
        if !self.running {
            return;
        }
        let capacity = self.capacity();
        for _ in 0..samples {
            if !self.writing && self.source != TriggerSource::Now {
                break;
            }
            self.tick = self.tick.wrapping_add(u64::from(self.decimation));

            // Both inputs see OUT1.
            let volts = self.outputs[0].volts(self.tick, self.profile.sample_rate);
            let mut codes = [0_i16; 2];
            for (input, code) in codes.iter_mut().enumerate().take(self.inputs()) {
                *code = self.code(input, volts);
                self.memory[input * capacity as usize + self.write_pointer as usize] = *code;
            }
            let index = self.write_pointer;
            self.write_pointer = (self.write_pointer + 1) % capacity;
            if self.fault != Some(SimFault::FrozenPretrigger) {
                self.pretrigger = self.pretrigger.wrapping_add(1);
            }

            if self.fires(&codes) {
                self.triggered = true;
                self.filled = false;
                if !(self.trigger_latched && self.fault == Some(SimFault::StaleTriggerPointer)) {
                    self.trigger_pointer = index;
                }
                self.trigger_latched = true;
                self.post_written = 0;
                self.source = TriggerSource::Disabled;
                self.writing = true;
            }
            self.track_edges(&codes);

            if self.triggered && !self.filled {
                self.post_written += 1;
                if self.post_written >= self.delay {
                    self.filled = true;
                    if !self.keep_armed || self.fault == Some(SimFault::IgnoreKeepArm) {
                        self.writing = false;
                    }
                }
            }
        }
    }

    fn observe(&mut self) {
        self.advance(CHUNK_SAMPLES);
    }

    pub fn write_pointer(&self) -> u32 {
        self.write_pointer
    }

    pub fn trigger_pointer(&self) -> u32 {
        self.trigger_pointer
    }

    pub fn indicators_on(&self) -> bool {
        self.indicators_on
    }

    pub fn debug_registers(&self) -> bool {
        self.debug_registers
    }

    pub fn calibration(&self) -> CalibrationParams {
        self.calibration
    }

    pub fn trigger_level(&self, channel: Channel) -> f32 {
        self.levels[channel.as_index()]
    }

    pub fn trigger_source(&self) -> TriggerSource {
        self.source
    }
}

type Shared = Rc<RefCell<SimState>>;

/// Acquisition side of the simulated board.
#[derive(Clone, Debug)]
pub struct SimAcquisition {
    state: Shared,
}

/// Generator side of the simulated board.
#[derive(Clone, Debug)]
pub struct SimGenerator {
    state: Shared,
}

/// Calibration store of the simulated board.
#[derive(Clone, Debug)]
pub struct SimCalibration {
    state: Shared,
}

/// Read-only view and fault injection for tests and the bench binary.
#[derive(Clone, Debug)]
pub struct SimProbe {
    state: Shared,
}

impl SimProbe {
    pub fn set_fault(&self, fault: Option<SimFault>) {
        self.state.borrow_mut().fault = fault;
    }

    /// Runs `f` against the current board state.
    pub fn inspect<R>(&self, f: impl FnOnce(&SimState) -> R) -> R {
        f(&self.state.borrow())
    }
}

/// One simulated board, split into the handles the engine consumes.
#[derive(Debug)]
pub struct SimulatedBench {
    pub acquisition: SimAcquisition,
    pub generator: SimGenerator,
    pub calibration: SimCalibration,
    pub probe: SimProbe,
}

impl SimulatedBench {
    #[must_use]
    pub fn new(profile: DeviceProfile) -> Self {
        debug!(
            "sim: {} board, {} Hz, {} samples, {} bits",
            profile.model, profile.sample_rate, profile.buffer_capacity, profile.adc_bits
        );
        let state = Rc::new(RefCell::new(SimState::new(profile)));
        Self {
            acquisition: SimAcquisition {
                state: Rc::clone(&state),
            },
            generator: SimGenerator {
                state: Rc::clone(&state),
            },
            calibration: SimCalibration {
                state: Rc::clone(&state),
            },
            probe: SimProbe { state },
        }
    }
}

impl AcquisitionDevice for SimAcquisition {
    fn reset(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("reset")?;
        state.reset_acquisition();
        Ok(())
    }

    fn set_decimation(&mut self, factor: u32) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("set_decimation")?;
        if factor == 0 || factor > crate::device::MAX_DECIMATION {
            return Err(DeviceError::Rejected {
                operation: "set_decimation",
                code: 2,
            });
        }
        state.decimation = factor;
        Ok(())
    }

    fn set_trigger_level(&mut self, channel: Channel, volts: f32) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("set_trigger_level")?;
        state.levels[channel.as_index()] = volts;
        Ok(())
    }

    fn set_trigger_hysteresis(&mut self, volts: f32) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("set_trigger_hysteresis")?;
        state.hysteresis = volts.abs();
        Ok(())
    }

    fn set_trigger_delay(&mut self, samples: u32) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("set_trigger_delay")?;
        state.delay = samples;
        Ok(())
    }

    fn set_arm_keep_alive(&mut self, enabled: bool) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("set_arm_keep_alive")?;
        state.keep_armed = enabled;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("start")?;
        state.running = true;
        state.writing = true;
        state.triggered = false;
        state.filled = false;
        state.pretrigger = 0;
        state.post_written = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("stop")?;
        state.running = false;
        state.writing = false;
        Ok(())
    }

    fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("set_trigger_source")?;
        if source == TriggerSource::Now && state.fault == Some(SimFault::IgnoreNow) {
            return Ok(());
        }
        state.source = source;
        Ok(())
    }

    fn pre_trigger_count(&mut self) -> Result<u32, DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("pre_trigger_count")?;
        state.observe();
        Ok(state.pretrigger)
    }

    fn trigger_state(&mut self) -> Result<TriggerState, DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("trigger_state")?;
        state.observe();
        Ok(if state.triggered {
            TriggerState::Triggered
        } else {
            TriggerState::Idle
        })
    }

    fn fill_state(&mut self) -> Result<bool, DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("fill_state")?;
        state.observe();
        Ok(state.filled)
    }

    fn write_pointer_at_trigger(&mut self) -> Result<u32, DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("write_pointer_at_trigger")?;
        state.observe();
        Ok(state.trigger_pointer)
    }

    fn write_pointer(&mut self) -> Result<u32, DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("write_pointer")?;
        state.observe();
        Ok(state.write_pointer)
    }

    fn read_data(&mut self, position: u32, buffer: &mut CaptureBuffer) -> Result<(), DeviceError> {
        let state = self.state.borrow();
        state.check("read_data")?;
        let capacity = state.capacity() as usize;
        if position as usize >= capacity {
            return Err(DeviceError::ReadFailed { position });
        }
        for input in 0..state.inputs().min(buffer.channel_count()) {
            let Some(channel) = Channel::from_index(input) else {
                continue;
            };
            let memory = &state.memory[input * capacity..(input + 1) * capacity];
            for (offset, sample) in buffer.channel_mut(channel).iter_mut().enumerate() {
                *sample = memory[(position as usize + offset) % capacity];
            }
        }
        Ok(())
    }

    fn enable_debug_registers(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("enable_debug_registers")?;
        state.debug_registers = true;
        Ok(())
    }

    fn quiet_indicators(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("quiet_indicators")?;
        state.indicators_on = false;
        Ok(())
    }
}

impl SimGenerator {
    fn with_output(
        &mut self,
        operation: &'static str,
        channel: OutputChannel,
        update: impl FnOnce(&mut Output),
    ) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check(operation)?;
        update(&mut state.outputs[channel.as_index()]);
        Ok(())
    }
}

impl SignalGenerator for SimGenerator {
    fn reset(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("generator_reset")?;
        state.outputs = [Output::IDLE; 2];
        Ok(())
    }

    fn set_offset(&mut self, channel: OutputChannel, volts: f32) -> Result<(), DeviceError> {
        self.with_output("set_offset", channel, |output| output.offset = volts)
    }

    fn set_amplitude(&mut self, channel: OutputChannel, volts: f32) -> Result<(), DeviceError> {
        if volts.abs() > 1.0 {
            return Err(DeviceError::Rejected {
                operation: "set_amplitude",
                code: 2,
            });
        }
        self.with_output("set_amplitude", channel, |output| output.amplitude = volts)
    }

    fn set_waveform(
        &mut self,
        channel: OutputChannel,
        waveform: Waveform,
    ) -> Result<(), DeviceError> {
        if matches!(waveform, Waveform::Arbitrary | Waveform::Sweep) {
            return Err(DeviceError::Unsupported {
                operation: "set_waveform",
            });
        }
        self.with_output("set_waveform", channel, |output| output.waveform = waveform)
    }

    fn set_frequency(&mut self, channel: OutputChannel, hertz: u32) -> Result<(), DeviceError> {
        let limit = self.state.borrow().profile.dac_max_frequency;
        if hertz == 0 || hertz > limit {
            return Err(DeviceError::Rejected {
                operation: "set_frequency",
                code: 2,
            });
        }
        self.with_output("set_frequency", channel, |output| output.frequency = hertz)
    }

    fn enable_output(&mut self, channel: OutputChannel) -> Result<(), DeviceError> {
        self.with_output("enable_output", channel, |output| output.enabled = true)
    }

    fn trigger_once(&mut self, channel: OutputChannel) -> Result<(), DeviceError> {
        let tick = self.state.borrow().tick;
        self.with_output("trigger_once", channel, |output| output.origin = tick)
    }
}

impl CalibrationStore for SimCalibration {
    type Params = CalibrationParams;

    fn current(&mut self) -> Result<Self::Params, DeviceError> {
        let state = self.state.borrow();
        state.check("calibration_current")?;
        Ok(state.calibration)
    }

    fn default_params(&mut self) -> Result<Self::Params, DeviceError> {
        self.state.borrow().check("calibration_default")?;
        Ok(CalibrationParams::DEFAULT)
    }

    fn apply(&mut self, params: &Self::Params) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        state.check("calibration_apply")?;
        state.calibration = *params;
        Ok(())
    }
}

/// Point in [`VirtualClock`] time, in microseconds.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualInstant(u64);

impl VirtualInstant {
    pub const fn as_micros(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for VirtualInstant {
    type Output = VirtualInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        VirtualInstant(self.0.saturating_add(micros(rhs)))
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// [`Clock`] that advances by a fixed step on every observation and by the
/// full duration on every sleep.
#[derive(Debug)]
pub struct VirtualClock {
    now: Cell<u64>,
    step: u64,
}

impl VirtualClock {
    #[must_use]
    pub fn new(step: Duration) -> Self {
        Self {
            now: Cell::new(0),
            step: micros(step),
        }
    }

    /// Virtual time consumed so far.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.now.get())
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl Clock for VirtualClock {
    type Instant = VirtualInstant;

    fn now(&self) -> Self::Instant {
        let next = self.now.get().saturating_add(self.step);
        self.now.set(next);
        VirtualInstant(next)
    }

    fn sleep(&mut self, duration: Duration) {
        self.now.set(self.now.get().saturating_add(micros(duration)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CalibrationMode;
    use pretty_assertions::assert_eq;

    fn bench() -> SimulatedBench {
        SimulatedBench::new(DeviceProfile::STANDARD)
    }

    #[test]
    fn now_source_fires_on_next_sample() {
        let SimulatedBench {
            mut acquisition,
            probe,
            ..
        } = bench();
        acquisition.reset().unwrap();
        acquisition.set_trigger_delay(100).unwrap();
        acquisition.start().unwrap();

        assert_eq!(acquisition.pre_trigger_count().unwrap(), 256);
        assert_eq!(acquisition.write_pointer().unwrap(), 512);

        acquisition.set_trigger_source(TriggerSource::Now).unwrap();
        assert_eq!(acquisition.trigger_state().unwrap(), TriggerState::Triggered);
        assert_eq!(acquisition.write_pointer_at_trigger().unwrap(), 512);
        assert_eq!(acquisition.write_pointer().unwrap(), 612);
        assert!(acquisition.fill_state().unwrap());
        assert_eq!(probe.inspect(SimState::trigger_source), TriggerSource::Disabled);
    }

    #[test]
    fn dc_step_writes_delay_samples_above_threshold() {
        let SimulatedBench {
            mut acquisition,
            mut generator,
            mut calibration,
            ..
        } = bench();
        calibration.apply(&CalibrationParams::DEFAULT).unwrap();
        generator.set_waveform(Channel::Ch1, Waveform::Dc).unwrap();
        generator.set_amplitude(Channel::Ch1, 0.0).unwrap();
        generator.enable_output(Channel::Ch1).unwrap();

        acquisition.reset().unwrap();
        acquisition.set_trigger_level(Channel::Ch1, 0.7).unwrap();
        acquisition.set_trigger_hysteresis(0.005).unwrap();
        acquisition.set_trigger_delay(8).unwrap();
        acquisition.start().unwrap();
        acquisition.pre_trigger_count().unwrap();
        acquisition
            .set_trigger_source(TriggerSource::ChARising)
            .unwrap();
        generator.set_amplitude(Channel::Ch1, 1.0).unwrap();

        assert_eq!(acquisition.trigger_state().unwrap(), TriggerState::Triggered);
        assert!(acquisition.fill_state().unwrap());
        let trigger = acquisition.write_pointer_at_trigger().unwrap();
        assert_eq!(trigger, 256);

        let mut buffer = CaptureBuffer::for_profile(&DeviceProfile::STANDARD, CalibrationMode::Raw).unwrap();
        acquisition.read_data(trigger, &mut buffer).unwrap();
        assert_eq!(&buffer.channel(Channel::Ch1)[..10], &[8_192, 8_192, 8_192, 8_192, 8_192, 8_192, 8_192, 8_192, 0, 0]);
        assert_eq!(&buffer.channel(Channel::Ch2)[..2], &[8_192, 8_192]);
    }

    #[test]
    fn pretrigger_counter_does_not_saturate() {
        let SimulatedBench {
            mut acquisition, ..
        } = bench();
        acquisition.reset().unwrap();
        acquisition.start().unwrap();
        let mut count = 0;
        for _ in 0..100 {
            count = acquisition.pre_trigger_count().unwrap();
        }
        assert_eq!(count, 25_600);
    }

    #[test]
    fn keep_armed_board_keeps_writing_after_fill() {
        let SimulatedBench {
            mut acquisition, ..
        } = bench();
        acquisition.reset().unwrap();
        acquisition.set_trigger_delay(100).unwrap();
        acquisition.set_arm_keep_alive(true).unwrap();
        acquisition.start().unwrap();
        acquisition.set_trigger_source(TriggerSource::Now).unwrap();
        assert!(acquisition.fill_state().unwrap());

        let trigger = acquisition.write_pointer_at_trigger().unwrap();
        let first = acquisition.write_pointer().unwrap();
        let second = acquisition.write_pointer().unwrap();
        assert_eq!(second, (first + CHUNK_SAMPLES) % 16_384);
        assert_eq!(acquisition.write_pointer_at_trigger().unwrap(), trigger);
    }

    #[test]
    fn stopped_board_does_not_advance() {
        let SimulatedBench {
            mut acquisition, ..
        } = bench();
        acquisition.reset().unwrap();
        acquisition.start().unwrap();
        let before = acquisition.write_pointer().unwrap();
        acquisition.stop().unwrap();
        assert_eq!(acquisition.write_pointer().unwrap(), before);
    }

    #[test]
    fn injected_rejection_surfaces_as_device_error() {
        let SimulatedBench {
            mut acquisition,
            probe,
            ..
        } = bench();
        probe.set_fault(Some(SimFault::Reject("set_decimation")));
        assert_eq!(
            acquisition.set_decimation(8),
            Err(DeviceError::Rejected {
                operation: "set_decimation",
                code: -1
            })
        );
        probe.set_fault(None);
        assert_eq!(acquisition.set_decimation(8), Ok(()));
    }

    #[test]
    fn generator_rejects_unsupported_settings() {
        let SimulatedBench { mut generator, .. } = bench();
        assert!(generator.set_frequency(Channel::Ch1, 20_000_000).is_err());
        assert_eq!(
            generator.set_waveform(Channel::Ch1, Waveform::Sweep),
            Err(DeviceError::Unsupported {
                operation: "set_waveform"
            })
        );
    }

    #[test]
    fn calibration_round_trips_through_store() {
        let SimulatedBench {
            mut calibration,
            probe,
            ..
        } = bench();
        assert_eq!(calibration.current().unwrap(), CalibrationParams::FACTORY);
        let defaults = calibration.default_params().unwrap();
        calibration.apply(&defaults).unwrap();
        assert_eq!(probe.inspect(SimState::calibration), CalibrationParams::DEFAULT);
    }

    #[test]
    fn virtual_clock_advances_on_observation_and_sleep() {
        let mut clock = VirtualClock::new(Duration::from_micros(100));
        let first = clock.now();
        let second = clock.now();
        assert_eq!(second.as_micros() - first.as_micros(), 100);

        clock.sleep(Duration::from_millis(500));
        assert_eq!(clock.elapsed(), Duration::from_micros(500_200));
    }
}
