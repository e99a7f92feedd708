//! Capture state machine driven by synchronous polling.
//!
//! A capture walks `IDLE → CONFIGURED → ARMED → (PRETRIGGER_WAIT) → TRIGGERED
//! → FILLED → STOPPED`. The hardware progresses on its own; the controller
//! observes it by busy-polling status registers against a deadline computed
//! from the worst-case fill time at the slowest decimation. Register failures
//! never abort a capture: they are folded into a [`StepStatus`] so a capture
//! that completed with a rejected write still reports failure.

use core::fmt;
use core::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::CaptureBuffer;
use crate::device::{
    AcquisitionDevice, Channel, Clock, DeviceError, DeviceProfile, TriggerSource, TriggerState,
};

/// Trigger hysteresis written by [`CaptureSettings::new`], in volts.
pub const DEFAULT_HYSTERESIS_VOLTS: f32 = 0.005;

/// Register values written before a capture is armed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    pub decimation: u32,
    pub trigger_channel: Channel,
    /// Trigger level in volts.
    pub trigger_level: f32,
    pub hysteresis: f32,
    /// Samples written after the trigger fires.
    pub delay: u32,
    pub keep_armed: bool,
}

impl CaptureSettings {
    #[must_use]
    pub const fn new(decimation: u32, trigger_channel: Channel, trigger_level: f32, delay: u32) -> Self {
        Self {
            decimation,
            trigger_channel,
            trigger_level,
            hysteresis: DEFAULT_HYSTERESIS_VOLTS,
            delay,
            keep_armed: false,
        }
    }

    /// Enables continuous re-arming after each capture.
    #[must_use]
    pub const fn with_keep_armed(mut self, keep_armed: bool) -> Self {
        self.keep_armed = keep_armed;
        self
    }
}

/// Wait phase that owns a deadline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CapturePhase {
    PreTrigger,
    Trigger,
    Fill,
}

impl fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturePhase::PreTrigger => f.write_str("pre-trigger"),
            CapturePhase::Trigger => f.write_str("trigger"),
            CapturePhase::Fill => f.write_str("fill"),
        }
    }
}

/// Controller lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CaptureState {
    Idle,
    Configured,
    Armed,
    Triggered,
    Filled,
    Stopped,
}

impl CaptureState {
    /// Returns `true` when a new capture may be armed from this state.
    pub const fn can_arm(self) -> bool {
        matches!(
            self,
            CaptureState::Configured | CaptureState::Filled | CaptureState::Stopped
        )
    }
}

/// Progress milestones of a single capture, in the only order they may occur.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Milestone {
    Armed,
    PreTriggerSatisfied,
    Triggered,
    Filled,
}

/// Forward-only progress flags for the capture in flight.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CaptureSession {
    reached: Option<Milestone>,
}

impl CaptureSession {
    /// Moves progress forward to `milestone`; earlier milestones are implied.
    pub fn advance(&mut self, milestone: Milestone) {
        if self.reached.is_none_or(|current| milestone > current) {
            self.reached = Some(milestone);
        }
    }

    pub fn has_reached(&self, milestone: Milestone) -> bool {
        self.reached.is_some_and(|current| current >= milestone)
    }

    pub fn armed(&self) -> bool {
        self.has_reached(Milestone::Armed)
    }

    pub fn pretrigger_satisfied(&self) -> bool {
        self.has_reached(Milestone::PreTriggerSatisfied)
    }

    pub fn triggered(&self) -> bool {
        self.has_reached(Milestone::Triggered)
    }

    pub fn filled(&self) -> bool {
        self.has_reached(Milestone::Filled)
    }
}

/// Last register value seen before a phase deadline elapsed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Observation {
    PreTriggerCount(u32),
    Trigger(TriggerState),
    Filled(bool),
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::PreTriggerCount(count) => write!(f, "pre-trigger count {count}"),
            Observation::Trigger(state) => write!(f, "trigger state {state:?}"),
            Observation::Filled(filled) => write!(f, "fill state {filled}"),
        }
    }
}

/// Failures that end a capture early.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("timed out waiting for {phase} phase (last observed: {})", describe(.last_observed))]
    Timeout {
        phase: CapturePhase,
        last_observed: Option<Observation>,
    },
    #[error("cannot {operation} while the capture is {state:?}")]
    OutOfOrder {
        operation: &'static str,
        state: CaptureState,
    },
}

fn describe(observation: &Option<Observation>) -> String {
    observation.map_or_else(|| String::from("nothing"), |value| value.to_string())
}

/// Aggregate success bit for every register access of a capture.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StepStatus {
    faults: u32,
    first: Option<DeviceError>,
}

impl StepStatus {
    /// Records a failed access, keeping the first fault for diagnostics.
    pub fn record(&mut self, error: DeviceError) {
        warn!("device: {error}");
        self.faults = self.faults.saturating_add(1);
        self.first.get_or_insert(error);
    }

    /// Passes successful values through and records failures.
    pub fn absorb<T>(&mut self, result: Result<T, DeviceError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.record(error);
                None
            }
        }
    }

    /// Marks a failure that did not originate from a device call.
    pub fn fail(&mut self) {
        self.faults = self.faults.saturating_add(1);
    }

    pub fn merge(&mut self, other: StepStatus) {
        self.faults = self.faults.saturating_add(other.faults);
        if self.first.is_none() {
            self.first = other.first;
        }
    }

    pub fn is_ok(&self) -> bool {
        self.faults == 0
    }

    pub fn fault_count(&self) -> u32 {
        self.faults
    }

    pub fn first_fault(&self) -> Option<DeviceError> {
        self.first
    }
}

/// Result of [`poll_until`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Deadline elapsed; carries the last value the sampler produced.
    TimedOut(Option<T>),
}

/// Samples until `ready` accepts a value or `deadline` passes.
///
/// The sampler returns `None` when a read failed; such reads neither satisfy
/// nor reset the wait. Polling is unthrottled.
pub fn poll_until<C, T, S, P>(clock: &C, deadline: C::Instant, mut sample: S, mut ready: P) -> PollOutcome<T>
where
    C: Clock + ?Sized,
    T: Copy,
    S: FnMut() -> Option<T>,
    P: FnMut(&T) -> bool,
{
    let mut last = None;
    loop {
        if let Some(value) = sample() {
            if ready(&value) {
                return PollOutcome::Ready(value);
            }
            last = Some(value);
        }
        if clock.now() > deadline {
            return PollOutcome::TimedOut(last);
        }
    }
}

/// `{trigger, write}` snapshot of the device's circular-buffer offsets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PointerPair {
    pub trigger: u32,
    pub write: u32,
}

impl fmt::Display for PointerPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trigger={} write={}", self.trigger, self.write)
    }
}

/// Drives one capture at a time against an [`AcquisitionDevice`].
pub struct AcquisitionController<A, C> {
    device: A,
    clock: C,
    capacity: u32,
    timeout: Duration,
    state: CaptureState,
    session: CaptureSession,
    settings: Option<CaptureSettings>,
    status: StepStatus,
}

impl<A, C> AcquisitionController<A, C>
where
    A: AcquisitionDevice,
    C: Clock,
{
    pub fn new(device: A, clock: C, profile: &DeviceProfile) -> Self {
        Self {
            device,
            clock,
            capacity: profile.buffer_capacity,
            timeout: profile.max_capture_timeout(),
            state: CaptureState::Idle,
            session: CaptureSession::default(),
            settings: None,
            status: StepStatus::default(),
        }
    }

    pub fn device(&self) -> &A {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut A {
        &mut self.device
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn session(&self) -> CaptureSession {
        self.session
    }

    pub fn settings(&self) -> Option<&CaptureSettings> {
        self.settings.as_ref()
    }

    /// Per-phase timeout shared by every wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn status(&self) -> &StepStatus {
        &self.status
    }

    /// Returns the accumulated status and starts a fresh one.
    pub fn take_status(&mut self) -> StepStatus {
        core::mem::take(&mut self.status)
    }

    /// Folds a status gathered outside the controller into the aggregate.
    pub fn merge_status(&mut self, other: StepStatus) {
        self.status.merge(other);
    }

    /// Resets the device and writes every acquisition register.
    pub fn configure(&mut self, settings: CaptureSettings) {
        debug!(
            "acquisition: configure dec={} level={}V hyst={}V delay={} keep_armed={}",
            settings.decimation,
            settings.trigger_level,
            settings.hysteresis,
            settings.delay,
            settings.keep_armed
        );
        let status = &mut self.status;
        let device = &mut self.device;
        status.absorb(device.reset());
        status.absorb(device.set_decimation(settings.decimation));
        status.absorb(device.set_trigger_level(settings.trigger_channel, settings.trigger_level));
        status.absorb(device.set_trigger_hysteresis(settings.hysteresis));
        status.absorb(device.set_trigger_delay(settings.delay));
        status.absorb(device.set_arm_keep_alive(settings.keep_armed));

        self.settings = Some(settings);
        self.session = CaptureSession::default();
        self.state = CaptureState::Configured;
    }

    /// Re-targets the decimation between captures without resetting the device.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfOrder`] while a capture is in flight or
    /// before [`configure`](Self::configure).
    pub fn set_decimation(&mut self, factor: u32) -> Result<(), CaptureError> {
        if !self.state.can_arm() || self.settings.is_none() {
            return Err(self.out_of_order("change decimation"));
        }
        if let Some(settings) = self.settings.as_mut() {
            settings.decimation = factor;
        }
        self.status.absorb(self.device.set_decimation(factor));
        Ok(())
    }

    /// Starts acquisition and waits for the pre-trigger portion to fill.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfOrder`] unless configured or finished, and
    /// [`CaptureError::Timeout`] when the pre-trigger counter stalls.
    pub fn arm(&mut self) -> Result<(), CaptureError> {
        if !self.state.can_arm() {
            return Err(self.out_of_order("arm"));
        }
        let Some(settings) = self.settings else {
            return Err(self.out_of_order("arm"));
        };

        self.session = CaptureSession::default();
        self.status.absorb(self.device.start());
        self.session.advance(Milestone::Armed);
        self.state = CaptureState::Armed;

        let target = self.capacity.saturating_sub(settings.delay);
        if target == 0 {
            self.session.advance(Milestone::PreTriggerSatisfied);
            return Ok(());
        }

        debug!("acquisition: waiting for {target} pre-trigger samples");
        let capacity = self.capacity;
        let deadline = self.clock.now() + self.timeout;
        let outcome = poll_until(
            &self.clock,
            deadline,
            || self.status.absorb(self.device.pre_trigger_count()),
            |count| *count >= target || *count >= capacity,
        );

        match outcome {
            PollOutcome::Ready(_) => {
                self.session.advance(Milestone::PreTriggerSatisfied);
                Ok(())
            }
            PollOutcome::TimedOut(last) => {
                Err(self.abort(CapturePhase::PreTrigger, last.map(Observation::PreTriggerCount)))
            }
        }
    }

    /// Selects the trigger condition once the pre-trigger wait is over.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfOrder`] before the pre-trigger portion is
    /// satisfied, since writing the source earlier races the device.
    pub fn set_trigger_source(&mut self, source: TriggerSource) -> Result<(), CaptureError> {
        if self.state != CaptureState::Armed || !self.session.pretrigger_satisfied() {
            return Err(self.out_of_order("set the trigger source"));
        }
        debug!("acquisition: trigger source {source}");
        self.status.absorb(self.device.set_trigger_source(source));
        Ok(())
    }

    /// Writes `DISABLED` to the trigger source.
    pub fn disarm_trigger(&mut self) {
        self.status
            .absorb(self.device.set_trigger_source(TriggerSource::Disabled));
    }

    /// Overrides the trigger source with an immediate trigger.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfOrder`] when nothing has been armed.
    pub fn force_trigger_now(&mut self) -> Result<(), CaptureError> {
        if !self.session.armed() {
            return Err(self.out_of_order("force a trigger"));
        }
        debug!("acquisition: forcing trigger now");
        self.status
            .absorb(self.device.set_trigger_source(TriggerSource::Now));
        Ok(())
    }

    /// Polls until the trigger fires.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Timeout`] tagged with the trigger phase; the
    /// device is stopped before returning.
    pub fn wait_triggered(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Armed || !self.session.pretrigger_satisfied() {
            return Err(self.out_of_order("wait for the trigger"));
        }

        let deadline = self.clock.now() + self.timeout;
        let outcome = poll_until(
            &self.clock,
            deadline,
            || self.status.absorb(self.device.trigger_state()),
            |state| *state == TriggerState::Triggered,
        );

        match outcome {
            PollOutcome::Ready(_) => {
                self.session.advance(Milestone::Triggered);
                self.state = CaptureState::Triggered;
                Ok(())
            }
            PollOutcome::TimedOut(last) => {
                Err(self.abort(CapturePhase::Trigger, last.map(Observation::Trigger)))
            }
        }
    }

    /// Polls until the post-trigger portion has been written.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Timeout`] tagged with the fill phase; the
    /// device is stopped before returning.
    pub fn wait_filled(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Triggered {
            return Err(self.out_of_order("wait for the buffer to fill"));
        }

        let deadline = self.clock.now() + self.timeout;
        let outcome = poll_until(
            &self.clock,
            deadline,
            || self.status.absorb(self.device.fill_state()),
            |filled| *filled,
        );

        match outcome {
            PollOutcome::Ready(_) => {
                self.session.advance(Milestone::Filled);
                self.state = CaptureState::Filled;
                Ok(())
            }
            PollOutcome::TimedOut(last) => {
                Err(self.abort(CapturePhase::Fill, last.map(Observation::Filled)))
            }
        }
    }

    /// Stops acquisition. Safe to call in any state.
    pub fn stop(&mut self) {
        self.status.absorb(self.device.stop());
        if self.session.armed() {
            self.state = CaptureState::Stopped;
        }
    }

    /// Copies the captured samples, starting at the trigger position.
    ///
    /// Returns the write pointer at trigger.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OutOfOrder`] unless the buffer has filled.
    pub fn fetch(&mut self, buffer: &mut CaptureBuffer) -> Result<u32, CaptureError> {
        if !self.session.filled() {
            return Err(self.out_of_order("fetch samples"));
        }
        let trigger = self
            .status
            .absorb(self.device.write_pointer_at_trigger())
            .unwrap_or_default();
        self.status.absorb(self.device.read_data(trigger, buffer));
        Ok(trigger)
    }

    /// Reads the trigger and write pointers, or `None` if either read failed.
    pub fn pointers(&mut self) -> Option<PointerPair> {
        let trigger = self.status.absorb(self.device.write_pointer_at_trigger());
        let write = self.status.absorb(self.device.write_pointer());
        Some(PointerPair {
            trigger: trigger?,
            write: write?,
        })
    }

    /// Samples the pre-trigger counter `reads` times, `interval` apart.
    ///
    /// Returns `false` if the counter ever repeats a nonzero value.
    pub fn check_pretrigger_progress(&mut self, reads: usize, interval: Duration) -> bool {
        let mut previous = 0;
        let mut advancing = true;
        for _ in 0..reads {
            let current = self
                .status
                .absorb(self.device.pre_trigger_count())
                .unwrap_or(previous);
            self.clock.sleep(interval);
            if current == previous && previous != 0 {
                warn!("acquisition: pre-trigger counter stalled at {current}");
                advancing = false;
            }
            previous = current;
        }
        advancing
    }

    /// Runs a complete capture into `buffer` and returns the trigger pointer.
    ///
    /// # Errors
    ///
    /// Propagates the first [`CaptureError`] from any phase.
    pub fn capture(
        &mut self,
        settings: CaptureSettings,
        source: TriggerSource,
        buffer: &mut CaptureBuffer,
    ) -> Result<u32, CaptureError> {
        self.configure(settings);
        self.arm()?;
        self.set_trigger_source(source)?;
        self.wait_triggered()?;
        self.wait_filled()?;
        self.stop();
        let trigger = self.fetch(buffer)?;
        debug!("acquisition: captured from trigger pointer {trigger}");
        Ok(trigger)
    }

    fn abort(&mut self, phase: CapturePhase, last_observed: Option<Observation>) -> CaptureError {
        let error = CaptureError::Timeout {
            phase,
            last_observed,
        };
        warn!("acquisition: {error}");
        self.stop();
        error
    }

    fn out_of_order(&self, operation: &'static str) -> CaptureError {
        CaptureError::OutOfOrder {
            operation,
            state: self.state,
        }
    }
}

impl<A, C> fmt::Debug for AcquisitionController<A, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("capacity", &self.capacity)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("settings", &self.settings)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
