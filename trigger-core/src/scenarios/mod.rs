//! Validation scenarios and the session that sequences them.
//!
//! Each scenario sweeps the matrix from the shared [`SweepPlanner`], drives
//! the generator, captures through the [`AcquisitionController`], validates
//! the fetched buffer and records one [`TestOutcome`](crate::report::TestOutcome)
//! per iteration. Register failures and timeouts fail the iteration and the
//! sweep moves on; only setup failures end a scenario early.

use core::fmt;
use core::ops::ControlFlow;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionController, CaptureSettings, StepStatus};
use crate::buffer::{BufferError, CaptureBuffer};
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, DeviceError, DeviceProfile,
    OutputChannel, SignalGenerator, TriggerSource, Waveform,
};
use crate::report::{OutcomeLog, TestOutcome};
use crate::sweep::SweepPlanner;
use crate::validate::{DiagnosticWindow, ValidationFailure};

pub mod delay;
pub mod keep_arm;
pub mod noise;
pub mod position;
pub mod setting_now;

/// Number of distinct scenarios.
pub const MAX_SCENARIOS: usize = 5;
/// Stimulus frequency above which failures suggest checking the output load.
pub const LOAD_HINT_FREQUENCY: u32 = 10_000_000;

/// One validation scenario, in canonical run order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ScenarioKind {
    TriggerPosition,
    TriggerDelay,
    TriggerSettingNow,
    KeepArm,
    NoiseImmunity,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; MAX_SCENARIOS] = [
        ScenarioKind::TriggerPosition,
        ScenarioKind::TriggerDelay,
        ScenarioKind::TriggerSettingNow,
        ScenarioKind::KeepArm,
        ScenarioKind::NoiseImmunity,
    ];

    /// Number used by the `-tN` command-line flag.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            ScenarioKind::TriggerPosition => 1,
            ScenarioKind::TriggerDelay => 2,
            ScenarioKind::TriggerSettingNow => 3,
            ScenarioKind::KeepArm => 4,
            ScenarioKind::NoiseImmunity => 5,
        }
    }

    #[must_use]
    pub const fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(ScenarioKind::TriggerPosition),
            2 => Some(ScenarioKind::TriggerDelay),
            3 => Some(ScenarioKind::TriggerSettingNow),
            4 => Some(ScenarioKind::KeepArm),
            5 => Some(ScenarioKind::NoiseImmunity),
            _ => None,
        }
    }

    /// Short description used in help and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ScenarioKind::TriggerPosition => "trigger position",
            ScenarioKind::TriggerDelay => "pretrigger and delay logic",
            ScenarioKind::TriggerSettingNow => "trigger setting now",
            ScenarioKind::KeepArm => "keep arm",
            ScenarioKind::NoiseImmunity => "noise on the channels",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scenarios chosen for a session, kept unique and in canonical order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScenarioSelection {
    kinds: HeaplessVec<ScenarioKind, MAX_SCENARIOS>,
}

impl ScenarioSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all() -> Self {
        let mut selection = Self::new();
        for kind in ScenarioKind::ALL {
            selection.insert(kind);
        }
        selection
    }

    pub fn insert(&mut self, kind: ScenarioKind) {
        if let Err(position) = self.kinds.binary_search(&kind) {
            // Each kind appears at most once, so the vector never overflows.
            let _ = self.kinds.insert(position, kind);
        }
    }

    pub fn contains(&self, kind: ScenarioKind) -> bool {
        self.kinds.binary_search(&kind).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = ScenarioKind> + '_ {
        self.kinds.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl FromIterator<ScenarioKind> for ScenarioSelection {
    fn from_iter<T: IntoIterator<Item = ScenarioKind>>(iter: T) -> Self {
        let mut selection = Self::new();
        for kind in iter {
            selection.insert(kind);
        }
        selection
    }
}

/// How much to report and whether to stop at the first failure.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunPolicy {
    pub verbose: bool,
    pub show_buffer: bool,
    pub stop_on_fail: bool,
}

/// Settle delays and poll counts used inside scenario iterations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScenarioTiming {
    /// Wait after parking the generator before cleaning the device buffer.
    pub output_settle: Duration,
    /// Wait between forcing a trigger and re-reading the pointers.
    pub now_settle: Duration,
    pub pretrigger_checks: usize,
    pub pretrigger_check_interval: Duration,
    pub keep_arm_polls: usize,
    pub keep_arm_poll_interval: Duration,
}

impl Default for ScenarioTiming {
    fn default() -> Self {
        Self {
            output_settle: Duration::from_millis(1),
            now_settle: Duration::from_millis(500),
            pretrigger_checks: 10,
            pretrigger_check_interval: Duration::from_millis(1),
            keep_arm_polls: 10,
            keep_arm_poll_interval: Duration::from_millis(1),
        }
    }
}

/// Failures that prevent a scenario from running at all.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot allocate the capture buffer: {0}")]
    Buffer(#[from] BufferError),
    #[error("calibration store unavailable: {0}")]
    Calibration(#[source] DeviceError),
    #[error("device initialisation failed: {0}")]
    Device(#[source] DeviceError),
}

/// Result of one scenario run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScenarioReport {
    pub kind: ScenarioKind,
    pub failed: bool,
    pub outcomes: OutcomeLog,
    /// Set when stop-on-fail cut the sweep short.
    pub aborted: bool,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        !self.failed
    }
}

/// Stimulus programmed on one generator output.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stimulus {
    pub channel: OutputChannel,
    pub waveform: Waveform,
    pub frequency: u32,
    pub amplitude: f32,
    pub offset: f32,
}

impl Stimulus {
    /// Frequency programmed for DC levels, which ignore it.
    pub const DC_FREQUENCY: u32 = 1_000;

    #[must_use]
    pub const fn sine(frequency: u32, amplitude: f32) -> Self {
        Self {
            channel: Channel::Ch1,
            waveform: Waveform::Sine,
            frequency,
            amplitude,
            offset: 0.0,
        }
    }

    #[must_use]
    pub const fn dc(volts: f32) -> Self {
        Self {
            channel: Channel::Ch1,
            waveform: Waveform::Dc,
            frequency: Self::DC_FREQUENCY,
            amplitude: volts,
            offset: 0.0,
        }
    }
}

/// Outcome bookkeeping for the scenario in flight.
#[derive(Debug)]
pub(crate) struct Sweep {
    kind: ScenarioKind,
    policy: RunPolicy,
    outcomes: OutcomeLog,
    failed: bool,
    aborted: bool,
}

impl Sweep {
    fn new(kind: ScenarioKind, policy: RunPolicy) -> Self {
        Self {
            kind,
            policy,
            outcomes: OutcomeLog::new(),
            failed: false,
            aborted: false,
        }
    }

    /// Records an iteration verdict; breaks when the sweep must stop.
    pub(crate) fn record(&mut self, name: String, passed: bool) -> ControlFlow<()> {
        if self.policy.verbose || !passed {
            self.outcomes.record(name, passed);
        }
        if passed {
            return ControlFlow::Continue(());
        }
        self.failed = true;
        if self.policy.stop_on_fail {
            warn!("{}: stopping on first failure", self.kind);
            self.aborted = true;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Fails the scenario for register errors outside any iteration.
    pub(crate) fn absorb_setup(&mut self, status: StepStatus) {
        if !status.is_ok() {
            warn!(
                "{}: {} register access(es) failed outside the sweep",
                self.kind,
                status.fault_count()
            );
            self.failed = true;
        }
    }

    fn finish(self) -> ScenarioReport {
        ScenarioReport {
            kind: self.kind,
            failed: self.failed,
            outcomes: self.outcomes,
            aborted: self.aborted,
        }
    }
}

/// Runs scenarios against one acquisition device, generator and calibration
/// store.
pub struct ScenarioRunner<A, G, K, C> {
    acquisition: AcquisitionController<A, C>,
    generator: G,
    calibration: K,
    planner: SweepPlanner,
    profile: DeviceProfile,
    policy: RunPolicy,
    timing: ScenarioTiming,
}

impl<A, G, K, C> ScenarioRunner<A, G, K, C>
where
    A: AcquisitionDevice,
    G: SignalGenerator,
    K: CalibrationStore,
    C: Clock,
{
    pub fn new(acquisition: A, generator: G, calibration: K, clock: C, planner: SweepPlanner) -> Self {
        let profile = *planner.profile();
        Self {
            acquisition: AcquisitionController::new(acquisition, clock, &profile),
            generator,
            calibration,
            planner,
            profile,
            policy: RunPolicy::default(),
            timing: ScenarioTiming::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_timing(mut self, timing: ScenarioTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    pub fn planner(&self) -> &SweepPlanner {
        &self.planner
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn controller(&self) -> &AcquisitionController<A, C> {
        &self.acquisition
    }

    pub fn controller_mut(&mut self) -> &mut AcquisitionController<A, C> {
        &mut self.acquisition
    }

    pub fn generator_mut(&mut self) -> &mut G {
        &mut self.generator
    }

    pub fn calibration_mut(&mut self) -> &mut K {
        &mut self.calibration
    }

    /// Resets the device and checks the calibration store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] when the device or the store refuses.
    pub fn prepare(&mut self, debug_registers: bool) -> Result<(), SetupError> {
        let device = self.acquisition.device_mut();
        if debug_registers {
            device.enable_debug_registers().map_err(SetupError::Device)?;
        }
        device.reset().map_err(SetupError::Device)?;
        self.calibration.current().map_err(SetupError::Calibration)?;
        Ok(())
    }

    /// Runs one scenario over its whole sweep.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] when the scenario cannot start or cannot restore
    /// the calibration it changed.
    pub fn run(&mut self, kind: ScenarioKind) -> Result<ScenarioReport, SetupError> {
        let mut sweep = Sweep::new(kind, self.policy);
        if !self.profile.has_stimulus_outputs() {
            warn!(
                "{kind}: skipped, the bench needs two generator outputs looped back to the inputs"
            );
            return Ok(sweep.finish());
        }

        debug!("{kind}: starting");
        match kind {
            ScenarioKind::TriggerPosition => self.run_trigger_position(&mut sweep)?,
            ScenarioKind::TriggerDelay => self.run_trigger_delay(&mut sweep)?,
            ScenarioKind::TriggerSettingNow => self.run_setting_now(&mut sweep)?,
            ScenarioKind::KeepArm => self.run_keep_arm(&mut sweep)?,
            ScenarioKind::NoiseImmunity => self.run_noise_immunity(&mut sweep)?,
        }

        let report = sweep.finish();
        debug!(
            "{kind}: finished, {}",
            if report.failed { "failed" } else { "passed" }
        );
        Ok(report)
    }

    /// Runs `body` under default calibration, restoring the previous one after.
    fn with_default_calibration<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, SetupError>,
    ) -> Result<T, SetupError> {
        let previous = self.calibration.current().map_err(SetupError::Calibration)?;
        let defaults = self
            .calibration
            .default_params()
            .map_err(SetupError::Calibration)?;
        self.calibration
            .apply(&defaults)
            .map_err(SetupError::Calibration)?;

        let result = body(self);

        let restored = self
            .calibration
            .apply(&previous)
            .map_err(SetupError::Calibration);
        let value = result?;
        restored?;
        Ok(value)
    }

    fn announce(&self, name: &str) {
        if self.policy.verbose {
            info!("{name}");
        }
    }

    /// Programs and starts one generator output.
    fn drive(&mut self, stimulus: Stimulus) {
        let Stimulus {
            channel,
            waveform,
            frequency,
            amplitude,
            offset,
        } = stimulus;
        let generator = &mut self.generator;
        let results = [
            generator.reset(),
            generator.set_offset(channel, offset),
            generator.set_amplitude(channel, amplitude),
            generator.set_waveform(channel, waveform),
            generator.set_frequency(channel, frequency),
            generator.enable_output(channel),
            generator.trigger_once(channel),
        ];

        let mut status = StepStatus::default();
        for result in results {
            status.absorb(result);
        }
        if self.policy.verbose {
            info!(
                "* Start signal generator. Ampl: {amplitude} V. Offset: {offset} V. Freq: {frequency} Hz. Wave: {waveform} {}",
                TestOutcome::marker_for(status.is_ok())
            );
        }
        self.acquisition.merge_status(status);
    }

    /// Runs a full capture, logging instead of propagating a capture error.
    fn capture_into(
        &mut self,
        settings: CaptureSettings,
        source: TriggerSource,
        buffer: &mut CaptureBuffer,
    ) -> bool {
        if self.policy.verbose {
            info!("* Start capturing data");
        }
        let result = self.acquisition.capture(settings, source, buffer);
        if let Err(error) = &result {
            warn!("capture failed: {error}");
        }
        if self.policy.verbose {
            info!(
                "* End capturing data {}",
                TestOutcome::marker_for(result.is_ok() && self.acquisition.status().is_ok())
            );
        }
        result.is_ok()
    }

    /// Logs a rejected buffer together with its diagnostic window.
    fn report_failure(
        &self,
        context: &str,
        failure: &ValidationFailure,
        buffer: &CaptureBuffer,
        frequency: Option<u32>,
    ) {
        warn!("Fail in {context}: {failure}");
        if frequency.is_some_and(|frequency| frequency > LOAD_HINT_FREQUENCY) {
            warn!("\tCheck 50 Ohm load on generator");
        }
        warn!("{}", failure.excerpt(buffer));
    }

    /// Dumps a window of an accepted buffer when buffers were requested.
    fn show_buffer(&self, buffer: &CaptureBuffer, channel: Channel, window: DiagnosticWindow) {
        if self.policy.show_buffer {
            info!("{}", buffer.window(channel, window.offset, window.len));
        }
    }

    /// Settles the accumulated register status into a pass/fail bit.
    fn registers_ok(&mut self) -> bool {
        self.acquisition.take_status().is_ok()
    }
}

/// Result of a whole session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionReport {
    pub outcomes: OutcomeLog,
    pub failed: bool,
    pub aborted: bool,
}

impl SessionReport {
    /// Process exit status: zero only when nothing failed.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.failed)
    }
}

/// A scenario could not be set up; carries everything gathered before it.
#[derive(Debug, Error)]
#[error("{kind} scenario could not run: {source}")]
pub struct SessionError {
    pub kind: ScenarioKind,
    pub source: SetupError,
    pub outcomes: OutcomeLog,
}

/// Sequences the selected scenarios.
#[derive(Copy, Clone, Debug, Default)]
pub struct Session;

impl Session {
    /// Runs `selection` in canonical order, stopping after an aborted scenario.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] with the outcomes gathered so far when a
    /// scenario cannot be set up.
    pub fn run<A, G, K, C>(
        runner: &mut ScenarioRunner<A, G, K, C>,
        selection: &ScenarioSelection,
    ) -> Result<SessionReport, SessionError>
    where
        A: AcquisitionDevice,
        G: SignalGenerator,
        K: CalibrationStore,
        C: Clock,
    {
        let mut report = SessionReport::default();
        for kind in selection.iter() {
            let scenario = match runner.run(kind) {
                Ok(scenario) => scenario,
                Err(source) => {
                    return Err(SessionError {
                        kind,
                        source,
                        outcomes: report.outcomes,
                    });
                }
            };

            report.failed |= scenario.failed;
            report.outcomes.merge(scenario.outcomes);
            if scenario.aborted {
                report.aborted = true;
                break;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn selection_is_unique_and_canonical() {
        let selection: ScenarioSelection = [
            ScenarioKind::NoiseImmunity,
            ScenarioKind::TriggerPosition,
            ScenarioKind::NoiseImmunity,
            ScenarioKind::KeepArm,
        ]
        .into_iter()
        .collect();

        assert_eq!(
            selection.iter().collect::<Vec<_>>(),
            vec![
                ScenarioKind::TriggerPosition,
                ScenarioKind::KeepArm,
                ScenarioKind::NoiseImmunity
            ]
        );
        assert!(!selection.contains(ScenarioKind::TriggerDelay));
        assert_eq!(ScenarioSelection::all().len(), MAX_SCENARIOS);
    }

    #[test]
    fn scenario_numbers_round_trip() {
        for kind in ScenarioKind::ALL {
            assert_eq!(ScenarioKind::from_number(kind.number()), Some(kind));
        }
        assert_eq!(ScenarioKind::from_number(6), None);
    }

    #[test]
    fn sweep_records_failures_even_when_quiet() {
        let mut sweep = Sweep::new(ScenarioKind::KeepArm, RunPolicy::default());
        assert_eq!(sweep.record("a".into(), true), ControlFlow::Continue(()));
        assert_eq!(sweep.record("b".into(), false), ControlFlow::Continue(()));

        let report = sweep.finish();
        assert!(report.failed);
        assert!(!report.aborted);
        assert_eq!(report.outcomes.len(), 1);
    }

    #[test]
    fn sweep_breaks_on_failure_when_stopping() {
        let policy = RunPolicy {
            verbose: true,
            stop_on_fail: true,
            ..RunPolicy::default()
        };
        let mut sweep = Sweep::new(ScenarioKind::TriggerDelay, policy);
        assert_eq!(sweep.record("a".into(), true), ControlFlow::Continue(()));
        assert_eq!(sweep.record("b".into(), false), ControlFlow::Break(()));

        let report = sweep.finish();
        assert!(report.aborted);
        assert_eq!(report.outcomes.len(), 2);
    }

    #[test]
    fn exit_code_reflects_failure() {
        let mut report = SessionReport::default();
        assert_eq!(report.exit_code(), 0);
        report.failed = true;
        assert_eq!(report.exit_code(), 1);
    }
}
