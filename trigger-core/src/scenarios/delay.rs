//! Trigger delay: exactly `delay` samples follow the trigger.
//!
//! The input idles at 0 V while the buffer is scrubbed with forced captures,
//! then a rising trigger at 0.7 V is armed and the generator steps to 1 V.
//! Every sample from the trigger up to the delay must carry the step.

use tracing::warn;

use super::{ScenarioRunner, ScenarioTiming, SetupError, Stimulus, Sweep};
use crate::acquisition::{CaptureError, CaptureSettings, StepStatus};
use crate::buffer::{CalibrationMode, CaptureBuffer};
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, DeviceModel, Edge, MIN_DECIMATION,
    SignalGenerator, TriggerSource,
};
use crate::validate::{DELAY_THRESHOLD_FRACTION, DiagnosticWindow, validate_delay_count};

/// Output level held while the buffer is scrubbed.
pub const IDLE_VOLTS: f32 = 0.0;
/// Output level after the step.
pub const STEP_VOLTS: f32 = 1.0;
/// Trigger level between the idle and step levels.
pub const DELAY_TRIGGER_LEVEL: f32 = 0.7;
/// Trigger level programmed for the forced scrub captures.
pub const SCRUB_TRIGGER_LEVEL: f32 = 0.0;
/// Forced captures used to overwrite stale data before each iteration.
pub const SCRUB_CAPTURES: usize = 2;

impl<A, G, K, C> ScenarioRunner<A, G, K, C>
where
    A: AcquisitionDevice,
    G: SignalGenerator,
    K: CalibrationStore,
    C: Clock,
{
    pub(super) fn run_trigger_delay(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        if self.profile.model == DeviceModel::LowResolution {
            warn!("trigger delay: not supported on the {} model, skipped", self.profile.model);
            return Ok(());
        }
        self.with_default_calibration(|runner| runner.delay_sweep(sweep))
    }

    fn delay_sweep(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        let mut buffer = CaptureBuffer::for_profile(&self.profile, CalibrationMode::Raw)?;
        let delays = self.planner.delays();
        sweep.absorb_setup(self.acquisition.take_status());

        for decimation in self.planner.decimations() {
            for &delay in &delays {
                let name = format!("Testing trigger delay. Delay: {delay} Decimate: {decimation}");
                self.announce(&name);

                let counted = self.check_delay(&mut buffer, decimation, delay);
                let passed = self.registers_ok() && counted;
                if sweep.record(name, passed).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn check_delay(&mut self, buffer: &mut CaptureBuffer, decimation: u32, delay: u32) -> bool {
        self.drive(Stimulus::dc(IDLE_VOLTS));
        let settle = self.timing.output_settle;
        self.acquisition.clock_mut().sleep(settle);
        if !self.scrub(buffer) {
            return false;
        }

        let settings = CaptureSettings::new(decimation, Channel::Ch1, DELAY_TRIGGER_LEVEL, delay);
        if let Err(error) = self.step_capture(settings, buffer) {
            warn!("trigger delay: capture failed: {error}");
            return false;
        }

        let expected = usize::try_from(delay).unwrap_or(usize::MAX);
        match validate_delay_count(buffer, Channel::Ch1, expected, DELAY_THRESHOLD_FRACTION) {
            Ok(count) => {
                let shown = isize::try_from(count).unwrap_or(0);
                self.show_buffer(buffer, Channel::Ch1, DiagnosticWindow::new(shown - 2, 5));
                true
            }
            Err(failure) => {
                let context = format!("delay {delay} at decimation {decimation}");
                self.report_failure(&context, &failure, buffer, None);
                false
            }
        }
    }

    /// Fills the device buffer with idle-level samples.
    fn scrub(&mut self, buffer: &mut CaptureBuffer) -> bool {
        let settings = CaptureSettings::new(
            MIN_DECIMATION,
            Channel::Ch1,
            SCRUB_TRIGGER_LEVEL,
            self.profile.buffer_capacity,
        );
        (0..SCRUB_CAPTURES).all(|_| self.capture_into(settings, TriggerSource::Now, buffer))
    }

    /// Arms a rising trigger, steps the output and fetches the capture.
    fn step_capture(
        &mut self,
        settings: CaptureSettings,
        buffer: &mut CaptureBuffer,
    ) -> Result<(), CaptureError> {
        let ScenarioTiming {
            pretrigger_checks,
            pretrigger_check_interval,
            ..
        } = self.timing;

        self.acquisition.configure(settings);
        self.acquisition.arm()?;
        if !self
            .acquisition
            .check_pretrigger_progress(pretrigger_checks, pretrigger_check_interval)
        {
            self.acquisition.merge_status(stalled());
        }
        self.acquisition
            .set_trigger_source(TriggerSource::edge(Channel::Ch1, Edge::Rising))?;
        self.drive(Stimulus::dc(STEP_VOLTS));
        self.acquisition.wait_triggered()?;
        self.acquisition.wait_filled()?;
        self.acquisition.stop();
        self.acquisition.fetch(buffer)?;
        Ok(())
    }
}

/// Status carrying one fault for a pre-trigger counter that stopped moving.
fn stalled() -> StepStatus {
    let mut status = StepStatus::default();
    status.fail();
    status
}
