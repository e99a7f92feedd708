//! Noise immunity: a clean sine never shows an isolated sign flip.

use tracing::warn;

use super::{ScenarioRunner, SetupError, Stimulus, Sweep};
use crate::acquisition::CaptureSettings;
use crate::buffer::{CalibrationMode, CaptureBuffer};
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, SignalGenerator, TriggerSource,
};
use crate::sweep::SweepConfig;
use crate::validate::{DiagnosticWindow, validate_noise_immunity};

/// Stimulus amplitude, in volts.
pub const NOISE_AMPLITUDE: f32 = 0.9;

/// Input checked and the trigger that starts its capture.
const PROBES: [(Channel, TriggerSource); 2] = [
    (Channel::Ch1, TriggerSource::ChARising),
    (Channel::Ch2, TriggerSource::ChBRising),
];

impl<A, G, K, C> ScenarioRunner<A, G, K, C>
where
    A: AcquisitionDevice,
    G: SignalGenerator,
    K: CalibrationStore,
    C: Clock,
{
    pub(super) fn run_noise_immunity(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        // Indicator LEDs couple switching noise into the inputs.
        if let Err(error) = self.acquisition.device_mut().quiet_indicators() {
            warn!("noise: cannot turn off indicators: {error}");
        }
        self.with_default_calibration(|runner| runner.noise_sweep(sweep))
    }

    fn noise_sweep(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        let mut buffer = CaptureBuffer::for_profile(&self.profile, CalibrationMode::Raw)?;
        let plan = self.planner.frequency_plan(&SweepConfig::NOISE_IMMUNITY);
        sweep.absorb_setup(self.acquisition.take_status());

        for (decimation, frequencies) in plan.iter() {
            for &frequency in frequencies {
                let name = format!("Noise test. Decimate: {decimation}. Signal freq: {frequency}");
                self.announce(&name);
                self.drive(Stimulus::sine(frequency, NOISE_AMPLITUDE));

                let mut passed = true;
                for (channel, source) in PROBES {
                    passed &= self.check_noise(&mut buffer, decimation, frequency, channel, source);
                }
                passed &= self.registers_ok();

                if sweep.record(name, passed).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn check_noise(
        &mut self,
        buffer: &mut CaptureBuffer,
        decimation: u32,
        frequency: u32,
        channel: Channel,
        source: TriggerSource,
    ) -> bool {
        let settings = CaptureSettings::new(decimation, channel, 0.0, self.profile.buffer_capacity);
        if !self.capture_into(settings, source, buffer) {
            return false;
        }

        match validate_noise_immunity(buffer, channel) {
            Ok(()) => {
                self.show_buffer(buffer, channel, DiagnosticWindow::new(0, 8));
                true
            }
            Err(failure) => {
                let context = format!("{channel} noise (decimation {decimation}, {frequency} Hz)");
                self.report_failure(&context, &failure, buffer, Some(frequency));
                false
            }
        }
    }
}
