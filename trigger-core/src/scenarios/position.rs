//! Trigger position: the trigger sample sits exactly on the configured edge.
//!
//! A sine is captured with the trigger halfway through the buffer, so the
//! fetched buffer starts at the trigger sample and wraps around to the sample
//! just before it. Both edges are checked at every sweep point.

use super::{ScenarioRunner, SetupError, Stimulus, Sweep};
use crate::acquisition::CaptureSettings;
use crate::buffer::{CalibrationMode, CaptureBuffer};
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, Edge, SignalGenerator, TriggerSource,
};
use crate::sweep::SweepConfig;
use crate::validate::{DiagnosticWindow, validate_position};

/// Stimulus amplitude as a fraction of the generator's full scale.
pub const AMPLITUDE_FRACTION: f32 = 0.9;
/// Trigger level for both edges, in volts.
pub const POSITION_TRIGGER_LEVEL: f32 = 0.0;

const EDGES: [Edge; 2] = [Edge::Rising, Edge::Falling];
const SHOWN_WINDOW: DiagnosticWindow = DiagnosticWindow::new(-5, 10);

impl<A, G, K, C> ScenarioRunner<A, G, K, C>
where
    A: AcquisitionDevice,
    G: SignalGenerator,
    K: CalibrationStore,
    C: Clock,
{
    pub(super) fn run_trigger_position(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        self.with_default_calibration(|runner| runner.position_sweep(sweep))
    }

    fn position_sweep(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        let mut buffer = CaptureBuffer::for_profile(&self.profile, CalibrationMode::Raw)?;
        let plan = self.planner.frequency_plan(&SweepConfig::TRIGGER_POSITION);
        let amplitude = AMPLITUDE_FRACTION * self.profile.dac_gain_ch1;
        sweep.absorb_setup(self.acquisition.take_status());

        for (decimation, frequencies) in plan.iter() {
            for &frequency in frequencies {
                let name =
                    format!("Trigger position test. Decimate: {decimation}. Signal freq: {frequency}");
                self.announce(&name);
                self.drive(Stimulus::sine(frequency, amplitude));

                let mut passed = true;
                for edge in EDGES {
                    passed &= self.check_edge(&mut buffer, decimation, frequency, edge);
                }
                passed &= self.registers_ok();

                if sweep.record(name, passed).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn check_edge(
        &mut self,
        buffer: &mut CaptureBuffer,
        decimation: u32,
        frequency: u32,
        edge: Edge,
    ) -> bool {
        let settings = CaptureSettings::new(
            decimation,
            Channel::Ch1,
            POSITION_TRIGGER_LEVEL,
            self.profile.buffer_capacity / 2,
        );
        let source = TriggerSource::edge(Channel::Ch1, edge);
        if !self.capture_into(settings, source, buffer) {
            return false;
        }

        match validate_position(buffer, Channel::Ch1, edge) {
            Ok(()) => {
                self.show_buffer(buffer, Channel::Ch1, SHOWN_WINDOW);
                true
            }
            Err(failure) => {
                let context = format!("{source} trigger (decimation {decimation}, {frequency} Hz)");
                self.report_failure(&context, &failure, buffer, Some(frequency));
                false
            }
        }
    }
}
