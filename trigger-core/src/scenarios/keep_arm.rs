//! Keep arm: with keep-alive set, writing continues after the buffer fills
//! while the trigger pointer stays latched.

use heapless::Vec as HeaplessVec;
use tracing::{debug, warn};

use super::{ScenarioRunner, SetupError, Stimulus, Sweep};
use crate::acquisition::{CaptureError, CaptureSettings, PointerPair};
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, DeviceModel, SignalGenerator,
    TriggerSource,
};
use crate::sweep::SweepPlanner;

/// Stimulus amplitude, in volts.
pub const KEEP_ARM_AMPLITUDE: f32 = 0.9;
/// Upper bound on pointer samples taken after each capture.
pub const MAX_POINTER_POLLS: usize = 16;

/// Decimation window and stimulus frequency for one device class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeepArmWindow {
    pub min_decimation: u32,
    pub max_decimation: u32,
    pub frequency: u32,
}

impl KeepArmWindow {
    pub const STANDARD: KeepArmWindow = KeepArmWindow {
        min_decimation: 8_192,
        max_decimation: 65_536,
        frequency: 100,
    };

    pub const LOW_RESOLUTION: KeepArmWindow = KeepArmWindow {
        min_decimation: 16,
        max_decimation: 4_096,
        frequency: 100_000,
    };

    #[must_use]
    pub const fn for_model(model: DeviceModel) -> Self {
        match model {
            DeviceModel::Standard => Self::STANDARD,
            DeviceModel::LowResolution => Self::LOW_RESOLUTION,
        }
    }

    /// Narrows `planner` to this window.
    pub fn planner(&self, planner: &SweepPlanner) -> Option<SweepPlanner> {
        planner.within(self.min_decimation, self.max_decimation)
    }
}

type PointerSamples = HeaplessVec<PointerPair, MAX_POINTER_POLLS>;

impl<A, G, K, C> ScenarioRunner<A, G, K, C>
where
    A: AcquisitionDevice,
    G: SignalGenerator,
    K: CalibrationStore,
    C: Clock,
{
    pub(super) fn run_keep_arm(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        let window = KeepArmWindow::for_model(self.profile.model);
        let Some(planner) = window.planner(&self.planner) else {
            debug!(
                "keep arm: decimations {}..={} are outside the planned range",
                window.min_decimation, window.max_decimation
            );
            return Ok(());
        };

        self.drive(Stimulus::sine(window.frequency, KEEP_ARM_AMPLITUDE));
        self.acquisition.configure(
            CaptureSettings::new(
                window.min_decimation,
                Channel::Ch1,
                0.0,
                self.profile.buffer_capacity / 2,
            )
            .with_keep_armed(true),
        );
        sweep.absorb_setup(self.acquisition.take_status());

        let mut terminal: Option<u32> = None;
        for decimation in planner.decimations() {
            let name = format!("Keep arm test. Decimate: {decimation}");
            self.announce(&name);

            let passed = match self.keep_armed_capture(decimation) {
                Ok(Some(samples)) => {
                    let fresh = match (terminal, samples.first()) {
                        (Some(previous), Some(first)) if first.trigger == previous => {
                            warn!("keep arm: trigger pointer {previous} repeated across decimations");
                            false
                        }
                        _ => true,
                    };
                    terminal = samples.last().map(|pair| pair.trigger);
                    fresh && pointers_keep_arm(&samples)
                }
                Ok(None) => false,
                Err(error) => {
                    warn!("keep arm: decimation {decimation}: {error}");
                    false
                }
            };
            let passed = self.registers_ok() && passed;

            if sweep.record(name, passed).is_break() {
                break;
            }
        }

        self.acquisition.stop();
        sweep.absorb_setup(self.acquisition.take_status());
        Ok(())
    }

    /// Captures once, then samples the pointers while the device keeps writing.
    ///
    /// Returns `None` when a pointer read failed.
    fn keep_armed_capture(&mut self, decimation: u32) -> Result<Option<PointerSamples>, CaptureError> {
        self.acquisition.set_decimation(decimation)?;
        self.acquisition.disarm_trigger();
        self.acquisition.arm()?;
        self.acquisition.set_trigger_source(TriggerSource::ChARising)?;
        self.acquisition.wait_triggered()?;
        self.acquisition.wait_filled()?;

        let polls = self.timing.keep_arm_polls.min(MAX_POINTER_POLLS - 1);
        let interval = self.timing.keep_arm_poll_interval;
        let mut samples = PointerSamples::new();
        for index in 0..=polls {
            let Some(pair) = self.acquisition.pointers() else {
                return Ok(None);
            };
            // `polls` is capped below the capacity.
            let _ = samples.push(pair);
            if index < polls {
                self.acquisition.clock_mut().sleep(interval);
            }
        }
        Ok(Some(samples))
    }
}

/// Checks that every poll saw the write pointer move and the trigger pointer
/// hold still.
fn pointers_keep_arm(samples: &[PointerPair]) -> bool {
    samples.windows(2).all(|pair| {
        let [before, after] = [pair[0], pair[1]];
        if after.write == before.write {
            warn!("keep arm: write pointer stuck at {}", after.write);
            return false;
        }
        if after.trigger != before.trigger {
            warn!(
                "keep arm: trigger pointer moved from {} to {}",
                before.trigger, after.trigger
            );
            return false;
        }
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProfile;

    fn pair(trigger: u32, write: u32) -> PointerPair {
        PointerPair { trigger, write }
    }

    #[test]
    fn advancing_write_with_latched_trigger_passes() {
        let samples = [pair(40, 8_232), pair(40, 8_744), pair(40, 9_256)];
        assert!(pointers_keep_arm(&samples));
    }

    #[test]
    fn stuck_write_or_moving_trigger_fails() {
        assert!(!pointers_keep_arm(&[pair(40, 8_232), pair(40, 8_232)]));
        assert!(!pointers_keep_arm(&[pair(40, 8_232), pair(41, 8_744)]));
    }

    #[test]
    fn window_narrows_the_shared_planner() {
        let planner = SweepPlanner::new(DeviceProfile::STANDARD);
        let narrowed = KeepArmWindow::STANDARD.planner(&planner).unwrap();
        assert_eq!(narrowed.decimations().first(), Some(&8_192));

        let short = planner.with_decimation_range(1, 1_024);
        assert_eq!(KeepArmWindow::STANDARD.planner(&short), None);
        assert_eq!(
            KeepArmWindow::LOW_RESOLUTION
                .planner(&short)
                .map(|planner| planner.decimation_range()),
            Some((16, 1_024))
        );
    }
}
