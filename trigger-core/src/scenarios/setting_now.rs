//! Trigger setting now: forcing `NOW` after a completed capture re-triggers.
//!
//! The device is configured once and only the decimation changes between
//! iterations, so a reset between captures cannot mask a latched trigger.

use tracing::warn;

use super::{ScenarioRunner, SetupError, Stimulus, Sweep};
use crate::acquisition::{CaptureError, CaptureSettings, PointerPair};
use crate::device::{
    AcquisitionDevice, CalibrationStore, Channel, Clock, MIN_DECIMATION, SignalGenerator,
    TriggerSource,
};

/// Stimulus frequency for every decimation.
pub const SETTING_NOW_FREQUENCY: u32 = 1_000;
/// Stimulus amplitude, in volts.
pub const SETTING_NOW_AMPLITUDE: f32 = 0.9;

impl<A, G, K, C> ScenarioRunner<A, G, K, C>
where
    A: AcquisitionDevice,
    G: SignalGenerator,
    K: CalibrationStore,
    C: Clock,
{
    pub(super) fn run_setting_now(&mut self, sweep: &mut Sweep) -> Result<(), SetupError> {
        self.drive(Stimulus::sine(SETTING_NOW_FREQUENCY, SETTING_NOW_AMPLITUDE));
        self.acquisition.configure(CaptureSettings::new(
            MIN_DECIMATION,
            Channel::Ch1,
            0.0,
            self.profile.buffer_capacity / 2,
        ));
        sweep.absorb_setup(self.acquisition.take_status());

        let mut previous: Option<PointerPair> = None;
        for decimation in self.planner.decimations() {
            let name = format!("Trigger Reset Lock Testing. Decimate: {decimation}");
            self.announce(&name);

            let observed = self.force_after_capture(decimation);
            let passed = match observed {
                Ok(None) => false,
                Ok(Some((pre, post))) => {
                    let fresh = stale_component(previous, pre).is_none();
                    let moved = post != pre;
                    if !moved {
                        warn!("setting now: pointers did not move after NOW ({pre})");
                    }
                    previous = Some(pre);
                    fresh && moved
                }
                Err(error) => {
                    warn!("setting now: decimation {decimation}: {error}");
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

    /// Captures on a rising edge, then forces `NOW` and returns the pointers
    /// read before and after the override, or `None` when a read failed.
    fn force_after_capture(
        &mut self,
        decimation: u32,
    ) -> Result<Option<(PointerPair, PointerPair)>, CaptureError> {
        self.acquisition.set_decimation(decimation)?;
        self.acquisition.arm()?;
        self.acquisition.set_trigger_source(TriggerSource::ChARising)?;
        self.acquisition.wait_triggered()?;
        self.acquisition.wait_filled()?;

        let pre = self.acquisition.pointers();
        self.acquisition.force_trigger_now()?;
        let settle = self.timing.now_settle;
        self.acquisition.clock_mut().sleep(settle);
        let post = self.acquisition.pointers();

        Ok(pre.zip(post))
    }
}

/// Names the pointer of `current` that repeats the previous iteration's value.
fn stale_component(previous: Option<PointerPair>, current: PointerPair) -> Option<&'static str> {
    let previous = previous?;
    if current.trigger == previous.trigger {
        warn!("setting now: trigger pointer {} repeated", current.trigger);
        return Some("trigger");
    }
    if current.write == previous.write {
        warn!("setting now: write pointer {} repeated", current.write);
        return Some("write");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(trigger: u32, write: u32) -> PointerPair {
        PointerPair { trigger, write }
    }

    #[test]
    fn first_iteration_is_never_stale() {
        assert_eq!(stale_component(None, pair(1, 2)), None);
    }

    #[test]
    fn either_repeated_pointer_is_stale() {
        let previous = Some(pair(100, 8_292));
        assert_eq!(stale_component(previous, pair(100, 9_000)), Some("trigger"));
        assert_eq!(stale_component(previous, pair(700, 8_292)), Some("write"));
        assert_eq!(stale_component(previous, pair(700, 9_000)), None);
    }
}
