//! Deterministic decimation, frequency, and delay sweeps.
//!
//! Every scenario draws its test matrix from [`SweepPlanner`]. Decimations
//! double from 1 to 65536, and from 16 upward each power of two is followed
//! by four off-nominal neighbours so register decoding is probed beyond the
//! power-of-two values firmware usually writes.

use std::collections::BTreeMap;

use crate::device::{DeviceProfile, MAX_DECIMATION, MIN_DECIMATION};

/// Smallest decimation that receives boundary probes.
pub const BOUNDARY_PROBE_FLOOR: u32 = 16;
/// Number of `factor + n` probes inserted after each qualifying factor.
pub const BOUNDARY_PROBES: u32 = 4;
/// Largest trigger delay exercised by the delay sweep.
pub const MAX_SWEEP_DELAY: u32 = 1_024;

/// Shape of a frequency sweep for one scenario.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SweepConfig {
    /// Fewest samples per stimulus period; bounds the highest frequency.
    pub min_points_per_period: u32,
    /// Most samples per stimulus period; bounds the lowest frequency.
    pub max_points_per_period: u32,
    pub steps: u32,
    /// Reduced step count used from `coarse_from` upward.
    pub coarse_steps: u32,
    pub coarse_from: u32,
}

impl SweepConfig {
    pub const TRIGGER_POSITION: SweepConfig = SweepConfig {
        min_points_per_period: 4,
        max_points_per_period: 100,
        steps: 25,
        coarse_steps: 6,
        coarse_from: 4_096,
    };

    pub const NOISE_IMMUNITY: SweepConfig = SweepConfig {
        min_points_per_period: 8,
        max_points_per_period: 100,
        steps: 25,
        coarse_steps: 6,
        coarse_from: 4_096,
    };

    /// Step count applied at `decimation`.
    #[must_use]
    pub const fn steps_for(&self, decimation: u32) -> u32 {
        if decimation >= self.coarse_from {
            self.coarse_steps
        } else {
            self.steps
        }
    }
}

/// Stimulus frequencies to exercise, keyed by decimation in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrequencyPlan {
    entries: BTreeMap<u32, Vec<u32>>,
}

impl FrequencyPlan {
    pub fn get(&self, decimation: u32) -> Option<&[u32]> {
        self.entries.get(&decimation).map(Vec::as_slice)
    }

    /// Iterates `(decimation, frequencies)` pairs in ascending decimation.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u32])> + '_ {
        self.entries
            .iter()
            .map(|(decimation, frequencies)| (*decimation, frequencies.as_slice()))
    }

    /// Number of decimations in the plan.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of `(decimation, frequency)` points.
    pub fn point_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Builds the sweep matrix for a given device.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepPlanner {
    profile: DeviceProfile,
    min_decimation: u32,
    max_decimation: u32,
}

impl SweepPlanner {
    /// Planner spanning the full decimation range of `profile`.
    #[must_use]
    pub const fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            min_decimation: MIN_DECIMATION,
            max_decimation: MAX_DECIMATION,
        }
    }

    /// Restricts the nominal decimations to `[min, max]`.
    ///
    /// Boundary probes follow their nominal factor, so `max + 1..=max + 4`
    /// may still appear when `max` qualifies for probes.
    #[must_use]
    pub fn with_decimation_range(mut self, min: u32, max: u32) -> Self {
        self.min_decimation = min.clamp(MIN_DECIMATION, MAX_DECIMATION);
        self.max_decimation = max.clamp(self.min_decimation, MAX_DECIMATION);
        self
    }

    /// Intersects the nominal range with `[min, max]`, or `None` when disjoint.
    #[must_use]
    pub fn within(&self, min: u32, max: u32) -> Option<Self> {
        let low = self.min_decimation.max(min);
        let high = self.max_decimation.min(max);
        (low <= high).then(|| self.with_decimation_range(low, high))
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn decimation_range(&self) -> (u32, u32) {
        (self.min_decimation, self.max_decimation)
    }

    /// Ordered decimation factors, boundary probes included.
    #[must_use]
    pub fn decimations(&self) -> Vec<u32> {
        let mut factors = Vec::new();
        let mut factor = MIN_DECIMATION;
        while factor <= MAX_DECIMATION {
            if factor >= self.min_decimation && factor <= self.max_decimation {
                factors.push(factor);
                if factor >= BOUNDARY_PROBE_FLOOR && factor < MAX_DECIMATION {
                    factors.extend((1..=BOUNDARY_PROBES).map(|offset| factor + offset));
                }
            }
            factor *= 2;
        }
        factors
    }

    /// Lowest and one-past-highest stimulus frequency for `decimation`.
    #[must_use]
    pub fn frequency_bounds(&self, decimation: u32, config: &SweepConfig) -> (u32, u32) {
        let effective_rate = self.profile.sample_rate / decimation.max(1);
        let max = (effective_rate / config.min_points_per_period.max(1))
            .min(self.profile.dac_max_frequency)
            .max(1);
        let min = (effective_rate / config.max_points_per_period.max(1)).max(1);
        (min, max)
    }

    /// Frequencies for every planned decimation.
    #[must_use]
    pub fn frequency_plan(&self, config: &SweepConfig) -> FrequencyPlan {
        let floor = self.profile.model.frequency_floor();
        let mut entries = BTreeMap::new();

        for decimation in self.decimations() {
            let (min, max) = self.frequency_bounds(decimation, config);
            let step = ((max.saturating_sub(min)) / config.steps_for(decimation).max(1)).max(1);
            let frequencies = (min..max)
                .step_by(step as usize)
                .filter(|frequency| floor.is_none_or(|floor| *frequency >= floor))
                .collect();
            entries.insert(decimation, frequencies);
        }

        FrequencyPlan { entries }
    }

    /// Power-of-two trigger delays from 1 to [`MAX_SWEEP_DELAY`].
    #[must_use]
    pub fn delays(&self) -> Vec<u32> {
        core::iter::successors(Some(1_u32), |delay| delay.checked_mul(2))
            .take_while(|delay| *delay <= MAX_SWEEP_DELAY)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceModel;

    #[test]
    fn decimations_start_with_small_powers_of_two() {
        let planner = SweepPlanner::new(DeviceProfile::STANDARD);
        let factors = planner.decimations();
        assert_eq!(&factors[..6], &[1, 2, 4, 8, 16, 17]);
        assert_eq!(&factors[6..10], &[18, 19, 20, 32]);
        assert_eq!(factors.last(), Some(&MAX_DECIMATION));
    }

    #[test]
    fn top_factor_has_no_boundary_probes() {
        let factors = SweepPlanner::new(DeviceProfile::STANDARD).decimations();
        assert!(!factors.contains(&(MAX_DECIMATION + 1)));
        // 4 plain factors below 16, then 12 probed factors and 65536.
        assert_eq!(factors.len(), 4 + 12 * 5 + 1);
    }

    #[test]
    fn range_narrows_nominal_factors() {
        let planner = SweepPlanner::new(DeviceProfile::STANDARD).with_decimation_range(8_192, 65_536);
        assert_eq!(
            planner.decimations(),
            vec![
                8_192, 8_193, 8_194, 8_195, 8_196, 16_384, 16_385, 16_386, 16_387, 16_388, 32_768,
                32_769, 32_770, 32_771, 32_772, 65_536
            ]
        );
    }

    #[test]
    fn within_intersects_or_rejects_windows() {
        let planner = SweepPlanner::new(DeviceProfile::STANDARD).with_decimation_range(1, 16_384);
        let keep_arm = planner.within(8_192, 65_536).unwrap();
        assert_eq!(keep_arm.decimation_range(), (8_192, 16_384));

        let narrow = SweepPlanner::new(DeviceProfile::STANDARD).with_decimation_range(1, 4);
        assert_eq!(narrow.within(8_192, 65_536), None);
    }

    #[test]
    fn frequency_bounds_follow_points_per_period() {
        let planner = SweepPlanner::new(DeviceProfile::STANDARD);
        let (min, max) = planner.frequency_bounds(1, &SweepConfig::TRIGGER_POSITION);
        assert_eq!(min, 1_250_000);
        // 31.25 MHz clipped by the generator limit.
        assert_eq!(max, 17_000_000);

        let (min, max) = planner.frequency_bounds(65_536, &SweepConfig::TRIGGER_POSITION);
        assert_eq!(min, 19);
        assert_eq!(max, 476);
    }

    #[test]
    fn planned_frequencies_stay_within_bounds() {
        for profile in [DeviceProfile::STANDARD, DeviceProfile::LOW_RESOLUTION] {
            let planner = SweepPlanner::new(profile);
            for config in [SweepConfig::TRIGGER_POSITION, SweepConfig::NOISE_IMMUNITY] {
                let plan = planner.frequency_plan(&config);
                assert!(plan.point_count() > 0);
                for (decimation, frequencies) in plan.iter() {
                    let (min, max) = planner.frequency_bounds(decimation, &config);
                    assert!(max <= profile.dac_max_frequency, "d={decimation} max={max}");
                    for &frequency in frequencies {
                        assert!(
                            min <= frequency && frequency < max,
                            "d={decimation} f={frequency} bounds=({min}, {max})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn every_decimation_is_nominal_or_a_boundary_probe() {
        for profile in [DeviceProfile::STANDARD, DeviceProfile::LOW_RESOLUTION] {
            for factor in SweepPlanner::new(profile).decimations() {
                let nominal = factor.is_power_of_two() && factor <= MAX_DECIMATION;
                let probe_of = (1..=BOUNDARY_PROBES)
                    .filter_map(|offset| factor.checked_sub(offset))
                    .find(|base| base.is_power_of_two() && *base >= BOUNDARY_PROBE_FLOOR);
                assert!(
                    nominal || probe_of.is_some_and(|base| base < MAX_DECIMATION),
                    "unexpected decimation {factor}"
                );
            }
        }
    }

    #[test]
    fn coarse_steps_apply_at_high_decimation() {
        let config = SweepConfig::TRIGGER_POSITION;
        assert_eq!(config.steps_for(2_048), 25);
        assert_eq!(config.steps_for(4_096), 6);
    }

    #[test]
    fn low_resolution_model_skips_low_frequencies() {
        let planner = SweepPlanner::new(DeviceProfile::for_model(DeviceModel::LowResolution));
        let plan = planner.frequency_plan(&SweepConfig::TRIGGER_POSITION);
        assert!(plan.iter().flat_map(|(_, freqs)| freqs).all(|f| *f >= 100_000));
        assert_eq!(plan.get(65_536), Some(&[][..]));
    }

    #[test]
    fn delays_are_powers_of_two() {
        let delays = SweepPlanner::new(DeviceProfile::STANDARD).delays();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1_024]);
    }
}
