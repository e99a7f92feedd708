use core::time::Duration;

use trigger_core::acquisition::{
    AcquisitionController, CaptureError, CapturePhase, CaptureSettings, Observation,
};
use trigger_core::buffer::{CalibrationMode, CaptureBuffer};
use trigger_core::device::{Channel, DeviceProfile, TriggerSource, TriggerState};
use trigger_core::scenarios::{RunPolicy, ScenarioKind, ScenarioReport, ScenarioRunner};
use trigger_core::sim::{
    CalibrationParams, SimAcquisition, SimCalibration, SimFault, SimGenerator, SimProbe,
    SimulatedBench, VirtualClock,
};
use trigger_core::sweep::SweepPlanner;

type SimRunner = ScenarioRunner<SimAcquisition, SimGenerator, SimCalibration, VirtualClock>;

const VERBOSE: RunPolicy = RunPolicy {
    verbose: true,
    show_buffer: false,
    stop_on_fail: false,
};

fn runner(profile: DeviceProfile, decimations: (u32, u32), tick: Duration) -> (SimRunner, SimProbe) {
    let bench = SimulatedBench::new(profile);
    let planner = SweepPlanner::new(profile).with_decimation_range(decimations.0, decimations.1);
    let runner = ScenarioRunner::new(
        bench.acquisition,
        bench.generator,
        bench.calibration,
        VirtualClock::new(tick),
        planner,
    )
    .with_policy(VERBOSE);
    (runner, bench.probe)
}

fn standard(decimations: (u32, u32)) -> (SimRunner, SimProbe) {
    runner(DeviceProfile::STANDARD, decimations, Duration::from_micros(100))
}

#[test]
fn trigger_position_passes_on_loopback() {
    let (mut runner, probe) = standard((4_096, 4_096));

    let report = runner
        .run(ScenarioKind::TriggerPosition)
        .expect("scenario should run");

    assert!(!report.failed, "outcomes: {:?}", report.outcomes);
    assert!(!report.outcomes.is_empty());
    assert!(report.outcomes.iter().all(|outcome| outcome.passed));
    let first = report.outcomes.iter().next().expect("at least one outcome");
    assert_eq!(first.name, "Trigger position test. Decimate: 4096. Signal freq: 305");
    assert_eq!(
        probe.inspect(|state| state.calibration()),
        CalibrationParams::FACTORY,
        "calibration must be restored after the sweep"
    );
}

#[test]
fn trigger_delay_counts_every_delay() {
    let (mut runner, _probe) = standard((1, 1));

    let report = runner
        .run(ScenarioKind::TriggerDelay)
        .expect("scenario should run");

    assert!(!report.failed, "outcomes: {:?}", report.outcomes);
    let names: Vec<&str> = report
        .outcomes
        .iter()
        .map(|outcome| outcome.name.as_str())
        .collect();
    assert_eq!(names.len(), 11);
    assert_eq!(names[0], "Testing trigger delay. Delay: 1 Decimate: 1");
    assert_eq!(names[10], "Testing trigger delay. Delay: 1024 Decimate: 1");
}

#[test]
fn trigger_delay_is_skipped_on_low_resolution_model() {
    let (mut runner, _probe) = runner(
        DeviceProfile::LOW_RESOLUTION,
        (1, 1),
        Duration::from_micros(100),
    );

    let report = runner
        .run(ScenarioKind::TriggerDelay)
        .expect("scenario should run");

    assert!(report.passed());
    assert!(report.outcomes.is_empty());
}

#[test]
fn setting_now_moves_pointers_after_override() {
    let (mut runner, probe) = standard((1, 1));

    let report = runner
        .run(ScenarioKind::TriggerSettingNow)
        .expect("scenario should run");

    assert!(!report.failed, "outcomes: {:?}", report.outcomes);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(
        report.outcomes.iter().next().map(|outcome| outcome.name.as_str()),
        Some("Trigger Reset Lock Testing. Decimate: 1")
    );
    assert_eq!(probe.inspect(|state| state.trigger_source()), TriggerSource::Disabled);
}

#[test]
fn keep_arm_latches_trigger_while_writing() {
    let (mut runner, _probe) = standard((8_192, 8_192));

    let report = runner.run(ScenarioKind::KeepArm).expect("scenario should run");

    assert!(!report.failed, "outcomes: {:?}", report.outcomes);
    let names: Vec<&str> = report
        .outcomes
        .iter()
        .map(|outcome| outcome.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "Keep arm test. Decimate: 8192",
            "Keep arm test. Decimate: 8193",
            "Keep arm test. Decimate: 8194",
            "Keep arm test. Decimate: 8195",
            "Keep arm test. Decimate: 8196",
        ]
    );
}

fn verdicts(report: &ScenarioReport) -> Vec<bool> {
    report.outcomes.iter().map(|outcome| outcome.passed).collect()
}

#[test]
fn setting_now_fails_when_forced_trigger_is_ignored() {
    let (mut runner, probe) = standard((1, 2));
    probe.set_fault(Some(SimFault::IgnoreNow));

    let report = runner
        .run(ScenarioKind::TriggerSettingNow)
        .expect("scenario should run");

    assert!(report.failed);
    assert!(!report.aborted);
    assert_eq!(verdicts(&report), vec![false, false]);
}

#[test]
fn setting_now_fails_when_trigger_pointer_repeats() {
    let (mut runner, probe) = standard((1, 2));
    probe.set_fault(Some(SimFault::StaleTriggerPointer));

    let report = runner
        .run(ScenarioKind::TriggerSettingNow)
        .expect("scenario should run");

    assert!(report.failed);
    assert_eq!(verdicts(&report), vec![true, false]);
}

#[test]
fn keep_arm_fails_when_writing_stops_after_fill() {
    let (mut runner, probe) = standard((8_192, 8_192));
    probe.set_fault(Some(SimFault::IgnoreKeepArm));

    let report = runner.run(ScenarioKind::KeepArm).expect("scenario should run");

    assert!(report.failed);
    assert_eq!(verdicts(&report), vec![false; 5]);
}

#[test]
fn keep_arm_fails_when_trigger_pointer_survives_rearm() {
    let (mut runner, probe) = standard((8_192, 8_192));
    probe.set_fault(Some(SimFault::StaleTriggerPointer));

    let report = runner.run(ScenarioKind::KeepArm).expect("scenario should run");

    assert!(report.failed);
    assert_eq!(verdicts(&report), vec![true, false, false, false, false]);
}

#[test]
fn keep_arm_outside_planned_range_runs_nothing() {
    let (mut runner, _probe) = standard((1, 1_024));

    let report = runner.run(ScenarioKind::KeepArm).expect("scenario should run");

    assert!(report.passed());
    assert!(report.outcomes.is_empty());
}

#[test]
fn noise_immunity_passes_and_quiets_indicators() {
    let (mut runner, probe) = standard((4_096, 4_096));
    assert!(probe.inspect(|state| state.indicators_on()));

    let report = runner
        .run(ScenarioKind::NoiseImmunity)
        .expect("scenario should run");

    assert!(!report.failed, "outcomes: {:?}", report.outcomes);
    assert!(!report.outcomes.is_empty());
    assert!(!probe.inspect(|state| state.indicators_on()));
    assert_eq!(probe.inspect(|state| state.calibration()), CalibrationParams::FACTORY);
}

#[test]
fn rejected_register_write_fails_every_iteration_without_aborting() {
    let (mut runner, probe) = standard((1, 1));
    probe.set_fault(Some(SimFault::Reject("set_decimation")));

    let report = runner
        .run(ScenarioKind::TriggerDelay)
        .expect("register failures are not setup failures");

    assert!(report.failed);
    assert!(!report.aborted);
    assert_eq!(report.outcomes.len(), 11);
    assert!(report.outcomes.iter().all(|outcome| !outcome.passed));
}

#[test]
fn missing_trigger_fails_the_iteration_and_stops_when_asked() {
    let (runner, probe) = runner(
        DeviceProfile::STANDARD,
        (4_096, 4_096),
        Duration::from_millis(100),
    );
    let mut runner = runner.with_policy(RunPolicy {
        stop_on_fail: true,
        ..RunPolicy::default()
    });
    probe.set_fault(Some(SimFault::NeverTrigger));

    let report = runner
        .run(ScenarioKind::TriggerPosition)
        .expect("timeouts are not setup failures");

    assert!(report.failed);
    assert!(report.aborted);
    assert_eq!(report.outcomes.len(), 1);
    assert!(!report.outcomes.iter().any(|outcome| outcome.passed));
}

#[test]
fn bench_without_generator_outputs_skips_every_scenario() {
    let profile = DeviceProfile {
        dac_channels: 1,
        ..DeviceProfile::STANDARD
    };
    let (mut runner, _probe) = runner(profile, (1, 1), Duration::from_micros(100));

    for kind in ScenarioKind::ALL {
        let report = runner.run(kind).expect("skipped scenarios still report");
        assert!(report.passed(), "{kind} should pass when skipped");
        assert!(report.outcomes.is_empty());
    }
}

#[test]
fn prepare_enables_debug_registers_and_checks_calibration() {
    let (mut runner, probe) = standard((1, 1));
    runner.prepare(true).expect("healthy bench prepares");
    assert!(probe.inspect(|state| state.debug_registers()));

    probe.set_fault(Some(SimFault::Reject("calibration_current")));
    let error = runner.prepare(false).unwrap_err();
    assert_eq!(
        error.to_string(),
        "calibration store unavailable: calibration_current rejected by device (code -1)"
    );
}

#[test]
fn never_triggering_board_times_out_in_trigger_phase() {
    let bench = SimulatedBench::new(DeviceProfile::STANDARD);
    bench.probe.set_fault(Some(SimFault::NeverTrigger));
    let mut controller = AcquisitionController::new(
        bench.acquisition,
        VirtualClock::new(Duration::from_millis(100)),
        &DeviceProfile::STANDARD,
    );
    let mut buffer = CaptureBuffer::for_profile(&DeviceProfile::STANDARD, CalibrationMode::Raw)
        .expect("buffer allocates");

    let error = controller
        .capture(
            CaptureSettings::new(64, Channel::Ch1, 0.0, 8_192),
            TriggerSource::ChARising,
            &mut buffer,
        )
        .unwrap_err();

    assert_eq!(
        error,
        CaptureError::Timeout {
            phase: CapturePhase::Trigger,
            last_observed: Some(Observation::Trigger(TriggerState::Idle)),
        }
    );
}

#[test]
fn frozen_pretrigger_counter_times_out_while_arming() {
    let bench = SimulatedBench::new(DeviceProfile::STANDARD);
    bench.probe.set_fault(Some(SimFault::FrozenPretrigger));
    let mut controller = AcquisitionController::new(
        bench.acquisition,
        VirtualClock::new(Duration::from_millis(100)),
        &DeviceProfile::STANDARD,
    );

    controller.configure(CaptureSettings::new(1, Channel::Ch1, 0.0, 8_192));
    let error = controller.arm().unwrap_err();

    assert_eq!(
        error,
        CaptureError::Timeout {
            phase: CapturePhase::PreTrigger,
            last_observed: Some(Observation::PreTriggerCount(0)),
        }
    );
}
