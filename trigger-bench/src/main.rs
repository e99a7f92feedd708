mod console;

use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use thiserror::Error;
use tracing::{Level, error, info};
use trigger_core::device::{DeviceProfile, MIN_DECIMATION};
use trigger_core::options::{self, BenchOptions, OptionsError};
use trigger_core::scenarios::{RunPolicy, ScenarioRunner, Session, SessionError, SetupError};
use trigger_core::sim::{SimAcquisition, SimCalibration, SimGenerator, SimulatedBench, VirtualClock};
use trigger_core::sweep::SweepPlanner;

const USAGE_EXIT: u8 = 2;

#[derive(Debug, Error)]
enum BenchError {
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("bench setup failed: {0}")]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("cannot write to stdout: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or("trigger-bench", String::as_str);

    match run(program, args.iter().skip(1).map(String::as_str)) {
        Ok(code) => ExitCode::from(code),
        Err(BenchError::Options(err)) => {
            eprintln!("{err}");
            eprint!("{}", options::help_text(program, true));
            ExitCode::from(USAGE_EXIT)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run<'a>(program: &str, args: impl IntoIterator<Item = &'a str>) -> Result<u8, BenchError> {
    let options = options::parse_args(args)?;
    let profile = DeviceProfile::for_model(options.model);

    if options.help {
        let text = options::help_text(program, profile.has_stimulus_outputs());
        io::stdout().lock().write_all(text.as_bytes())?;
        return Ok(0);
    }

    init_tracing(options.verbose);

    let mut runner = build_runner(&options, profile);
    runner.prepare(options.debug_registers)?;
    info!(
        "running {} scenario(s) against a simulated {} board",
        options.scenarios.len(),
        profile.model
    );

    match Session::run(&mut runner, &options.scenarios) {
        Ok(report) => {
            console::print_summary(&report.outcomes)?;
            Ok(report.exit_code())
        }
        Err(err) => {
            console::print_summary(&err.outcomes)?;
            Err(err.into())
        }
    }
}

type SimRunner = ScenarioRunner<SimAcquisition, SimGenerator, SimCalibration, VirtualClock>;

fn build_runner(options: &BenchOptions, profile: DeviceProfile) -> SimRunner {
    let mut planner = SweepPlanner::new(profile);
    if let Some(max) = options.max_decimation {
        planner = planner.with_decimation_range(MIN_DECIMATION, max);
    }

    let bench = SimulatedBench::new(profile);
    ScenarioRunner::new(
        bench.acquisition,
        bench.generator,
        bench.calibration,
        VirtualClock::default(),
        planner,
    )
    .with_policy(RunPolicy {
        verbose: options.verbose,
        show_buffer: options.show_buffer,
        stop_on_fail: options.stop_on_fail,
    })
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
