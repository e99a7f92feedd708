//! Command-line grammar for the bench.
//!
//! Each argv token is parsed on its own with `winnow` and must be consumed
//! completely, so `-t12` or `-ab` are rejected rather than read as prefixes.

use core::fmt::Write as _;

use thiserror::Error;
use winnow::ascii::digit1;
use winnow::combinator::{alt, preceded};
use winnow::prelude::*;
use winnow::token::rest;

use crate::device::DeviceModel;
use crate::scenarios::{ScenarioKind, ScenarioSelection};

const MODEL_PREFIX: &str = "--model=";
const MAX_DECIMATION_PREFIX: &str = "--max-decimation=";
const SCENARIO_PREFIX: &str = "-t";

/// Settings gathered from the command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BenchOptions {
    pub scenarios: ScenarioSelection,
    pub debug_registers: bool,
    pub show_buffer: bool,
    pub stop_on_fail: bool,
    pub verbose: bool,
    pub help: bool,
    pub model: DeviceModel,
    /// Upper bound on the swept decimation factors.
    pub max_decimation: Option<u32>,
}

/// Rejected command-line token.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("unrecognized argument `{argument}`")]
    Unrecognized { argument: String },
    #[error("invalid value in `{argument}`, expected {expected}")]
    InvalidValue {
        argument: String,
        expected: &'static str,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Flag {
    Scenario(ScenarioKind),
    All,
    DebugRegisters,
    ShowBuffer,
    StopOnFail,
    Verbose,
    Help,
    Model(DeviceModel),
    MaxDecimation(u32),
}

fn scenario(input: &mut &str) -> ModalResult<ScenarioKind> {
    preceded(SCENARIO_PREFIX, digit1.try_map(str::parse::<u8>))
        .verify_map(ScenarioKind::from_number)
        .parse_next(input)
}

fn model(input: &mut &str) -> ModalResult<DeviceModel> {
    preceded(MODEL_PREFIX, rest.verify_map(DeviceModel::from_tag)).parse_next(input)
}

fn max_decimation(input: &mut &str) -> ModalResult<u32> {
    preceded(
        MAX_DECIMATION_PREFIX,
        digit1
            .try_map(str::parse::<u32>)
            .verify(|factor: &u32| *factor > 0),
    )
    .parse_next(input)
}

fn flag(input: &mut &str) -> ModalResult<Flag> {
    alt((
        scenario.map(Flag::Scenario),
        "-a".value(Flag::All),
        "-d".value(Flag::DebugRegisters),
        "-b".value(Flag::ShowBuffer),
        "-s".value(Flag::StopOnFail),
        "-v".value(Flag::Verbose),
        alt(("--help", "-h")).value(Flag::Help),
        model.map(Flag::Model),
        max_decimation.map(Flag::MaxDecimation),
    ))
    .parse_next(input)
}

/// Builds the error for a token that did not parse as a whole.
fn rejected(argument: &str) -> OptionsError {
    let valued = [
        (SCENARIO_PREFIX, "a scenario number from 1 to 5"),
        (MODEL_PREFIX, "`standard` or `low-res`"),
        (MAX_DECIMATION_PREFIX, "a positive decimation factor"),
    ];
    valued
        .iter()
        .find(|(prefix, _)| argument.starts_with(prefix))
        .map_or_else(
            || OptionsError::Unrecognized {
                argument: argument.to_owned(),
            },
            |&(_, expected)| OptionsError::InvalidValue {
                argument: argument.to_owned(),
                expected,
            },
        )
}

/// Parses the arguments that follow the program name.
///
/// An empty argument list requests help.
///
/// # Errors
///
/// Returns [`OptionsError`] for the first token that is not a known flag.
pub fn parse_args<'a, I>(args: I) -> Result<BenchOptions, OptionsError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut options = BenchOptions::default();
    let mut seen_any = false;

    for argument in args {
        seen_any = true;
        let parsed = flag.parse(argument).map_err(|_| rejected(argument))?;
        match parsed {
            Flag::Scenario(kind) => options.scenarios.insert(kind),
            Flag::All => options.scenarios = ScenarioSelection::all(),
            Flag::DebugRegisters => options.debug_registers = true,
            Flag::ShowBuffer => options.show_buffer = true,
            Flag::StopOnFail => options.stop_on_fail = true,
            Flag::Verbose => options.verbose = true,
            Flag::Help => options.help = true,
            Flag::Model(model) => options.model = model,
            Flag::MaxDecimation(factor) => options.max_decimation = Some(factor),
        }
    }

    options.help |= !seen_any;
    Ok(options)
}

/// Usage text, including the wiring the bench expects.
pub fn help_text(program: &str, has_stimulus_outputs: bool) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{program} [-t1] [-t2] [-t3] [-t4] [-t5] [-a] [-d] [-b] [-v] [-s] [--model=<standard|low-res>] [--max-decimation=<n>]"
    );
    if has_stimulus_outputs {
        text.push_str("For test need connect OUT1 -> IN1 and IN2 with 50 Ohm load\n");
    } else {
        text.push_str("For test need connect REF Sine signal 500 kHz 1V p-p -> IN1, IN2, IN3, IN4\n");
    }
    text.push('\n');
    for kind in ScenarioKind::ALL {
        let _ = writeln!(text, "\t-t{} : Start test {}", kind.number(), kind.label());
    }
    text.push_str(
        "\t-a : Start all test\n\
         \t-d : Enable debug register mode\n\
         \t-b : Show captured buffer\n\
         \t-s : Stop on fail\n\
         \t-v : Verbose output\n\
         \t--model=<standard|low-res> : Simulated device class\n\
         \t--max-decimation=<n> : Largest decimation swept\n",
    );
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<BenchOptions, OptionsError> {
        parse_args(args.iter().copied())
    }

    #[test]
    fn no_arguments_requests_help() {
        let options = parse(&[]).unwrap();
        assert!(options.help);
        assert!(options.scenarios.is_empty());
    }

    #[test]
    fn every_flag_is_accepted() {
        let options = parse(&[
            "-t5",
            "-t2",
            "-d",
            "-b",
            "-s",
            "-v",
            "--model=low-res",
            "--max-decimation=1024",
        ])
        .unwrap();

        assert_eq!(
            options,
            BenchOptions {
                scenarios: [ScenarioKind::TriggerDelay, ScenarioKind::NoiseImmunity]
                    .into_iter()
                    .collect(),
                debug_registers: true,
                show_buffer: true,
                stop_on_fail: true,
                verbose: true,
                help: false,
                model: DeviceModel::LowResolution,
                max_decimation: Some(1_024),
            }
        );
    }

    #[test]
    fn all_selects_every_scenario() {
        let options = parse(&["-t3", "-a"]).unwrap();
        assert_eq!(options.scenarios, ScenarioSelection::all());
        assert!(parse(&["--help"]).unwrap().help);
        assert!(parse(&["-v", "-h"]).unwrap().help);
    }

    #[test]
    fn unknown_and_partial_tokens_are_rejected() {
        assert_eq!(
            parse(&["-a", "-x"]),
            Err(OptionsError::Unrecognized {
                argument: "-x".into()
            })
        );
        assert_eq!(
            parse(&["-ab"]),
            Err(OptionsError::Unrecognized {
                argument: "-ab".into()
            })
        );
    }

    #[test]
    fn bad_values_name_the_expected_form() {
        assert_eq!(
            parse(&["-t6"]),
            Err(OptionsError::InvalidValue {
                argument: "-t6".into(),
                expected: "a scenario number from 1 to 5",
            })
        );
        assert!(matches!(
            parse(&["--model=mystery"]),
            Err(OptionsError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse(&["--max-decimation=0"]),
            Err(OptionsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn help_lists_every_scenario() {
        let text = help_text("trigger-bench", true);
        assert!(text.starts_with("trigger-bench [-t1]"));
        assert!(text.contains("OUT1 -> IN1 and IN2"));
        assert!(text.contains("\t-t4 : Start test keep arm\n"));
    }
}
