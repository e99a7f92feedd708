//! Session summary on the terminal.

use std::io::{self, Write};

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use trigger_core::report::{self, OutcomeLog};

/// Prints every outcome and the totals, colored when stdout is a terminal.
pub fn print_summary(log: &OutcomeLog) -> io::Result<()> {
    let stdout = io::stdout();
    if !stdout.is_tty() {
        let mut text = String::new();
        report::render(log, &mut text).map_err(io::Error::other)?;
        return stdout.lock().write_all(text.as_bytes());
    }

    let mut writer = stdout.lock();
    for outcome in log {
        let marker = if outcome.passed {
            outcome.marker().green()
        } else {
            outcome.marker().red()
        };
        writeln!(writer, "{marker} {}", outcome.name)?;
    }

    let summary = log.summary();
    let totals = summary.to_string();
    if summary.failed == 0 {
        writeln!(writer, "{}", totals.bold())?;
    } else {
        writeln!(writer, "{}", totals.bold().red())?;
    }
    writer.flush()
}
