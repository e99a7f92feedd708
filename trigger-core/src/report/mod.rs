//! Ordered pass/fail outcomes and their plain-text summary.

use core::fmt::{self, Write};

/// Verdict for one named sweep iteration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
}

impl TestOutcome {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }

    /// Status marker shown in front of the name.
    pub const fn marker(&self) -> &'static str {
        Self::marker_for(self.passed)
    }

    /// Marker for a pass/fail verdict, also used in progress logs.
    pub const fn marker_for(passed: bool) -> &'static str {
        if passed { "[OK]" } else { "[FAIL]" }
    }
}

/// Append-only outcome sequence kept in insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OutcomeLog {
    outcomes: Vec<TestOutcome>,
}

impl OutcomeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>, passed: bool) {
        self.outcomes.push(TestOutcome::new(name, passed));
    }

    /// Appends every outcome of `other`, preserving its order.
    pub fn merge(&mut self, other: OutcomeLog) {
        self.outcomes.extend(other.outcomes);
    }

    pub fn iter(&self) -> core::slice::Iter<'_, TestOutcome> {
        self.outcomes.iter()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn summary(&self) -> Summary {
        let passed = self.outcomes.iter().filter(|outcome| outcome.passed).count();
        Summary {
            total: self.outcomes.len(),
            passed,
            failed: self.outcomes.len() - passed,
        }
    }
}

impl<'a> IntoIterator for &'a OutcomeLog {
    type Item = &'a TestOutcome;
    type IntoIter = core::slice::Iter<'a, TestOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for OutcomeLog {
    type Item = TestOutcome;
    type IntoIter = std::vec::IntoIter<TestOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// Totals over an [`OutcomeLog`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} Passed: {} Failed: {}",
            self.total, self.passed, self.failed
        )
    }
}

/// Writes one line per outcome followed by the totals line.
///
/// # Errors
///
/// Propagates failures from `out`.
pub fn render<W: Write>(log: &OutcomeLog, out: &mut W) -> fmt::Result {
    for outcome in log {
        writeln!(out, "{} {}", outcome.marker(), outcome.name)?;
    }
    writeln!(out, "{}", log.summary())
}
