//! Outcome classification for differential test runs.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::profiles::TestOutcome;

/// Sentinel written by the eval script before the test command runs.
pub const TEST_OUTPUT_START: &str = ">>>>> Start Test Output";
/// Sentinel written after the test command finishes.
pub const TEST_OUTPUT_END: &str = ">>>>> End Test Output";

/// Extract the test-output window between the sentinels.
///
/// Returns `None` when either sentinel is missing: the harness crashed
/// before or during the test run and nothing in the log is trustworthy.
pub fn extract_test_window(raw: &str) -> Option<String> {
    let start = raw.find(TEST_OUTPUT_START)? + TEST_OUTPUT_START.len();
    let end = raw.find(TEST_OUTPUT_END)?;
    if start > end {
        return None;
    }
    Some(raw[start..end].to_string())
}

/// Differential classification of one candidate run against gold.
///
/// Key names match the canonical task-instance schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: Vec<String>,
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: Vec<String>,
    /// Set when the candidate run timed out; such reports never promote.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ValidationReport {
    /// A candidate is promotable iff it broke at least one test and left at
    /// least one passing as a regression witness.
    pub fn is_promotable(&self) -> bool {
        !self.timed_out && !self.fail_to_pass.is_empty() && !self.pass_to_pass.is_empty()
    }
}

/// Classify every test seen on either side of the differential.
///
/// Only tests passing on the clean tree carry signal: a candidate outcome
/// of fail/error is the defect signal (F2P) and pass is the regression
/// witness (P2P). Tests skipped or missing on the candidate side, tests
/// already broken on gold, and tests unknown to gold are all ignored as
/// noise.
pub fn classify(
    gold: &BTreeMap<String, TestOutcome>,
    candidate: &BTreeMap<String, TestOutcome>,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let names: BTreeSet<&String> = gold.keys().chain(candidate.keys()).collect();
    for name in names {
        let g = gold.get(name).copied().unwrap_or(TestOutcome::Missing);
        let c = candidate.get(name).copied().unwrap_or(TestOutcome::Missing);
        if g != TestOutcome::Pass {
            continue;
        }
        match c {
            TestOutcome::Fail | TestOutcome::Error => report.fail_to_pass.push(name.clone()),
            TestOutcome::Pass => report.pass_to_pass.push(name.clone()),
            TestOutcome::Skip | TestOutcome::Missing => {}
        }
    }
    report
}

/// Whether an agent's prediction resolved an instance: every F2P test now
/// passes and every P2P test still passes. A test missing from the eval run
/// counts as failed.
pub fn is_resolved(
    fail_to_pass: &[String],
    pass_to_pass: &[String],
    eval_outcomes: &BTreeMap<String, TestOutcome>,
) -> bool {
    let passed = |name: &String| eval_outcomes.get(name) == Some(&TestOutcome::Pass);
    fail_to_pass.iter().all(passed) && pass_to_pass.iter().all(passed)
}
