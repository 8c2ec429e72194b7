//! Test-log parsers.
//!
//! Each repository profile declares which test framework produced its logs;
//! the parser turns raw output into a `test name -> outcome` map. Lines the
//! parser cannot classify are counted; when too many lines are noise and no
//! result was extracted the whole report is unparseable and the candidate is
//! dropped upstream.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Outcome of a single test in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
    Error,
    Skip,
    /// The test did not appear on this side of the differential at all.
    Missing,
}

/// Which log format a profile's test command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogParserKind {
    Pytest,
    Jest,
    Vitest,
    CargoTest,
}

/// Result of parsing one log: outcomes plus noise accounting.
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub outcomes: BTreeMap<String, TestOutcome>,
    /// Non-empty lines that matched no parser rule.
    pub unclassified: usize,
    /// All non-empty lines seen.
    pub total_lines: usize,
}

impl ParsedLog {
    /// A report is unparseable when nothing was extracted, or when nearly
    /// every line was noise. Candidates with unparseable reports are never
    /// promoted.
    pub fn is_unparseable(&self) -> bool {
        if self.outcomes.is_empty() {
            return true;
        }
        if self.total_lines == 0 {
            return false;
        }
        (self.unclassified as f64 / self.total_lines as f64) > 0.9
    }
}

fn pytest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\S+)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)\s*").unwrap()
    })
}

fn jest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "  ✓ adds numbers (3 ms)" / "  ✕ breaks" / "  ○ skipped todo"
    RE.get_or_init(|| Regex::new(r"^\s*(✓|✔|✕|✗|×|○)\s+(.+?)(?:\s+\(\d+\s*m?s\))?\s*$").unwrap())
}

fn vitest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "✓ src/math.test.ts > add > adds numbers 5ms"
    RE.get_or_init(|| {
        Regex::new(r"^\s*(✓|✔|✕|✗|×|↓)\s+(.+?)(?:\s+\d+m?s)?\s*$").unwrap()
    })
}

fn cargo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^test\s+(\S+)\s+\.\.\.\s+(ok|FAILED|ignored)\s*$").unwrap())
}

/// Parse a raw test log into outcomes.
pub fn parse_log(kind: LogParserKind, log: &str) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    for line in log.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        parsed.total_lines += 1;
        let hit = match kind {
            LogParserKind::Pytest => parse_pytest_line(trimmed, &mut parsed.outcomes),
            LogParserKind::Jest => parse_symbol_line(jest_re(), trimmed, &mut parsed.outcomes),
            LogParserKind::Vitest => parse_symbol_line(vitest_re(), trimmed, &mut parsed.outcomes),
            LogParserKind::CargoTest => parse_cargo_line(trimmed, &mut parsed.outcomes),
        };
        if !hit {
            parsed.unclassified += 1;
        }
    }
    parsed
}

fn parse_pytest_line(line: &str, outcomes: &mut BTreeMap<String, TestOutcome>) -> bool {
    if let Some(caps) = pytest_re().captures(line) {
        let outcome = match &caps[2] {
            "PASSED" | "XPASS" => TestOutcome::Pass,
            "FAILED" => TestOutcome::Fail,
            "ERROR" => TestOutcome::Error,
            "SKIPPED" | "XFAIL" => TestOutcome::Skip,
            _ => return false,
        };
        outcomes.insert(caps[1].to_string(), outcome);
        return true;
    }
    false
}

fn parse_symbol_line(
    re: &Regex,
    line: &str,
    outcomes: &mut BTreeMap<String, TestOutcome>,
) -> bool {
    if let Some(caps) = re.captures(line) {
        let outcome = match &caps[1] {
            "✓" | "✔" => TestOutcome::Pass,
            "✕" | "✗" | "×" => TestOutcome::Fail,
            "○" | "↓" => TestOutcome::Skip,
            _ => return false,
        };
        outcomes.insert(caps[2].trim().to_string(), outcome);
        return true;
    }
    false
}

fn parse_cargo_line(line: &str, outcomes: &mut BTreeMap<String, TestOutcome>) -> bool {
    if let Some(caps) = cargo_re().captures(line) {
        let outcome = match &caps[2] {
            "ok" => TestOutcome::Pass,
            "FAILED" => TestOutcome::Fail,
            "ignored" => TestOutcome::Skip,
            _ => return false,
        };
        outcomes.insert(caps[1].to_string(), outcome);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pytest_outcomes() {
        let log = "\
tests/test_add.py::test_add_adds PASSED
tests/test_add.py::test_add_is_function PASSED
tests/test_add.py::test_add_negative FAILED
tests/test_add.py::test_weird ERROR
tests/test_add.py::test_later SKIPPED
=== 2 passed, 1 failed in 0.12s ===";
        let parsed = parse_log(LogParserKind::Pytest, log);
        assert_eq!(
            parsed.outcomes["tests/test_add.py::test_add_adds"],
            TestOutcome::Pass
        );
        assert_eq!(
            parsed.outcomes["tests/test_add.py::test_add_negative"],
            TestOutcome::Fail
        );
        assert_eq!(
            parsed.outcomes["tests/test_add.py::test_weird"],
            TestOutcome::Error
        );
        assert_eq!(
            parsed.outcomes["tests/test_add.py::test_later"],
            TestOutcome::Skip
        );
        assert!(!parsed.is_unparseable());
    }

    #[test]
    fn jest_outcomes() {
        let log = "\
PASS src/add.test.js
  ✓ add adds (2 ms)
  ✕ add subtracts
  ○ skipped add todo";
        let parsed = parse_log(LogParserKind::Jest, log);
        assert_eq!(parsed.outcomes["add adds"], TestOutcome::Pass);
        assert_eq!(parsed.outcomes["add subtracts"], TestOutcome::Fail);
        assert_eq!(parsed.outcomes["skipped add todo"], TestOutcome::Skip);
    }

    #[test]
    fn vitest_outcomes() {
        let log = "\
 ✓ src/math.test.ts > add > adds numbers 5ms
 × src/math.test.ts > add > overflows";
        let parsed = parse_log(LogParserKind::Vitest, log);
        assert_eq!(
            parsed.outcomes["src/math.test.ts > add > adds numbers"],
            TestOutcome::Pass
        );
        assert_eq!(
            parsed.outcomes["src/math.test.ts > add > overflows"],
            TestOutcome::Fail
        );
    }

    #[test]
    fn cargo_outcomes() {
        let log = "\
running 3 tests
test hash::tests::stable ... ok
test gather::tests::rejects ... FAILED
test slow::tests::io ... ignored";
        let parsed = parse_log(LogParserKind::CargoTest, log);
        assert_eq!(parsed.outcomes["hash::tests::stable"], TestOutcome::Pass);
        assert_eq!(parsed.outcomes["gather::tests::rejects"], TestOutcome::Fail);
        assert_eq!(parsed.outcomes["slow::tests::io"], TestOutcome::Skip);
    }

    #[test]
    fn empty_log_is_unparseable() {
        let parsed = parse_log(LogParserKind::Pytest, "");
        assert!(parsed.is_unparseable());
    }

    #[test]
    fn noise_only_log_is_unparseable() {
        let log = "Segmentation fault (core dumped)\nstack smashing detected";
        let parsed = parse_log(LogParserKind::Pytest, log);
        assert!(parsed.is_unparseable());
    }

    #[test]
    fn mostly_noise_with_one_result_is_unparseable() {
        let mut log = String::from("tests/a.py::t PASSED\n");
        for i in 0..40 {
            log.push_str(&format!("garbage line {i}\n"));
        }
        let parsed = parse_log(LogParserKind::Pytest, &log);
        assert!(parsed.is_unparseable());
    }
}
