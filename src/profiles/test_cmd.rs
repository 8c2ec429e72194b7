//! Test-command rewriting.
//!
//! Upstream repositories frequently chain lint, type-check, or doc-build
//! steps into their test command (`npm run build && tsc --noEmit && vitest`).
//! Those steps would poison a test-differential signal: a synthesized defect
//! that trips the type checker kills the whole chain before a single test
//! runs. The rewrite keeps only the segments that actually run tests.

use std::sync::OnceLock;

use regex::Regex;

/// Patterns identifying non-test segments in a `&&`-chained shell command.
/// A segment matching any of these is dropped.
const NON_TEST_SEGMENT_PATTERNS: &[&str] = &[
    r"(^|\s)tsc(\s|$)",
    r"(^|\s)dtslint(\s|$)",
    r"(^|\s)prettier(\s|$)",
    r"(^|\s)eslint(\s|$)",
    r"\b(npm|pnpm|yarn)\s+(run\s+)?(lint|typecheck|type-check|format|prettier)\b",
    r"\bnpm\s+run\s+test:types\b",
    r"\b(npm|pnpm|yarn)\s+(run\s+)?build\b",
];

fn segment_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        NON_TEST_SEGMENT_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap())
            .collect()
    })
}

/// True when a chained segment is a lint/type-check/build step rather than a
/// test invocation.
pub fn is_non_test_segment(segment: &str) -> bool {
    segment_res().iter().any(|re| re.is_match(segment))
}

/// Strip non-test segments from a `&&`-chained command.
///
/// Segments joined by `&&` are evaluated independently; anything matching
/// the non-test predicate is dropped, and the survivors are re-joined. A
/// command with no surviving segment is returned unchanged so a
/// misconfigured profile fails visibly at run time instead of silently
/// running nothing.
pub fn effective_test_cmd(cmd: &str) -> String {
    if !cmd.contains("&&") {
        return cmd.trim().to_string();
    }
    let kept: Vec<&str> = cmd
        .split("&&")
        .map(str::trim)
        .filter(|seg| !seg.is_empty() && !is_non_test_segment(seg))
        .collect();
    if kept.is_empty() {
        return cmd.trim().to_string();
    }
    kept.join(" && ")
}

/// Reject umbrella or installer test commands at profile-authoring time.
///
/// New profiles must invoke the test runner directly (a script target or a
/// local binary), never an installer shim or a catch-all make target that
/// chains non-test work.
pub fn is_umbrella_command(cmd: &str) -> bool {
    let lower = cmd.trim().to_lowercase();
    lower.starts_with("make ")
        || lower.starts_with("make\t")
        || lower == "make"
        || lower.contains("npm install")
        || lower.contains("npm ci")
        || lower.contains("pip install")
        || lower.contains("cargo install")
        || lower.starts_with("./setup")
        || lower.starts_with("sh install")
}
