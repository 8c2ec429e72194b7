//! Differential test harness.
//!
//! Phase 1 runs the clean tree once per image and persists the gold report;
//! phase 2 runs every candidate patch in a private container and classifies
//! each test's outcome transition against gold. Survivors are gathered into
//! task instances; agent predictions are evaluated against the same
//! environments.

pub mod eval;
pub mod gather;
pub mod grading;
pub mod valid;

pub use grading::{classify, extract_test_window, ValidationReport};
