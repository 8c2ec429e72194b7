//! swesmith: task-instance synthesis engine.
//!
//! Turns an arbitrary source repository into a corpus of reproducible,
//! container-backed software-engineering task instances of the form
//! `(buggy code, failing tests, passing tests, issue text)`:
//!
//! 1. Materialize a per-repository execution environment (mirror + image).
//! 2. Synthesize candidate defects (procedural, LM-modify, LM-rewrite).
//! 3. Validate candidates by differential test execution against gold.
//! 4. Gather survivors into instances with stable ids and mirror branches.
//! 5. Generate issue texts.
//! 6. Assemble the canonical dataset.
//! 7. Distill agent trajectories into SFT records.

pub mod adapters;
pub mod build_repo;
pub mod cli;
pub mod config;
pub mod container;
pub mod dataset;
pub mod error;
pub mod gen;
pub mod git;
pub mod harness;
pub mod issue_gen;
pub mod llm;
pub mod pipeline;
pub mod profiles;
pub mod sft;
pub mod util;

pub use error::Error;
