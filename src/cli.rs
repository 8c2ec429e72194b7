//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::OwnerType;
use crate::issue_gen::IssueMode;
use crate::pipeline::{BugGenMethod, DistillOptions, RunOptions};
use crate::sft::SftStyle;

/// Turn a repository into a corpus of container-backed task instances.
#[derive(Debug, Parser)]
#[command(name = "swesmith", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the synthesis pipeline end to end for one profile.
    Run(RunArgs),
    /// Distill agent trajectories into SFT records.
    Distill(DistillArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to a repository profile JSON file.
    #[arg(long)]
    pub profile: PathBuf,

    /// Generator families to run.
    #[arg(long = "bug-gen-method", value_enum, default_value = "procedural")]
    pub bug_gen_method: BugGenMethod,

    /// Cap on candidates emitted per generator run.
    #[arg(long = "max-bugs", default_value_t = 100)]
    pub max_bugs: usize,

    /// Parallel validation containers / LLM calls in flight.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// How problem statements are produced.
    #[arg(long = "issue-mode", value_enum, default_value = "llm")]
    pub issue_mode: IssueMode,

    /// Prompt configuration for the LLM issue mode.
    #[arg(long = "issue-config")]
    pub issue_config: Option<PathBuf>,

    /// Parallel issue-generation calls in flight.
    #[arg(long = "issue-workers", default_value_t = 2, value_parser = clap::value_parser!(u16).range(1..))]
    pub issue_workers: u16,

    /// Model identifier for LLM calls (overrides the environment).
    #[arg(long = "llm-model")]
    pub llm_model: Option<String>,

    /// Reuse the existing container image instead of building.
    #[arg(long = "skip-build", default_value_t = false)]
    pub skip_build: bool,

    /// Whether the mirror namespace is a user or an organization.
    #[arg(long = "gh-owner-type", value_enum)]
    pub gh_owner_type: Option<OwnerType>,

    /// Seed for the procedural generator's sampling.
    #[arg(long, default_value_t = 24)]
    pub seed: u64,
}

#[derive(Debug, Args)]
pub struct DistillArgs {
    /// Directory of agent trajectory JSON files.
    #[arg(long)]
    pub trajectories: PathBuf,

    /// Precomputed evaluation report; omit to re-evaluate in containers.
    #[arg(long = "eval-report")]
    pub eval_report: Option<PathBuf>,

    /// Profile for container re-evaluation (required without --eval-report).
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Run identifier, used in the output file name.
    #[arg(long = "run-id")]
    pub run_id: String,

    /// Tool-call serialization dialect.
    #[arg(long, value_enum, default_value = "xml")]
    pub style: SftStyle,

    /// Keep only resolved trajectories.
    #[arg(long = "resolved-only", default_value_t = false)]
    pub resolved_only: bool,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        RunOptions {
            profile_path: args.profile,
            method: args.bug_gen_method,
            max_bugs: args.max_bugs,
            workers: args.workers as usize,
            issue_mode: args.issue_mode,
            issue_config: args.issue_config,
            issue_workers: args.issue_workers as usize,
            llm_model: args.llm_model,
            skip_build: args.skip_build,
            gh_owner_type: args.gh_owner_type,
            seed: args.seed,
        }
    }
}

impl From<DistillArgs> for DistillOptions {
    fn from(args: DistillArgs) -> Self {
        DistillOptions {
            trajectories: args.trajectories,
            eval_report: args.eval_report,
            profile_path: args.profile,
            run_id: args.run_id,
            style: args.style,
            resolved_only: args.resolved_only,
        }
    }
}
