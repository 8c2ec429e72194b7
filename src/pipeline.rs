//! Pipeline orchestration.
//!
//! Drives the stages in order (environment, entity extraction, bug
//! generation, collection, validation, gathering, issue generation,
//! assembly), with each stage reading the previous stage's outputs from
//! disk. Stage N starts only after stage N−1 has flushed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapters::LanguageAdapter;
use crate::build_repo;
use crate::config::{OwnerType, PipelineConfig};
use crate::container;
use crate::error::{ConfigError, Error};
use crate::gen::{self, collect::collect_patches, GenStats};
use crate::git;
use crate::harness::{eval, gather, valid};
use crate::issue_gen::{self, IssueConfig, IssueInputs, IssueMode};
use crate::llm::{create_llm_provider, LlmProvider};
use crate::profiles::{Registry, RepoProfile};
use crate::sft::{self, SftStyle};

/// Root of bug-generation artifacts.
pub const LOG_DIR_BUG_GEN: &str = "logs/bug_gen";

/// Which generator families to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum BugGenMethod {
    Procedural,
    LlmModify,
    LlmRewrite,
    All,
}

/// Options for the `run` subcommand.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub profile_path: PathBuf,
    pub method: BugGenMethod,
    pub max_bugs: usize,
    pub workers: usize,
    pub issue_mode: IssueMode,
    pub issue_config: Option<PathBuf>,
    pub issue_workers: usize,
    pub llm_model: Option<String>,
    pub skip_build: bool,
    pub gh_owner_type: Option<OwnerType>,
    pub seed: u64,
}

/// Options for the `distill` subcommand.
#[derive(Debug, Clone)]
pub struct DistillOptions {
    pub trajectories: PathBuf,
    pub eval_report: Option<PathBuf>,
    pub profile_path: Option<PathBuf>,
    pub run_id: String,
    pub style: SftStyle,
    pub resolved_only: bool,
}

fn needs_llm(method: BugGenMethod, issue_mode: IssueMode) -> bool {
    matches!(
        method,
        BugGenMethod::LlmModify | BugGenMethod::LlmRewrite | BugGenMethod::All
    ) || issue_mode == IssueMode::Llm
}

/// Execute the full synthesis pipeline for one profile.
pub async fn run(options: RunOptions) -> Result<(), Error> {
    let workspace = std::env::current_dir().map_err(Error::Io)?;
    let config = Arc::new(PipelineConfig::from_env(
        options.gh_owner_type,
        options.llm_model.as_deref(),
    )?);

    let mut registry = Registry::new();
    let profiles = registry.load_file(&options.profile_path, &config)?;
    let profile = profiles
        .first()
        .cloned()
        .ok_or_else(|| ConfigError::UnknownProfile(options.profile_path.display().to_string()))?;

    // Prechecks fail fast, before any stage does work.
    container::precheck_bridge().await.map_err(Error::Container)?;
    if config.proxy.is_configured() {
        container::precheck_proxy(&config.proxy)
            .await
            .map_err(Error::Container)?;
    }
    let provider = if needs_llm(options.method, options.issue_mode) {
        Some(create_llm_provider(&config.llm).map_err(Error::Llm)?)
    } else {
        None
    };

    // Stage: execution environment.
    build_repo::create_mirror(&profile, &config).await?;
    let built = build_repo::build_image(&profile, &config, &workspace, options.skip_build).await?;
    tracing::info!(outcome = ?built, image = %profile.image_name(&config), "environment ready");

    // Stage: entity extraction over a local clone of the mirror.
    let clone_dir = std::env::temp_dir().join(format!(
        "swesmith-extract-{}-{}",
        profile.repo_name(),
        uuid::Uuid::new_v4().simple()
    ));
    git::clone_with_fallback(
        &profile.mirror_name(&config),
        &clone_dir,
        config.github_token.as_ref(),
    )
    .await?;
    let result = run_generation_stages(&workspace, &clone_dir, &profile, &config, &options, provider).await;
    let _ = std::fs::remove_dir_all(&clone_dir);
    result
}

async fn run_generation_stages(
    workspace: &Path,
    clone_dir: &Path,
    profile: &Arc<RepoProfile>,
    config: &Arc<PipelineConfig>,
    options: &RunOptions,
    provider: Option<Arc<dyn LlmProvider>>,
) -> Result<(), Error> {
    let adapter = LanguageAdapter::for_language(profile.language);
    let entities = adapter.entities_of(clone_dir, profile)?;
    tracing::info!(entities = entities.len(), "entities extracted");

    // Stage: bug generation.
    let bug_gen_dir = workspace.join(LOG_DIR_BUG_GEN).join(profile.repo_name());
    std::fs::create_dir_all(&bug_gen_dir).map_err(Error::Io)?;
    let mut stats = GenStats::default();
    if matches!(options.method, BugGenMethod::Procedural | BugGenMethod::All) {
        let procedural = gen::procedural::generate(
            clone_dir,
            &bug_gen_dir,
            &entities,
            adapter,
            options.max_bugs,
            options.seed,
        )?;
        tracing::info!(generated = procedural.generated, "procedural generation done");
        stats.merge(procedural);
    }
    for (method, mode) in [
        (BugGenMethod::LlmModify, gen::llm::LlmBugMode::Modify),
        (BugGenMethod::LlmRewrite, gen::llm::LlmBugMode::Rewrite),
    ] {
        if options.method != method && options.method != BugGenMethod::All {
            continue;
        }
        let provider = provider
            .clone()
            .ok_or_else(|| Error::Llm(crate::error::LlmError::NoApiKey {
                provider: "openai-compatible".to_string(),
            }))?;
        let llm_stats = gen::llm::generate(
            provider,
            clone_dir,
            &bug_gen_dir,
            &entities,
            adapter,
            mode,
            options.max_bugs,
            options.workers,
        )
        .await?;
        tracing::info!(mode = ?mode, generated = llm_stats.generated, "LLM generation done");
        stats.merge(llm_stats);
    }
    tracing::info!(
        generated = stats.generated,
        skipped = stats.skipped,
        failed = stats.failed,
        "bug generation complete"
    );

    // Stage: collection.
    let (manifest_path, manifest) = collect_patches(&bug_gen_dir, &profile.repo_name())?;
    tracing::info!(manifest = %manifest_path.display(), "patches collected");

    // Stage: validation (gold strictly before candidates).
    let vstats = valid::validate_candidates(
        Arc::clone(profile),
        Arc::clone(config),
        manifest,
        options.workers,
        workspace,
    )
    .await?;

    // Stage: gathering.
    let (instances, gstats) = gather::collect_instances(profile, config, workspace)?;
    gather::write_instances(profile, workspace, &instances)?;
    if config.github_token.is_some() {
        gather::push_instance_branches(profile, config, workspace, &instances).await?;
    } else {
        tracing::warn!("no GITHUB_TOKEN; instance branches not pushed");
    }

    // Stage: issue generation.
    let issue_config = match &options.issue_config {
        Some(path) => IssueConfig::load(path)?,
        None => IssueConfig::default(),
    };
    let exp = options
        .issue_config
        .as_ref()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .unwrap_or_else(|| format!("{:?}", options.issue_mode).to_lowercase());
    let validation_dir = workspace
        .join(valid::LOG_DIR_RUN_VALIDATION)
        .join(profile.repo_name());
    let issue_inputs = |instance: &gather::TaskInstance| IssueInputs {
        test_output: std::fs::read_to_string(
            validation_dir.join(&instance.instance_id).join("test_output.txt"),
        )
        .ok(),
        test_sources: read_test_sources(clone_dir, &instance.fail_to_pass),
        pr_text: std::fs::read_to_string(
            workspace
                .join("logs/pr_mirrors")
                .join(format!("{}.md", instance.instance_id)),
        )
        .ok(),
    };
    let issues_path = if instances.is_empty() {
        None
    } else {
        issue_gen::generate_issues(
            workspace,
            &profile.repo_name(),
            &exp,
            options.issue_mode,
            &issue_config,
            provider.clone(),
            &instances,
            issue_inputs,
            options.issue_workers,
        )
        .await?
    };

    // Stage: assembly.
    let issues = match &issues_path {
        Some(path) => issue_gen::read_issues(path)?,
        None => Vec::new(),
    };
    let dataset_path = crate::dataset::assemble(
        workspace,
        &profile.repo_name(),
        &instances,
        &issues,
        options.issue_mode == IssueMode::Skip,
    )?;

    tracing::info!(
        generated = stats.generated,
        validated = vstats.validated,
        valid = gstats.new_instances,
        dataset = %dataset_path.display(),
        "pipeline complete"
    );
    Ok(())
}

/// Source text of the files containing the F2P tests, for issue prompts.
/// Test names are `path::test` in the pytest dialect; other dialects have
/// no file component and yield nothing.
fn read_test_sources(clone_dir: &Path, fail_to_pass: &[String]) -> Option<String> {
    let mut files: Vec<&str> = fail_to_pass
        .iter()
        .filter_map(|t| t.split_once("::").map(|(file, _)| file))
        .collect();
    files.sort_unstable();
    files.dedup();
    let mut out = String::new();
    for file in files {
        if let Ok(source) = std::fs::read_to_string(clone_dir.join(file)) {
            out.push_str(&source);
            out.push('\n');
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Execute the distiller.
pub async fn distill(options: DistillOptions) -> Result<(), Error> {
    let workspace = std::env::current_dir().map_err(Error::Io)?;

    let resolved_map = match (&options.eval_report, &options.profile_path) {
        (Some(report), _) => sft::parse_eval_report(report)?,
        (None, Some(profile_path)) => {
            evaluate_trajectories(&workspace, profile_path, &options).await?
        }
        (None, None) => {
            return Err(Error::Config(ConfigError::InvalidValue {
                key: "distill".to_string(),
                message: "either --eval-report or --profile is required".to_string(),
            }))
        }
    };

    let (path, stats) = sft::distill(
        &workspace,
        &options.trajectories,
        &resolved_map,
        &options.run_id,
        options.style,
        options.resolved_only,
    )?;
    tracing::info!(
        path = %path.display(),
        read = stats.read,
        emitted = stats.emitted,
        resolved = stats.resolved,
        "distillation complete"
    );
    Ok(())
}

/// Re-run every trajectory's proposed patch in a fresh container to decide
/// resolution, when no precomputed evaluation report was given.
async fn evaluate_trajectories(
    workspace: &Path,
    profile_path: &Path,
    options: &DistillOptions,
) -> Result<std::collections::BTreeMap<String, bool>, Error> {
    let config = Arc::new(PipelineConfig::from_env(None, None)?);
    let mut registry = Registry::new();
    let profiles = registry.load_file(profile_path, &config)?;
    let profile = profiles
        .first()
        .cloned()
        .ok_or_else(|| ConfigError::UnknownProfile(profile_path.display().to_string()))?;
    container::precheck_bridge().await.map_err(Error::Container)?;

    let instances_path = workspace
        .join(gather::LOG_DIR_TASKS)
        .join(format!("{}.json", profile.repo_name()));
    let raw = std::fs::read_to_string(&instances_path).map_err(Error::Io)?;
    let instances: Vec<gather::TaskInstance> =
        serde_json::from_str(&raw).map_err(|e| Error::Config(ConfigError::ParseError {
            path: instances_path,
            message: e.to_string(),
        }))?;
    let by_id: std::collections::BTreeMap<&str, &gather::TaskInstance> = instances
        .iter()
        .map(|i| (i.instance_id.as_str(), i))
        .collect();

    let mut resolved_map = std::collections::BTreeMap::new();
    for (instance_id, traj) in sft::load_trajectories(&options.trajectories)? {
        let Some(instance) = by_id.get(instance_id.as_str()) else {
            tracing::warn!(instance = %instance_id, "trajectory has no known instance; unresolved");
            resolved_map.insert(instance_id, false);
            continue;
        };
        let patch = traj.model_patch.clone().unwrap_or_default();
        let outcome =
            eval::evaluate_prediction(&profile, &config, instance, &patch, workspace).await?;
        resolved_map.insert(instance_id, outcome.resolved);
    }
    Ok(resolved_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_provider_needed_only_when_used() {
        assert!(!needs_llm(BugGenMethod::Procedural, IssueMode::Static));
        assert!(needs_llm(BugGenMethod::Procedural, IssueMode::Llm));
        assert!(needs_llm(BugGenMethod::LlmModify, IssueMode::Skip));
        assert!(needs_llm(BugGenMethod::All, IssueMode::Skip));
    }

    #[test]
    fn test_sources_extracted_from_pytest_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("tests")).unwrap();
        std::fs::write(tmp.path().join("tests/test_add.py"), "def test_add(): pass\n").unwrap();
        let sources = read_test_sources(
            tmp.path(),
            &["tests/test_add.py::test_add".to_string()],
        )
        .unwrap();
        assert!(sources.contains("def test_add"));

        assert!(read_test_sources(tmp.path(), &["add adds".to_string()]).is_none());
    }
}
