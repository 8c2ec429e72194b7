//! Issue-text generation.
//!
//! Every task instance needs a natural-language problem statement that
//! describes the defect without revealing the fix. Five modes share one
//! output contract: `logs/issue_gen/<repo>__<exp>_n1.json` holding
//! `{instance_id, problem_statement}` records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::IssueError;
use crate::harness::gather::TaskInstance;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::util::maybe_shorten;

/// Root of issue-generation outputs.
pub const LOG_DIR_ISSUE_GEN: &str = "logs/issue_gen";
/// Legacy location some older runs wrote to; see `rehome_legacy_outputs`.
const LEGACY_DIR: &str = "logs/task_insts";

/// How problem statements are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum IssueMode {
    /// Prompt an LLM over the diff and failing-test signal (default).
    Llm,
    /// Diff-derived template, no model call.
    Static,
    /// Template derived from the failing tests.
    Tests,
    /// Reuse problem text mirrored from an upstream pull request.
    Pr,
    /// Produce no issue texts; the assembler tolerates their absence.
    Skip,
}

/// One issue record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub instance_id: String,
    pub problem_statement: String,
}

/// Prompt configuration for the LLM mode, loadable via `--issue-config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Cap on how much diff/test text is inlined into the prompt.
    #[serde(default = "default_max_var_tokens")]
    pub max_var_tokens: usize,
}

fn default_system_prompt() -> String {
    "You are writing a realistic GitHub issue reporting a bug a user hit in \
     this repository. Describe the observed behavior and how to reproduce \
     it. Never mention the patch, the diff, or what the correct code should \
     look like; the reader must diagnose the fix themselves."
        .to_string()
}

fn default_max_var_tokens() -> usize {
    10_000
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_var_tokens: default_max_var_tokens(),
        }
    }
}

impl IssueConfig {
    pub fn load(path: &Path) -> Result<Self, IssueError> {
        let raw = std::fs::read_to_string(path).map_err(|e| IssueError::BadConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| IssueError::BadConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Canonical output path for a repo + experiment name.
pub fn output_path(workspace: &Path, repo_name: &str, exp: &str) -> PathBuf {
    workspace
        .join(LOG_DIR_ISSUE_GEN)
        .join(format!("{repo_name}__{exp}_n1.json"))
}

/// Move a legacy-located issue output to the canonical directory.
///
/// Older runs occasionally wrote issue outputs under `logs/task_insts/`;
/// the upstream cause is unclear, so the rule is mechanical: any
/// `<repo>__<exp>_n1.json` found there is rehomed and the move is logged.
pub fn rehome_legacy_outputs(workspace: &Path, repo_name: &str) -> Result<usize, IssueError> {
    let legacy_dir = workspace.join(LEGACY_DIR);
    let canonical_dir = workspace.join(LOG_DIR_ISSUE_GEN);
    let mut moved = 0;
    let Ok(entries) = std::fs::read_dir(&legacy_dir) else {
        return Ok(0);
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&format!("{repo_name}__")) && name.ends_with("_n1.json") {
            std::fs::create_dir_all(&canonical_dir)?;
            let dest = canonical_dir.join(&name);
            std::fs::rename(entry.path(), &dest)?;
            tracing::warn!(
                from = %entry.path().display(),
                to = %dest.display(),
                "rehomed legacy issue output to canonical location"
            );
            moved += 1;
        }
    }
    Ok(moved)
}

/// The added lines of a bug diff are the planted defect; the removed lines
/// are the original, correct code. An issue that quotes the original code
/// verbatim reveals the fix.
fn reveals_fix(issue: &str, diff: &str) -> bool {
    diff.lines()
        .filter(|l| l.starts_with('-') && !l.starts_with("---"))
        .map(|l| l[1..].trim())
        .filter(|l| l.len() >= 30)
        .any(|original_line| issue.contains(original_line))
}

fn static_statement(instance: &TaskInstance) -> String {
    let files: Vec<String> = instance
        .patch
        .lines()
        .filter_map(|l| l.strip_prefix("+++ b/"))
        .map(str::to_string)
        .collect();
    let mut out = String::from("Unexpected behavior after a recent change.\n\n");
    if !files.is_empty() {
        out.push_str(&format!(
            "Something seems off in `{}`: ",
            files.join("`, `")
        ));
    }
    out.push_str(
        "several operations that used to work are now producing wrong results or errors.\n\n",
    );
    out.push_str("Failing checks:\n");
    for test in &instance.fail_to_pass {
        out.push_str(&format!("- {test}\n"));
    }
    out
}

fn tests_statement(instance: &TaskInstance, test_sources: &str) -> String {
    let mut out = String::from(
        "The following tests fail on the current tree but are expected to pass:\n\n",
    );
    for test in &instance.fail_to_pass {
        out.push_str(&format!("- {test}\n"));
    }
    if !test_sources.trim().is_empty() {
        out.push_str("\nRelevant test code:\n\n```\n");
        out.push_str(test_sources.trim_end());
        out.push_str("\n```\n");
    }
    out
}

fn llm_prompt(
    config: &IssueConfig,
    instance: &TaskInstance,
    test_output: &str,
) -> Vec<ChatMessage> {
    let diff = maybe_shorten(&instance.patch, config.max_var_tokens);
    let output = maybe_shorten(test_output, config.max_var_tokens);
    vec![
        ChatMessage::system(config.system_prompt.clone()),
        ChatMessage::user(format!(
            "Repository: {repo}\n\nThe change below was applied to the repository \
             (do not mention it in the issue):\n\n```diff\n{diff}\n```\n\n\
             Failing tests:\n{tests}\n\nTest output:\n```\n{output}\n```\n\n\
             Write the issue now.",
            repo = instance.repo,
            tests = instance
                .fail_to_pass
                .iter()
                .map(|t| format!("- {t}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )),
    ]
}

/// Inputs the generator reads from prior stages, keyed by instance id.
pub struct IssueInputs {
    /// `test_output.txt` contents from validation, for the LLM prompt.
    pub test_output: Option<String>,
    /// F2P test sources, for the tests template.
    pub test_sources: Option<String>,
    /// Mirrored PR text, for the pr mode.
    pub pr_text: Option<String>,
}

/// Generate issue texts for every instance and write the canonical output.
///
/// `skip` writes nothing and returns `None`. LLM calls run `workers` at a
/// time; an instance whose generation fails is dropped from the output
/// with a warning rather than sinking the stage.
pub async fn generate_issues(
    workspace: &Path,
    repo_name: &str,
    exp: &str,
    mode: IssueMode,
    config: &IssueConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    instances: &[TaskInstance],
    inputs: impl Fn(&TaskInstance) -> IssueInputs,
    workers: usize,
) -> Result<Option<PathBuf>, IssueError> {
    if mode == IssueMode::Skip {
        return Ok(None);
    }
    rehome_legacy_outputs(workspace, repo_name)?;
    if instances.is_empty() {
        return Err(IssueError::NoInstances);
    }

    let mut records: Vec<IssueRecord> = Vec::new();
    match mode {
        IssueMode::Static => {
            for instance in instances {
                records.push(IssueRecord {
                    instance_id: instance.instance_id.clone(),
                    problem_statement: static_statement(instance),
                });
            }
        }
        IssueMode::Tests => {
            for instance in instances {
                let sources = inputs(instance).test_sources.unwrap_or_default();
                records.push(IssueRecord {
                    instance_id: instance.instance_id.clone(),
                    problem_statement: tests_statement(instance, &sources),
                });
            }
        }
        IssueMode::Pr => {
            for instance in instances {
                match inputs(instance).pr_text {
                    Some(text) => records.push(IssueRecord {
                        instance_id: instance.instance_id.clone(),
                        problem_statement: text,
                    }),
                    None => {
                        tracing::warn!(
                            instance = %instance.instance_id,
                            "no mirrored PR text; instance dropped from issue output"
                        );
                    }
                }
            }
        }
        IssueMode::Llm => {
            let provider = provider.ok_or_else(|| IssueError::BadConfig {
                path: PathBuf::from("--llm-model"),
                message: "llm issue mode requires a configured provider".to_string(),
            })?;
            let semaphore = Arc::new(Semaphore::new(workers.max(1)));
            let mut join_set: JoinSet<Option<IssueRecord>> = JoinSet::new();
            for instance in instances.iter().cloned() {
                let provider = Arc::clone(&provider);
                let semaphore = Arc::clone(&semaphore);
                let prompt = llm_prompt(
                    config,
                    &instance,
                    &inputs(&instance).test_output.unwrap_or_default(),
                );
                join_set.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    let request = CompletionRequest::new(prompt).with_temperature(0.7);
                    match provider.complete(request).await {
                        Ok(response) => {
                            if reveals_fix(&response.content, &instance.patch) {
                                tracing::warn!(
                                    instance = %instance.instance_id,
                                    "issue text reveals the fix; dropped"
                                );
                                return None;
                            }
                            Some(IssueRecord {
                                instance_id: instance.instance_id.clone(),
                                problem_statement: response.content,
                            })
                        }
                        Err(e) => {
                            tracing::warn!(
                                instance = %instance.instance_id,
                                error = %e,
                                "issue generation failed"
                            );
                            None
                        }
                    }
                });
            }
            while let Some(joined) = join_set.join_next().await {
                if let Ok(Some(record)) = joined {
                    records.push(record);
                }
            }
        }
        IssueMode::Skip => unreachable!("handled above"),
    }

    records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
    let out_path = output_path(workspace, repo_name, exp);
    std::fs::create_dir_all(out_path.parent().expect("output path has a parent"))?;
    std::fs::write(
        &out_path,
        serde_json::to_string_pretty(&records).unwrap_or_default(),
    )?;
    tracing::info!(path = %out_path.display(), count = records.len(), "issue texts written");
    Ok(Some(out_path))
}

/// Read issue records back for the assembler.
pub fn read_issues(path: &Path) -> Result<Vec<IssueRecord>, IssueError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| IssueError::BadConfig {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
