//! Instance gathering.
//!
//! Scans the validation artifacts, keeps every candidate with at least one
//! FAIL_TO_PASS and one PASS_TO_PASS test, mints its instance id, writes the
//! canonical record (minus problem_statement), and pushes one mirror branch
//! per instance whose tip is the pinned commit with the candidate patch
//! applied. Re-running over the same artifacts is idempotent; a branch that
//! exists with different contents is a hard error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{Error, GatherError};
use crate::git::{self, run_git};
use crate::harness::grading::ValidationReport;
use crate::harness::valid::{LOG_DIR_RUN_VALIDATION, REF_SUFFIX};
use crate::profiles::RepoProfile;

/// Root of gathered task-instance records.
pub const LOG_DIR_TASKS: &str = "logs/task_insts";

/// Canonical task-instance record, before the issue text is joined in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub instance_id: String,
    /// Mirror repository full name.
    pub repo: String,
    pub patch: String,
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: Vec<String>,
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: Vec<String>,
    pub image_name: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GatherStats {
    pub new_instances: usize,
    pub existing: usize,
    pub rejected: usize,
}

/// Scan validation artifacts and build the kept instance list.
///
/// Records are appended in sorted instance-id order, so re-runs over the
/// same artifacts produce the same file.
pub fn collect_instances(
    profile: &RepoProfile,
    config: &PipelineConfig,
    workspace: &Path,
) -> Result<(Vec<TaskInstance>, GatherStats), Error> {
    let validation_dir = workspace
        .join(LOG_DIR_RUN_VALIDATION)
        .join(profile.repo_name());
    let mut stats = GatherStats::default();
    let mut instances = Vec::new();

    let mut subdirs: Vec<PathBuf> = match std::fs::read_dir(&validation_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    };
    subdirs.sort();

    for dir in subdirs {
        let instance_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if instance_id.ends_with(REF_SUFFIX) {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(dir.join("report.json")) else {
            stats.rejected += 1;
            continue;
        };
        let Ok(report) = serde_json::from_str::<ValidationReport>(&raw) else {
            stats.rejected += 1;
            continue;
        };
        if !report.is_promotable() {
            stats.rejected += 1;
            continue;
        }
        let Ok(patch) = std::fs::read_to_string(dir.join("patch.diff")) else {
            stats.rejected += 1;
            continue;
        };
        instances.push(TaskInstance {
            instance_id,
            repo: profile.mirror_name(config),
            patch,
            fail_to_pass: report.fail_to_pass,
            pass_to_pass: report.pass_to_pass,
            image_name: profile.image_name(config),
        });
        stats.new_instances += 1;
    }
    Ok((instances, stats))
}

/// Write the gathered records to `logs/task_insts/<repo_name>.json`.
pub fn write_instances(
    profile: &RepoProfile,
    workspace: &Path,
    instances: &[TaskInstance],
) -> Result<PathBuf, Error> {
    let out_dir = workspace.join(LOG_DIR_TASKS);
    std::fs::create_dir_all(&out_dir).map_err(GatherError::Io)?;
    let out_path = out_dir.join(format!("{}.json", profile.repo_name()));
    std::fs::write(
        &out_path,
        serde_json::to_string_pretty(instances).unwrap_or_default(),
    )
    .map_err(GatherError::Io)?;
    tracing::info!(path = %out_path.display(), count = instances.len(), "task instances written");
    Ok(out_path)
}

/// Push one mirror branch per instance: tip equals the pinned commit with
/// the candidate patch applied.
///
/// Pushes are serialized per repo. An existing branch whose tree matches is
/// accepted silently; a tree mismatch under the same name aborts.
pub async fn push_instance_branches(
    profile: &RepoProfile,
    config: &PipelineConfig,
    workspace: &Path,
    instances: &[TaskInstance],
) -> Result<GatherStats, Error> {
    let mut stats = GatherStats::default();
    if instances.is_empty() {
        return Ok(stats);
    }
    let token = config.require_github_token()?;
    let mirror = profile.mirror_name(config);

    let work = std::env::temp_dir().join(format!(
        "swesmith-gather-{}-{}",
        profile.repo_name(),
        uuid::Uuid::new_v4().simple()
    ));
    git::clone_with_fallback(&mirror, &work, Some(token))
        .await
        .map_err(Error::Git)?;
    // Pushes always go over HTTPS+token even when the clone came via SSH.
    let push_url = git::https_push_url(&mirror, token);
    run_git(&work, &["remote", "set-url", "origin", &push_url])
        .await
        .map_err(Error::Git)?;
    git::configure_identity(&work).await.map_err(Error::Git)?;
    let main_branch = run_git(&work, &["rev-parse", "--abbrev-ref", "HEAD"])
        .await
        .map_err(Error::Git)?
        .trim()
        .to_string();

    let lock = git::push_lock(&profile.repo_name());
    let result = async {
        for instance in instances {
            let branch = &instance.instance_id;

            // Build the branch tip locally: pinned commit + patch.
            run_git(&work, &["checkout", "-q", &main_branch]).await?;
            git::reset_hard(&work).await?;
            run_git(&work, &["checkout", "-q", "-B", branch]).await?;
            let patch_path = workspace
                .join(LOG_DIR_RUN_VALIDATION)
                .join(profile.repo_name())
                .join(branch)
                .join("patch.diff");
            if git::apply_patch_file(&work, &patch_path).await.is_err() {
                run_git(&work, &["checkout", "-q", &main_branch]).await?;
                return Err(Error::Gather(GatherError::PatchApply {
                    instance_id: branch.clone(),
                }));
            }
            run_git(&work, &["add", "."]).await?;
            run_git(&work, &["commit", "-q", "--no-gpg-sign", "-m", "Bug Patch"]).await?;
            let local_tree = run_git(&work, &["rev-parse", &format!("{branch}^{{tree}}")]).await?;

            // Duplicate branch names are fine when the content matches.
            let remote_ref = run_git(&work, &["ls-remote", "origin", branch]).await?;
            if !remote_ref.trim().is_empty() {
                run_git(&work, &["fetch", "-q", "origin", branch]).await?;
                let remote_tree = run_git(&work, &["rev-parse", "FETCH_HEAD^{tree}"]).await?;
                if remote_tree.trim() == local_tree.trim() {
                    tracing::debug!(branch = %branch, "branch exists with matching contents");
                    stats.existing += 1;
                } else {
                    return Err(Error::Gather(GatherError::BranchContentMismatch {
                        branch: branch.clone(),
                        mirror: mirror.clone(),
                    }));
                }
            } else {
                let _push_guard = lock.lock().await;
                run_git(&work, &["push", "-q", "origin", branch]).await?;
                stats.new_instances += 1;
            }

            run_git(&work, &["checkout", "-q", &main_branch]).await?;
            run_git(&work, &["branch", "-q", "-D", branch]).await?;
        }
        Ok::<GatherStats, Error>(stats)
    }
    .await;

    let _ = std::fs::remove_dir_all(&work);
    result
}
