//! Two-phase differential validation.
//!
//! Phase 1 (gold) runs the clean tree once per image and caches the parsed
//! outcome map. Phase 2 runs each candidate patch in a private container,
//! classifies outcome transitions against gold, and writes per-instance
//! artifact directories. A partial run resumes by skipping directories that
//! already contain a report.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::container::{self, Container, CONTAINER_PATCH_PATH};
use crate::error::ValidationError;
use crate::gen::collect::ManifestEntry;
use crate::git::GIT_APPLY_CMDS;
use crate::harness::grading::{
    classify, extract_test_window, ValidationReport, TEST_OUTPUT_END, TEST_OUTPUT_START,
};
use crate::profiles::{RepoProfile, TestOutcome};

/// Root of per-run validation artifacts.
pub const LOG_DIR_RUN_VALIDATION: &str = "logs/run_validation";
/// Suffix of the gold (reference) instance directory.
pub const REF_SUFFIX: &str = ".ref";

const LOG_REPORT: &str = "report.json";
const LOG_TEST_OUTPUT: &str = "test_output.txt";
const LOG_INSTANCE: &str = "run_instance.log";

/// Cached gold run: outcome map plus the image it was produced on.
#[derive(Debug, Serialize, Deserialize)]
pub struct GoldReport {
    pub image_name: String,
    pub outcomes: BTreeMap<String, TestOutcome>,
}

/// Terminal state of one candidate's validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateStatus {
    Promotable,
    ZeroSignal,
    ApplyFailed,
    TimedOut,
    Unparseable,
    HarnessCrashed,
}

/// Per-stage summary counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationStats {
    pub validated: usize,
    pub promotable: usize,
    pub zero_signal: usize,
    pub apply_failed: usize,
    pub timed_out: usize,
    pub unparseable: usize,
    pub harness_crashed: usize,
    pub skipped_existing: usize,
}

/// The eval script run inside every container: sentinels around the
/// profile's effective test command.
fn eval_script(test_cmd: &str) -> String {
    [
        "#!/bin/bash",
        "set -uxo pipefail",
        &format!("cd {}", container::CONTAINER_WORKDIR),
        &format!(": '{TEST_OUTPUT_START}'"),
        test_cmd,
        &format!(": '{TEST_OUTPUT_END}'"),
    ]
    .join("\n")
        + "\n"
}

fn validation_dir(workspace: &Path, profile: &RepoProfile) -> PathBuf {
    workspace.join(LOG_DIR_RUN_VALIDATION).join(profile.repo_name())
}

/// Phase 1: produce (or reuse) the gold report for a profile's image.
///
/// The cache key is the image name: a rebuilt image invalidates the cached
/// gold. A gold timeout aborts the stage; phase 2 never starts without a
/// baseline (exit diagnostic: "gold timed out").
pub async fn run_gold(
    profile: &RepoProfile,
    config: &PipelineConfig,
    workspace: &Path,
) -> Result<BTreeMap<String, TestOutcome>, ValidationError> {
    let image = profile.image_name(config);
    let gold_dir = validation_dir(workspace, profile).join(format!("{}{}", profile.repo_name(), REF_SUFFIX));
    let report_path = gold_dir.join(LOG_REPORT);

    if let Ok(raw) = std::fs::read_to_string(&report_path) {
        if let Ok(cached) = serde_json::from_str::<GoldReport>(&raw) {
            if cached.image_name == image {
                tracing::info!(image = %image, tests = cached.outcomes.len(), "gold report cached");
                return Ok(cached.outcomes);
            }
        }
    }

    std::fs::create_dir_all(&gold_dir)?;
    container::ensure_image(&image)
        .await
        .map_err(|e| ValidationError::Container(e.to_string()))?;
    let proxy_env = container::container_proxy_env(&config.proxy).await;
    let container = Container::start(&image, &profile.mem_limit, &proxy_env)
        .await
        .map_err(|e| ValidationError::Container(e.to_string()))?;

    let script_path = gold_dir.join("eval.sh");
    std::fs::write(&script_path, eval_script(&profile.effective_test_cmd()))?;
    let timeout = Duration::from_secs(profile.timeout_ref);
    let result = run_eval_in(&container, &script_path, timeout).await;
    container.remove().await;
    let exec = result.map_err(|e| ValidationError::Container(e.to_string()))?;

    std::fs::write(gold_dir.join(LOG_TEST_OUTPUT), &exec.output)?;
    if exec.timed_out {
        // Discard the partial gold directory so a rerun starts clean.
        let _ = std::fs::remove_dir_all(&gold_dir);
        return Err(ValidationError::GoldTimedOut { image, timeout });
    }

    let window = extract_test_window(&exec.output)
        .ok_or_else(|| ValidationError::GoldUnparseable { image: image.clone() })?;
    let parsed = profile.parse_log(&window);
    if parsed.is_unparseable() {
        return Err(ValidationError::GoldUnparseable { image });
    }

    let report = GoldReport {
        image_name: image,
        outcomes: parsed.outcomes,
    };
    std::fs::write(&report_path, serde_json::to_string_pretty(&report).unwrap_or_default())?;
    tracing::info!(tests = report.outcomes.len(), "gold report persisted");
    Ok(report.outcomes)
}

async fn run_eval_in(
    container: &Container,
    script_path: &Path,
    timeout: Duration,
) -> Result<container::ExecOutput, crate::error::ContainerError> {
    container.copy_in(script_path, "/eval.sh").await?;
    container.exec("/bin/bash /eval.sh", timeout).await
}

/// Phase 2: validate every manifest candidate, up to `workers` in parallel.
pub async fn validate_candidates(
    profile: Arc<RepoProfile>,
    config: Arc<PipelineConfig>,
    manifest: Vec<ManifestEntry>,
    workers: usize,
    workspace: &Path,
) -> Result<ValidationStats, ValidationError> {
    // Phase 1 must complete before any candidate runs.
    let gold = Arc::new(run_gold(&profile, &config, workspace).await?);
    let base_dir = validation_dir(workspace, &profile);
    let total = manifest.len();

    let mut stats = ValidationStats::default();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set: JoinSet<CandidateStatus> = JoinSet::new();

    for entry in manifest {
        let instance_dir = base_dir.join(&entry.instance_id_stub);
        if instance_dir.join(LOG_REPORT).exists() {
            stats.skipped_existing += 1;
            continue;
        }
        let profile = Arc::clone(&profile);
        let config = Arc::clone(&config);
        let gold = Arc::clone(&gold);
        let semaphore = Arc::clone(&semaphore);
        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            match validate_one(&profile, &config, &gold, &entry, &instance_dir).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(instance = %entry.instance_id_stub, error = %e, "validation task failed");
                    CandidateStatus::HarnessCrashed
                }
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let status = joined.unwrap_or(CandidateStatus::HarnessCrashed);
        stats.validated += 1;
        match status {
            CandidateStatus::Promotable => stats.promotable += 1,
            CandidateStatus::ZeroSignal => stats.zero_signal += 1,
            CandidateStatus::ApplyFailed => stats.apply_failed += 1,
            CandidateStatus::TimedOut => stats.timed_out += 1,
            CandidateStatus::Unparseable => stats.unparseable += 1,
            CandidateStatus::HarnessCrashed => stats.harness_crashed += 1,
        }
    }

    tracing::info!(
        total,
        validated = stats.validated,
        promotable = stats.promotable,
        apply_failed = stats.apply_failed,
        timed_out = stats.timed_out,
        unparseable = stats.unparseable,
        "validation complete"
    );
    if total > 0 && stats.skipped_existing == 0 && stats.promotable == 0 && stats.zero_signal == 0 {
        return Err(ValidationError::AllInstancesFailed { total });
    }
    Ok(stats)
}

/// Run one candidate in a fresh container and write its artifact directory.
async fn validate_one(
    profile: &RepoProfile,
    config: &PipelineConfig,
    gold: &BTreeMap<String, TestOutcome>,
    entry: &ManifestEntry,
    instance_dir: &Path,
) -> Result<CandidateStatus, ValidationError> {
    std::fs::create_dir_all(instance_dir)?;
    let mut log_lines: Vec<String> = Vec::new();
    let mut log = |line: String| {
        log_lines.push(format!("{} {}", chrono::Utc::now().to_rfc3339(), line));
    };

    let image = profile.image_name(config);
    let patch_path = instance_dir.join("patch.diff");
    std::fs::write(&patch_path, &entry.patch)?;

    let proxy_env = container::container_proxy_env(&config.proxy).await;
    let container = match Container::start(&image, &profile.mem_limit, &proxy_env).await {
        Ok(c) => c,
        Err(e) => {
            log(format!("container start failed: {e}"));
            finish(instance_dir, log_lines, failed_report("container_start_failed"))?;
            return Ok(CandidateStatus::HarnessCrashed);
        }
    };

    let status = validate_in_container(
        profile,
        gold,
        instance_dir,
        &patch_path,
        &container,
        &mut log,
    )
    .await;
    container.remove().await;
    let status = status?;
    std::fs::write(instance_dir.join(LOG_INSTANCE), log_lines.join("\n") + "\n")?;
    Ok(status)
}

async fn validate_in_container(
    profile: &RepoProfile,
    gold: &BTreeMap<String, TestOutcome>,
    instance_dir: &Path,
    patch_path: &Path,
    container: &Container,
    log: &mut impl FnMut(String),
) -> Result<CandidateStatus, ValidationError> {
    // Apply the candidate patch with the escalating command list.
    if let Err(e) = container.copy_in(patch_path, CONTAINER_PATCH_PATH).await {
        log(format!("patch copy failed: {e}"));
        write_report(instance_dir, &failed_report("patch_copy_failed"))?;
        return Ok(CandidateStatus::HarnessCrashed);
    }
    let mut applied = false;
    for apply_cmd in GIT_APPLY_CMDS {
        let cmd = format!("{apply_cmd} {CONTAINER_PATCH_PATH}");
        match container.exec(&cmd, Duration::from_secs(60)).await {
            Ok(out) if out.exit_code == 0 => {
                log(format!("patch applied with `{apply_cmd}`"));
                applied = true;
                break;
            }
            Ok(out) => {
                log(format!("`{apply_cmd}` failed (exit {}), resetting", out.exit_code));
                let _ = container
                    .exec("git checkout -- . && git clean -fdx", Duration::from_secs(60))
                    .await;
            }
            Err(e) => log(format!("`{apply_cmd}` errored: {e}")),
        }
    }
    if !applied {
        log("candidate dropped: apply_failed".to_string());
        write_report(instance_dir, &failed_report("apply_failed"))?;
        return Ok(CandidateStatus::ApplyFailed);
    }

    // Run the effective test command under the per-candidate timeout.
    let script_path = instance_dir.join("eval.sh");
    std::fs::write(&script_path, eval_script(&profile.effective_test_cmd()))?;
    let timeout = Duration::from_secs(profile.timeout);
    let exec = match run_eval_in(container, &script_path, timeout).await {
        Ok(out) => out,
        Err(e) => {
            log(format!("eval exec failed: {e}"));
            write_report(instance_dir, &failed_report("exec_failed"))?;
            return Ok(CandidateStatus::HarnessCrashed);
        }
    };

    let mut test_output = exec.output;
    if exec.timed_out {
        test_output.push_str(&format!("\n\nTests timed out after {timeout:?}\n"));
    }
    std::fs::write(instance_dir.join(LOG_TEST_OUTPUT), &test_output)?;
    log(format!("test command exited with code {}", exec.exit_code));

    if exec.timed_out {
        log(format!("candidate dropped: timed out after {timeout:?}"));
        let report = ValidationReport {
            timed_out: true,
            ..Default::default()
        };
        write_report(instance_dir, &report)?;
        return Ok(CandidateStatus::TimedOut);
    }

    // A crashed harness produces no sentinel window; nothing is trustworthy.
    let Some(window) = extract_test_window(&test_output) else {
        log("candidate dropped: no test output window (harness crashed)".to_string());
        write_report(instance_dir, &failed_report("harness_crashed"))?;
        return Ok(CandidateStatus::HarnessCrashed);
    };
    let parsed = profile.parse_log(&window);
    if parsed.is_unparseable() {
        log(format!(
            "candidate dropped: unparseable ({} of {} lines unclassified)",
            parsed.unclassified, parsed.total_lines
        ));
        write_report(instance_dir, &failed_report("unparseable"))?;
        return Ok(CandidateStatus::Unparseable);
    }

    let mut report = classify(gold, &parsed.outcomes);
    // Tests the profile declares flaky carry no signal in either direction.
    if !profile.flaky_tests.is_empty() {
        report.fail_to_pass.retain(|t| !profile.flaky_tests.contains(t));
        report.pass_to_pass.retain(|t| !profile.flaky_tests.contains(t));
    }
    log(format!(
        "classified: {} F2P, {} P2P",
        report.fail_to_pass.len(),
        report.pass_to_pass.len()
    ));
    let status = if report.is_promotable() {
        CandidateStatus::Promotable
    } else {
        CandidateStatus::ZeroSignal
    };
    write_report(instance_dir, &report)?;
    Ok(status)
}

fn failed_report(reason: &str) -> serde_json::Value {
    serde_json::json!({
        "FAIL_TO_PASS": [],
        "PASS_TO_PASS": [],
        "failure_reason": reason,
    })
}

fn write_report<T: Serialize>(instance_dir: &Path, report: &T) -> Result<(), ValidationError> {
    std::fs::write(
        instance_dir.join(LOG_REPORT),
        serde_json::to_string_pretty(report).unwrap_or_default(),
    )?;
    Ok(())
}

fn finish(
    instance_dir: &Path,
    log_lines: Vec<String>,
    report: serde_json::Value,
) -> Result<(), ValidationError> {
    write_report(instance_dir, &report)?;
    std::fs::write(instance_dir.join(LOG_INSTANCE), log_lines.join("\n") + "\n")?;
    Ok(())
}
