//! Prediction evaluation.
//!
//! Runs an agent's proposed patch against a task instance in a fresh
//! container: check out the instance branch (pinned commit + bug patch),
//! apply the prediction, re-run the effective test command, and decide
//! resolution from the instance's F2P/P2P sets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::container::{self, Container, CONTAINER_PATCH_PATH};
use crate::error::{Error, ValidationError};
use crate::git::GIT_APPLY_CMDS;
use crate::harness::gather::TaskInstance;
use crate::harness::grading::{extract_test_window, is_resolved, TEST_OUTPUT_END, TEST_OUTPUT_START};
use crate::profiles::RepoProfile;

/// Result of evaluating one prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub instance_id: String,
    pub patch_applied: bool,
    pub resolved: bool,
}

/// Evaluate a model patch against an instance.
pub async fn evaluate_prediction(
    profile: &RepoProfile,
    config: &PipelineConfig,
    instance: &TaskInstance,
    model_patch: &str,
    workspace: &Path,
) -> Result<EvalOutcome, Error> {
    let unresolved = |applied| EvalOutcome {
        instance_id: instance.instance_id.clone(),
        patch_applied: applied,
        resolved: false,
    };
    if model_patch.trim().is_empty() {
        return Ok(unresolved(false));
    }

    let image = profile.image_name(config);
    container::ensure_image(&image).await.map_err(Error::Container)?;
    let proxy_env = container::container_proxy_env(&config.proxy).await;
    let container = Container::start(&image, &profile.mem_limit, &proxy_env)
        .await
        .map_err(Error::Container)?;

    let outcome = async {
        // Move the tree to the buggy state: the instance branch when the
        // mirror has it, otherwise the bug patch applied directly.
        let fetched = container
            .exec("git fetch -q origin", Duration::from_secs(120))
            .await
            .map(|o| o.exit_code == 0)
            .unwrap_or(false);
        let checked_out = fetched
            && container
                .exec(
                    &format!("git checkout -q {}", instance.instance_id),
                    Duration::from_secs(60),
                )
                .await
                .map(|o| o.exit_code == 0)
                .unwrap_or(false);
        if !checked_out {
            let bug_path = workspace.join(format!(".swesmith-bug-{}.diff", instance.instance_id));
            std::fs::write(&bug_path, &instance.patch).map_err(ValidationError::Io)?;
            let copied = container.copy_in(&bug_path, "/tmp/bug.diff").await;
            let _ = std::fs::remove_file(&bug_path);
            copied.map_err(Error::Container)?;
            let applied = container
                .exec("git apply /tmp/bug.diff", Duration::from_secs(60))
                .await
                .map(|o| o.exit_code == 0)
                .unwrap_or(false);
            if !applied {
                return Ok(unresolved(false));
            }
        }

        // Apply the prediction with the escalating command list.
        let pred_path = workspace.join(format!(".swesmith-pred-{}.diff", instance.instance_id));
        std::fs::write(&pred_path, model_patch).map_err(ValidationError::Io)?;
        let copied = container.copy_in(&pred_path, CONTAINER_PATCH_PATH).await;
        let _ = std::fs::remove_file(&pred_path);
        copied.map_err(Error::Container)?;

        let mut applied = false;
        for apply_cmd in GIT_APPLY_CMDS {
            let out = container
                .exec(
                    &format!("{apply_cmd} {CONTAINER_PATCH_PATH}"),
                    Duration::from_secs(60),
                )
                .await;
            if matches!(&out, Ok(o) if o.exit_code == 0) {
                applied = true;
                break;
            }
            let _ = container
                .exec("git checkout -- .", Duration::from_secs(60))
                .await;
        }
        if !applied {
            return Ok(unresolved(false));
        }

        let script = format!(
            "set -uxo pipefail\ncd {}\n: '{TEST_OUTPUT_START}'\n{}\n: '{TEST_OUTPUT_END}'\n",
            container::CONTAINER_WORKDIR,
            profile.effective_test_cmd()
        );
        let exec = container
            .exec(&script, Duration::from_secs(profile.timeout))
            .await
            .map_err(Error::Container)?;
        if exec.timed_out {
            return Ok(unresolved(true));
        }
        let Some(window) = extract_test_window(&exec.output) else {
            return Ok(unresolved(true));
        };
        let parsed = profile.parse_log(&window);
        let resolved = !parsed.is_unparseable()
            && is_resolved(&instance.fail_to_pass, &instance.pass_to_pass, &parsed.outcomes);
        Ok(EvalOutcome {
            instance_id: instance.instance_id.clone(),
            patch_applied: true,
            resolved,
        })
    }
    .await;

    container.remove().await;
    outcome
}
