//! Mirror repository creation.
//!
//! A mirror is a remote clone of the upstream repository at the pinned
//! commit, with its history squashed to one commit and CI configuration
//! stripped, hosted under the pipeline's GitHub namespace. Instance
//! branches are pushed onto it later by the gatherer.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use crate::config::{OwnerType, PipelineConfig};
use crate::error::GitError;
use crate::git::{self, run_git};
use crate::profiles::RepoProfile;

/// Check whether the mirror already exists on the remote.
pub async fn mirror_exists(profile: &RepoProfile, config: &PipelineConfig) -> bool {
    let mirror = profile.mirror_name(config);
    let url = match &config.github_token {
        Some(token) => git::https_push_url(&mirror, token),
        None => format!("https://github.com/{mirror}.git"),
    };
    let tmp = std::env::temp_dir();
    run_git(&tmp, &["ls-remote", &url, "HEAD"]).await.is_ok()
}

/// Create the GitHub repository for the mirror via the REST API.
async fn create_remote_repo(
    profile: &RepoProfile,
    config: &PipelineConfig,
) -> Result<(), GitError> {
    let token = match &config.github_token {
        Some(t) => t,
        None => return Ok(()), // push will fail with a clearer error
    };
    let (url, body) = match config.gh_owner_type {
        OwnerType::User => (
            "https://api.github.com/user/repos".to_string(),
            serde_json::json!({ "name": profile.repo_name() }),
        ),
        OwnerType::Org => (
            format!("https://api.github.com/orgs/{}/repos", config.org_gh),
            serde_json::json!({ "name": profile.repo_name() }),
        ),
    };
    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", token.expose_secret()))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "swesmith")
        .json(&body)
        .send()
        .await;
    match response {
        // 422 means the repo already exists, which is the idempotent case.
        Ok(r) if r.status().is_success() || r.status().as_u16() == 422 => Ok(()),
        Ok(r) => Err(GitError::CommandFailed {
            args: vec!["create-repo".to_string()],
            dir: PathBuf::from("."),
            stderr: format!("GitHub API returned {}", r.status()),
        }),
        Err(e) => Err(GitError::CommandFailed {
            args: vec!["create-repo".to_string()],
            dir: PathBuf::from("."),
            stderr: e.to_string(),
        }),
    }
}

/// Create (or reuse) the mirror for a profile. Idempotent.
///
/// Clone transport is SSH with HTTPS fallback; the push always goes over
/// HTTPS with the token, since SSH keys frequently lack write access to
/// the mirror org.
pub async fn create_mirror(profile: &RepoProfile, config: &PipelineConfig) -> Result<(), GitError> {
    if mirror_exists(profile, config).await {
        tracing::info!(mirror = %profile.mirror_name(config), "mirror exists, reusing");
        return Ok(());
    }
    let token = config
        .github_token
        .as_ref()
        .ok_or_else(|| GitError::CommandFailed {
            args: vec!["push".to_string()],
            dir: PathBuf::from("."),
            stderr: "GITHUB_TOKEN is required to create a mirror".to_string(),
        })?;

    create_remote_repo(profile, config).await?;

    let work = std::env::temp_dir().join(format!(
        "swesmith-mirror-{}-{}",
        profile.repo_name(),
        uuid::Uuid::new_v4().simple()
    ));
    let upstream = format!("{}/{}", profile.owner, profile.repo);
    git::clone_with_fallback(&upstream, &work, Some(token)).await?;

    let result = async {
        run_git(&work, &["checkout", &profile.commit]).await?;
        if work.join(".gitmodules").exists() {
            run_git(&work, &["submodule", "update", "--init", "--recursive"]).await?;
        }

        // Squash history: the mirror carries exactly one commit at the
        // pinned tree, with upstream CI stripped.
        std::fs::remove_dir_all(work.join(".git"))?;
        let _ = std::fs::remove_dir_all(work.join(".github/workflows"));
        for dependabot in ["dependabot.yml", "dependabot.yaml"] {
            let _ = std::fs::remove_file(work.join(".github").join(dependabot));
        }
        run_git(&work, &["init", "-q"]).await?;
        git::configure_identity(&work).await?;
        run_git(&work, &["add", "."]).await?;
        run_git(&work, &["commit", "-q", "--no-gpg-sign", "-m", "Initial commit"]).await?;
        run_git(&work, &["branch", "-M", "main"]).await?;

        let push_url = git::https_push_url(&profile.mirror_name(config), token);
        run_git(&work, &["remote", "add", "origin", &push_url]).await?;
        run_git(&work, &["push", "-u", "origin", "main"]).await?;

        // Preserve the commit name as a tag so container checkouts of the
        // pinned revision resolve on the mirror too.
        if profile.commit != "main" && profile.commit != "master" {
            run_git(&work, &["tag", &profile.commit]).await?;
            run_git(&work, &["push", "origin", "--tags"]).await?;
        }
        Ok::<(), GitError>(())
    }
    .await;

    let _ = std::fs::remove_dir_all(&work);
    result?;
    tracing::info!(mirror = %profile.mirror_name(config), "mirror created");
    Ok(())
}
