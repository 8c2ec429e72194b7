//! Container image builds, cached by recipe digest.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::PipelineConfig;
use crate::error::ContainerError;
use crate::profiles::RepoProfile;
use crate::util::hex_digest;

/// Directory holding per-repo Dockerfiles and build logs.
pub const LOG_DIR_ENV: &str = "logs/build_images/env";

/// What the builder did for this profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    /// Recipe digest matched the cache marker and the image exists locally.
    Cached,
    /// `--skip-build` was set.
    Skipped,
}

fn digest_for(profile: &RepoProfile) -> String {
    // The image content is a function of the recipe text and the pinned
    // commit; either changing invalidates the cache.
    hex_digest(format!("{}\n{}", profile.container_recipe, profile.commit).as_bytes())
}

async fn image_exists(image: &str) -> bool {
    Command::new("docker")
        .args(["image", "inspect", image])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Build the profile's image unless the cached digest still matches.
pub async fn build_image(
    profile: &RepoProfile,
    config: &PipelineConfig,
    workspace: &Path,
    skip_build: bool,
) -> Result<BuildOutcome, ContainerError> {
    if skip_build {
        return Ok(BuildOutcome::Skipped);
    }
    let image = profile.image_name(config);
    let env_dir: PathBuf = workspace.join(LOG_DIR_ENV).join(profile.repo_name());
    std::fs::create_dir_all(&env_dir)?;

    let digest = digest_for(profile);
    let marker = env_dir.join(".build_digest");
    let cached = std::fs::read_to_string(&marker)
        .map(|prev| prev.trim() == digest)
        .unwrap_or(false);
    if cached && image_exists(&image).await {
        tracing::info!(image = %image, "image up to date, skipping build");
        return Ok(BuildOutcome::Cached);
    }

    let dockerfile = env_dir.join("Dockerfile");
    std::fs::write(&dockerfile, &profile.container_recipe)?;
    let log_path = env_dir.join("build_image.log");
    let log_file = std::fs::File::create(&log_path)?;

    tracing::info!(image = %image, platform = profile.arch.platform(), "building image");
    let status = Command::new("docker")
        .args([
            "build",
            "-f",
            &dockerfile.to_string_lossy(),
            "--platform",
            profile.arch.platform(),
            "-t",
            &image,
            ".",
        ])
        .current_dir(&env_dir)
        .stdout(Stdio::from(log_file.try_clone()?))
        .stderr(Stdio::from(log_file))
        .status()
        .await?;

    if !status.success() {
        return Err(ContainerError::BuildFailed {
            image,
            log_path,
        });
    }
    std::fs::write(&marker, &digest)?;
    Ok(BuildOutcome::Built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::test_profile;

    #[test]
    fn digest_tracks_recipe_and_commit() {
        let a = test_profile();
        let mut b = test_profile();
        assert_eq!(digest_for(&a), digest_for(&b));

        b.container_recipe.push_str("RUN echo extra\n");
        assert_ne!(digest_for(&a), digest_for(&b));

        let mut c = test_profile();
        c.commit = "ffff1234ffff1234ffff1234ffff1234ffff1234".to_string();
        assert_ne!(digest_for(&a), digest_for(&c));
    }
}
