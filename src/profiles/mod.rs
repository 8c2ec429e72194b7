//! Repository profiles.
//!
//! A profile is the immutable per-repository descriptor consulted by every
//! pipeline stage: container recipe, test invocation, log parser, language
//! tag, source globs, and resource limits. A given `(owner, repo, commit)`
//! triple yields exactly one profile; the registry rejects conflicting
//! registrations.

pub mod log_parser;
pub mod test_cmd;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::ConfigError;
pub use log_parser::{parse_log, LogParserKind, ParsedLog, TestOutcome};

/// Literal separator in image names. Chosen to avoid collisions with repo
/// names that themselves contain underscores.
const IMAGE_NAME_SEP: &str = "_1776_";

/// Source language of the repository; selects the language adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
}

impl Language {
    /// File extensions (with leading dot) this language claims.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::Python => &[".py"],
            Language::Javascript => &[".js", ".jsx", ".mjs", ".cjs"],
            Language::Typescript => &[".ts", ".tsx"],
        }
    }
}

/// Target architecture baked into image names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    Arm64,
}

impl Arch {
    pub fn detect() -> Self {
        match std::env::consts::ARCH {
            "aarch64" | "arm64" => Arch::Arm64,
            _ => Arch::X86_64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Docker platform string for image builds.
    pub fn platform(self) -> &'static str {
        match self {
            Arch::X86_64 => "linux/x86_64",
            Arch::Arm64 => "linux/arm64/v8",
        }
    }
}

impl Default for Arch {
    fn default() -> Self {
        Arch::detect()
    }
}

fn default_mem_limit() -> String {
    "10g".to_string()
}

fn default_timeout() -> u64 {
    90
}

fn default_timeout_ref() -> u64 {
    900
}

/// Immutable per-repository descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoProfile {
    pub owner: String,
    pub repo: String,
    /// Full commit SHA the mirror and image are pinned to.
    pub commit: String,
    pub language: Language,
    /// Dockerfile text for the execution environment.
    pub container_recipe: String,
    /// Raw test command as authored; see `effective_test_cmd`.
    pub test_cmd: String,
    pub log_parser: LogParserKind,
    #[serde(default)]
    pub arch: Arch,
    /// Directories excluded from entity extraction (build artifacts,
    /// vendored code).
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    /// Maximum container memory.
    #[serde(default = "default_mem_limit")]
    pub mem_limit: String,
    /// Wall-clock timeout (seconds) for one candidate's test run.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Wall-clock timeout (seconds) for the gold run over the whole suite.
    #[serde(default = "default_timeout_ref")]
    pub timeout_ref: u64,
    /// Tests the profile declares flaky; excluded from idempotence claims.
    #[serde(default)]
    pub flaky_tests: Vec<String>,
}

impl RepoProfile {
    /// First 8 characters of the pinned commit.
    pub fn commit_short(&self) -> &str {
        &self.commit[..self.commit.len().min(8)]
    }

    /// `<owner>__<repo>.<commit8>`: the mirror repository's bare name and
    /// the prefix of every instance id derived from this profile.
    pub fn repo_name(&self) -> String {
        format!("{}__{}.{}", self.owner, self.repo, self.commit_short())
    }

    /// `<gh_org>/<owner>__<repo>.<commit8>`
    pub fn mirror_name(&self, config: &PipelineConfig) -> String {
        format!("{}/{}", config.org_gh, self.repo_name())
    }

    /// `<dh_org>/swesmith.<arch>.<owner>_1776_<repo>.<commit8>`, lowercased.
    pub fn image_name(&self, config: &PipelineConfig) -> String {
        format!(
            "{}/swesmith.{}.{}{}{}.{}",
            config.org_dh,
            self.arch.as_str(),
            self.owner,
            IMAGE_NAME_SEP,
            self.repo,
            self.commit_short()
        )
        .to_lowercase()
    }

    /// Test command with lint/type-check/build segments stripped.
    pub fn effective_test_cmd(&self) -> String {
        test_cmd::effective_test_cmd(&self.test_cmd)
    }

    /// Parse a raw test log with this profile's parser.
    pub fn parse_log(&self, log: &str) -> ParsedLog {
        parse_log(self.log_parser, log)
    }

    /// Whether a repo-relative path is testing-related. Test files are
    /// excluded from entity extraction but kept in the tree so the
    /// differential has something to run.
    pub fn is_test_path(&self, path: &Path) -> bool {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|f| f.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if file.starts_with("test") || stem.ends_with("test") || stem.ends_with(".spec") {
            return true;
        }
        path.components().any(|c| {
            matches!(
                c.as_os_str().to_string_lossy().as_ref(),
                "tests" | "test" | "specs" | "__tests__"
            )
        })
    }

    /// Whether a path is a source file this profile's adapter should walk.
    pub fn is_source_path(&self, path: &Path) -> bool {
        let name = path.to_string_lossy();
        if !self
            .language
            .extensions()
            .iter()
            .any(|ext| name.ends_with(ext))
        {
            return false;
        }
        if self.is_test_path(path) {
            return false;
        }
        !self
            .exclude_dirs
            .iter()
            .any(|d| path.components().any(|c| c.as_os_str().to_string_lossy() == *d))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.is_empty() || self.repo.is_empty() || self.commit.len() < 7 {
            return Err(ConfigError::InvalidValue {
                key: "profile".to_string(),
                message: format!(
                    "owner/repo/commit must be set (got {}/{}/{})",
                    self.owner, self.repo, self.commit
                ),
            });
        }
        if test_cmd::is_umbrella_command(&self.test_cmd) {
            return Err(ConfigError::UmbrellaTestCommand {
                profile: self.repo_name(),
                cmd: self.test_cmd.clone(),
            });
        }
        Ok(())
    }
}

/// Registry mapping repo names (and mirror names) to profiles.
#[derive(Default)]
pub struct Registry {
    profiles: HashMap<String, Arc<RepoProfile>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile under both its repo name and its mirror name.
    ///
    /// Registering the same `(owner, repo, commit)` twice is allowed only
    /// when the profiles are identical in every attribute.
    pub fn register(
        &mut self,
        profile: RepoProfile,
        config: &PipelineConfig,
    ) -> Result<Arc<RepoProfile>, ConfigError> {
        profile.validate()?;
        let key = profile.repo_name();
        if let Some(existing) = self.profiles.get(&key) {
            let same = serde_json::to_string(existing.as_ref()).ok()
                == serde_json::to_string(&profile).ok();
            if !same {
                return Err(ConfigError::ProfileConflict { key });
            }
            return Ok(Arc::clone(existing));
        }
        let mirror = profile.mirror_name(config);
        let arc = Arc::new(profile);
        self.profiles.insert(key, Arc::clone(&arc));
        self.profiles.insert(mirror, Arc::clone(&arc));
        Ok(arc)
    }

    /// Look up by repo name or mirror name.
    pub fn get(&self, key: &str) -> Result<Arc<RepoProfile>, ConfigError> {
        self.profiles
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProfile(key.to_string()))
    }

    /// Resolve a profile from an instance id
    /// (`<owner>__<repo>.<commit8>.<kind>__<hash>`).
    pub fn get_from_instance_id(&self, instance_id: &str) -> Result<Arc<RepoProfile>, ConfigError> {
        let repo_name = instance_id
            .rsplit_once('.')
            .map(|(prefix, _)| prefix)
            .unwrap_or(instance_id);
        self.get(repo_name)
    }

    /// Load one profile (or an array of profiles) from a JSON file.
    pub fn load_file(
        &mut self,
        path: &Path,
        config: &PipelineConfig,
    ) -> Result<Vec<Arc<RepoProfile>>, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: Vec<RepoProfile> = match serde_json::from_str::<Vec<RepoProfile>>(&raw) {
            Ok(list) => list,
            Err(_) => vec![serde_json::from_str::<RepoProfile>(&raw).map_err(|e| {
                ConfigError::ParseError {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?],
        };
        parsed
            .into_iter()
            .map(|p| self.register(p, config))
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn test_profile() -> RepoProfile {
    RepoProfile {
        owner: "o".to_string(),
        repo: "r".to_string(),
        commit: "abc1234def5678900000000000000000000000ff".to_string(),
        language: Language::Python,
        container_recipe: "FROM python:3.10\nWORKDIR /testbed\n".to_string(),
        test_cmd: "pytest --disable-warnings --color=no --tb=no --verbose".to_string(),
        log_parser: LogParserKind::Pytest,
        arch: Arch::X86_64,
        exclude_dirs: vec![],
        mem_limit: default_mem_limit(),
        timeout: default_timeout(),
        timeout_ref: default_timeout_ref(),
        flaky_tests: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, OwnerType, ProxyConfig};
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            github_token: None,
            org_gh: "swesmith".to_string(),
            org_dh: "swebench".to_string(),
            gh_owner_type: OwnerType::Org,
            llm: LlmConfig {
                base_url: "http://localhost".to_string(),
                model: "test".to_string(),
                api_keys: vec![],
                timeout: Duration::from_secs(1),
                max_retries: 0,
            },
            proxy: ProxyConfig::default(),
        }
    }

    #[test]
    fn derived_names() {
        let profile = test_profile();
        let config = test_config();
        assert_eq!(profile.repo_name(), "o__r.abc1234d");
        assert_eq!(profile.mirror_name(&config), "swesmith/o__r.abc1234d");
        assert_eq!(
            profile.image_name(&config),
            "swebench/swesmith.x86_64.o_1776_r.abc1234d"
        );
    }

    #[test]
    fn image_name_is_lowercased() {
        let mut profile = test_profile();
        profile.owner = "BigOwner".to_string();
        profile.repo = "SomeRepo".to_string();
        let config = test_config();
        assert_eq!(
            profile.image_name(&config),
            "swebench/swesmith.x86_64.bigowner_1776_somerepo.abc1234d"
        );
    }

    #[test]
    fn registry_round_trip_and_conflict() {
        let config = test_config();
        let mut registry = Registry::new();
        let p = registry.register(test_profile(), &config).unwrap();

        // Same key, same attributes: fine.
        registry.register(test_profile(), &config).unwrap();

        // Same key, different test command: conflict.
        let mut other = test_profile();
        other.test_cmd = "pytest -x".to_string();
        assert!(matches!(
            registry.register(other, &config),
            Err(ConfigError::ProfileConflict { .. })
        ));

        assert_eq!(registry.get("o__r.abc1234d").unwrap().repo, p.repo);
        assert_eq!(registry.get("swesmith/o__r.abc1234d").unwrap().repo, p.repo);
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn instance_id_resolution() {
        let config = test_config();
        let mut registry = Registry::new();
        registry.register(test_profile(), &config).unwrap();
        let p = registry
            .get_from_instance_id("o__r.abc1234d.func_pm_invert_return__ab12cd34")
            .unwrap();
        assert_eq!(p.repo_name(), "o__r.abc1234d");
    }

    #[test]
    fn umbrella_test_cmd_rejected() {
        let config = test_config();
        let mut registry = Registry::new();
        let mut p = test_profile();
        p.test_cmd = "make test".to_string();
        assert!(matches!(
            registry.register(p, &config),
            Err(ConfigError::UmbrellaTestCommand { .. })
        ));
    }

    #[test]
    fn test_path_detection() {
        let p = test_profile();
        assert!(p.is_test_path(&PathBuf::from("tests/test_add.py")));
        assert!(p.is_test_path(&PathBuf::from("pkg/foo_test.py")));
        assert!(p.is_test_path(&PathBuf::from("src/specs/thing.py")));
        assert!(!p.is_test_path(&PathBuf::from("src/add.py")));
    }

    #[test]
    fn source_path_respects_excludes() {
        let mut p = test_profile();
        p.exclude_dirs = vec!["vendor".to_string()];
        assert!(p.is_source_path(&PathBuf::from("src/add.py")));
        assert!(!p.is_source_path(&PathBuf::from("vendor/lib.py")));
        assert!(!p.is_source_path(&PathBuf::from("src/add.js")));
        assert!(!p.is_source_path(&PathBuf::from("tests/test_add.py")));
    }
}
