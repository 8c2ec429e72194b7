//! Pipeline configuration.
//!
//! Everything here comes from the environment plus CLI overrides. The
//! pipeline reads its configuration once at startup and fails fast on
//! anything missing; no stage re-reads the environment later.

use std::env;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default GitHub organization hosting mirror repositories.
pub const DEFAULT_ORG_GH: &str = "swesmith";
/// Default Docker Hub organization hosting execution images.
pub const DEFAULT_ORG_DH: &str = "swebench";

/// Whether mirror repositories live under a user account or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum OwnerType {
    User,
    Org,
}

impl std::str::FromStr for OwnerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "org" => Ok(Self::Org),
            other => Err(ConfigError::InvalidValue {
                key: "gh_owner_type".to_string(),
                message: format!("expected 'user' or 'org', got '{other}'"),
            }),
        }
    }
}

/// LLM call-layer settings shared by the bug generators and the issue
/// generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// API keys rotated round-robin across workers.
    pub api_keys: Vec<SecretString>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry attempts for transient transport failures.
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn from_env(model_override: Option<&str>) -> Self {
        let base_url = env::var("SWESMITH_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = model_override
            .map(str::to_string)
            .or_else(|| env::var("SWESMITH_LLM_MODEL").ok())
            .unwrap_or_else(|| "gpt-4o".to_string());
        // A comma-separated pool; workers pull keys round-robin.
        let api_keys = env::var("SWESMITH_LLM_API_KEYS")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| SecretString::from(k.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let timeout = env::var("SWESMITH_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Self {
            base_url,
            model,
            api_keys,
            timeout,
            max_retries: 3,
        }
    }
}

/// Proxy settings forwarded into task containers.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        let pick = |upper: &str, lower: &str| {
            env::var(upper).ok().or_else(|| env::var(lower).ok())
        };
        Self {
            http_proxy: pick("HTTP_PROXY", "http_proxy"),
            https_proxy: pick("HTTPS_PROXY", "https_proxy"),
            no_proxy: pick("NO_PROXY", "no_proxy"),
        }
    }

    /// True when any proxy endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.http_proxy.is_some() || self.https_proxy.is_some()
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Token with push access to the mirror org. Required for mirror
    /// creation and branch pushes; optional for local-only stages.
    pub github_token: Option<SecretString>,
    /// GitHub namespace for mirror repositories.
    pub org_gh: String,
    /// Docker Hub namespace for execution images.
    pub org_dh: String,
    pub gh_owner_type: OwnerType,
    pub llm: LlmConfig,
    pub proxy: ProxyConfig,
}

impl PipelineConfig {
    /// Read configuration from the environment with CLI overrides.
    pub fn from_env(
        owner_type_override: Option<OwnerType>,
        llm_model_override: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let github_token = env::var("GITHUB_TOKEN").ok().map(SecretString::from);
        let org_gh = env::var("SWESMITH_ORG_GH").unwrap_or_else(|_| DEFAULT_ORG_GH.to_string());
        let org_dh = env::var("SWESMITH_ORG_DH").unwrap_or_else(|_| DEFAULT_ORG_DH.to_string());
        let gh_owner_type = match owner_type_override {
            Some(ot) => ot,
            None => match env::var("SWESMITH_GH_OWNER_TYPE") {
                Ok(raw) => raw.parse()?,
                Err(_) => OwnerType::Org,
            },
        };

        if org_gh.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "SWESMITH_ORG_GH".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            github_token,
            org_gh,
            org_dh,
            gh_owner_type,
            llm: LlmConfig::from_env(llm_model_override),
            proxy: ProxyConfig::from_env(),
        })
    }

    /// Fail unless a GitHub token is present. Stages that push to the
    /// mirror call this before doing any work.
    pub fn require_github_token(&self) -> Result<&SecretString, ConfigError> {
        self.github_token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("GITHUB_TOKEN".to_string()))
    }
}
