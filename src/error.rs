//! Error types for the task-instance synthesis pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Bug generation error: {0}")]
    Gen(#[from] GenError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Gather error: {0}")]
    Gather(#[from] GatherError),

    #[error("Issue generation error: {0}")]
    Issue(#[from] IssueError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("SFT distillation error: {0}")]
    Sft(#[from] SftError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map an error onto the pipeline's process exit code.
    ///
    /// 1 = configuration, 2 = network/proxy precheck, 3 = container bridge,
    /// 4 = no predictions (distiller), 5 = all instances failed. Everything
    /// else is a generic failure and also exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Container(ContainerError::ProxyUnreachable { .. }) => 2,
            Error::Container(ContainerError::BridgeUnreachable { .. }) => 3,
            Error::Sft(SftError::NoPredictions { .. }) => 4,
            Error::Validation(ValidationError::AllInstancesFailed { .. }) => 5,
            _ => 1,
        }
    }
}

/// Configuration-related errors. All of these fail fast before any work.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No profile registered for key: {0}")]
    UnknownProfile(String),

    #[error("Profile conflict for {key}: two profiles with the same (owner, repo, commit) disagree")]
    ProfileConflict { key: String },

    #[error(
        "Test command for {profile} is an umbrella or installer command ({cmd}); \
         profiles must invoke the test runner directly"
    )]
    UmbrellaTestCommand { profile: String, cmd: String },

    #[error("Failed to parse profile file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Git transport and working-tree errors.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {args:?} failed in {dir}: {stderr}")]
    CommandFailed {
        args: Vec<String>,
        dir: PathBuf,
        stderr: String,
    },

    #[error("git {args:?} timed out after {timeout:?}")]
    Timeout { args: Vec<String>, timeout: Duration },

    #[error("Failed to clone {url}: both SSH and HTTPS transports failed")]
    CloneFailed { url: String },

    #[error("Patch does not apply cleanly in {dir}")]
    ApplyFailed { dir: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Container bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Container bridge unreachable at {endpoint}: {message}; operator action required")]
    BridgeUnreachable { endpoint: String, message: String },

    #[error("Proxy precheck failed for {endpoint}: {message}")]
    ProxyUnreachable { endpoint: String, message: String },

    #[error("Failed to start container from {image}: {message}")]
    StartFailed { image: String, message: String },

    #[error("Image build failed for {image}: see {log_path}")]
    BuildFailed { image: String, log_path: PathBuf },

    #[error("Image pull failed for {image}: {message}")]
    PullFailed { image: String, message: String },

    #[error("Exec in container {name} failed: {message}")]
    ExecFailed { name: String, message: String },

    #[error("Copy into container {name} failed: {message}")]
    CopyFailed { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entity-extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("No language adapter for tag {0}")]
    UnsupportedLanguage(String),

    #[error("Failed to load grammar for {language}: {message}")]
    GrammarLoad { language: String, message: String },

    #[error("Failed to read {path}: {message}")]
    FileRead { path: PathBuf, message: String },
}

/// Bug-generator errors.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("Rewrite for {entity} does not change the source")]
    NoopRewrite { entity: String },

    #[error("Rewrite for {entity} changed the entity signature")]
    SignatureChanged { entity: String },

    #[error("Rewrite for {entity} does not parse")]
    RewriteUnparseable { entity: String },

    #[error("Failed to write bug artifact to {path}: {message}")]
    ArtifactWrite { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM call-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("LLM provider {provider} rate limited (retry after {retry_after:?})")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("LLM provider {provider} rejected authentication")]
    AuthFailed { provider: String },

    #[error("LLM response from {provider} is malformed: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("LLM call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("No API key configured for LLM provider {provider}")]
    NoApiKey { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Validator errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Gold run timed out after {timeout:?} for {image}; not starting candidate validation")]
    GoldTimedOut { image: String, timeout: Duration },

    #[error("Gold run produced no parseable test output for {image}")]
    GoldUnparseable { image: String },

    #[error("Container failure during validation: {0}")]
    Container(String),

    #[error("All {total} candidate instances failed validation")]
    AllInstancesFailed { total: usize },

    #[error("Manifest {path} is missing or malformed: {message}")]
    BadManifest { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Instance-gathering errors.
#[derive(Debug, thiserror::Error)]
pub enum GatherError {
    #[error(
        "Branch {branch} already exists on {mirror} with different contents; \
         refusing to overwrite"
    )]
    BranchContentMismatch { branch: String, mirror: String },

    #[error("Failed to apply patch for {instance_id} onto the mirror clone")]
    PatchApply { instance_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Issue-generation errors.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("Issue config {path} is invalid: {message}")]
    BadConfig { path: PathBuf, message: String },

    #[error("No instances to generate issues for")]
    NoInstances,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dataset-assembly errors. Schema violations are fatal.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Instance {instance_id} is missing a problem_statement")]
    MissingProblemStatement { instance_id: String },

    #[error("Schema violation for {instance_id}: {message}")]
    SchemaViolation {
        instance_id: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trajectory/SFT distiller errors.
#[derive(Debug, thiserror::Error)]
pub enum SftError {
    #[error("No predictions produced from {dir}")]
    NoPredictions { dir: PathBuf },

    #[error("Trajectory {path} is malformed: {message}")]
    BadTrajectory { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
