//! LLM integration for the bug and issue generators.
//!
//! A single object-safe [`LlmProvider`] trait fronts an OpenAI-compatible
//! endpoint with retry, backoff, and key rotation. The pipeline treats the
//! model as an unreliable oracle: every returned body is re-parsed and
//! checked against post-conditions before any artifact is written.

mod key_pool;
mod openai_compatible;
pub mod provider;
pub mod retry;

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::LlmError;

pub use key_pool::KeyPool;
pub use openai_compatible::OpenAiCompatibleProvider;
pub use provider::{
    extract_code_block, ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// Create an LLM provider from configuration.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    if config.api_keys.is_empty() {
        return Err(LlmError::NoApiKey {
            provider: "openai-compatible".to_string(),
        });
    }
    Ok(Arc::new(OpenAiCompatibleProvider::new(config)))
}
