//! Generic OpenAI-compatible chat completions provider.
//!
//! Speaks the `/chat/completions` wire format against any compatible
//! endpoint. Transient failures retry with bounded exponential backoff;
//! every request draws the next key from the rotation pool.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::key_pool::KeyPool;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};
use crate::llm::retry::{is_retryable_status, retry_backoff_delay};

const PROVIDER_NAME: &str = "openai-compatible";

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    model: String,
    keys: KeyPool,
    max_retries: u32,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            keys: KeyPool::new(config.api_keys.clone()),
            max_retries: config.max_retries,
        }
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let key = self.keys.next_key(PROVIDER_NAME)?;
        let body = WireRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        let wire: WireResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            reason: e.to_string(),
        })?;
        let content = wire
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: "response carried no choices".to_string(),
            })?;
        let usage = wire.usage.unwrap_or_default();
        Ok(CompletionResponse {
            content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }

    fn status_of(err: &LlmError) -> Option<u16> {
        match err {
            LlmError::RequestFailed { reason, .. } => reason
                .strip_prefix("HTTP ")
                .and_then(|r| r.split(':').next())
                .and_then(|s| s.parse().ok()),
            LlmError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let transient = match Self::status_of(&err) {
                        Some(status) => is_retryable_status(status),
                        None => matches!(err, LlmError::Http(_) | LlmError::Timeout { .. }),
                    };
                    if !transient || attempt == self.max_retries {
                        return Err(err);
                    }
                    let delay = retry_backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "LLM request failed, retrying"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        // Loop always returns inside; reachable only if max_retries wrapped.
        Err(last_error.unwrap_or(LlmError::RequestFailed {
            provider: PROVIDER_NAME.to_string(),
            reason: "retry loop exited unexpectedly".to_string(),
        }))
    }
}
