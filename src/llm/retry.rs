//! Retry policy for LLM transport failures.

use std::time::Duration;

use crate::error::LlmError;

/// HTTP statuses worth retrying: rate limits and transient server errors.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Bounded exponential backoff: 500ms, 1s, 2s, 4s... capped at 30s.
pub fn retry_backoff_delay(attempt: u32) -> Duration {
    let base_ms = 500u64;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(exp.min(30_000))
}

/// Whether an error is transient and the call should be retried.
///
/// Auth failures and malformed-response errors propagate immediately:
/// retrying the same request against the same endpoint won't fix them.
pub fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RequestFailed { .. }
            | LlmError::RateLimited { .. }
            | LlmError::Timeout { .. }
            | LlmError::Http(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(retry_backoff_delay(0), Duration::from_millis(500));
        assert_eq!(retry_backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(retry_backoff_delay(10), Duration::from_secs(30));
        assert_eq!(retry_backoff_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn status_classification() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn error_classification() {
        assert!(is_retryable(&LlmError::RequestFailed {
            provider: "p".into(),
            reason: "500".into(),
        }));
        assert!(is_retryable(&LlmError::RateLimited {
            provider: "p".into(),
            retry_after: None,
        }));
        assert!(!is_retryable(&LlmError::AuthFailed { provider: "p".into() }));
        assert!(!is_retryable(&LlmError::InvalidResponse {
            provider: "p".into(),
            reason: "bad json".into(),
        }));
    }
}
