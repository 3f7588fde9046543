use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Reason a completion call failed, derived from status code and body text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    RateLimit,
    Auth,
    Timeout,
    ContextLength,
    Unknown,
}

/// Classify an error message into a failure reason.
pub fn classify_error(error_msg: &str) -> FailureReason {
    let lower = error_msg.to_lowercase();

    if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("resource_exhausted")
    {
        return FailureReason::RateLimit;
    }

    if lower.contains("context window")
        || lower.contains("context length")
        || lower.contains("context_length")
        || lower.contains("too many tokens")
        || lower.contains("number of input tokens")
        || lower.contains("maximum context")
    {
        return FailureReason::ContextLength;
    }

    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("unauthenticated")
        || lower.contains("forbidden")
        || lower.contains("permission_denied")
        || lower.contains("invalid api key")
    {
        return FailureReason::Auth;
    }

    if lower.contains("timeout")
        || lower.contains("408")
        || lower.contains("timed out")
        || lower.contains("etimedout")
        || lower.contains("econnreset")
        || lower.contains("unavailable")
    {
        return FailureReason::Timeout;
    }

    FailureReason::Unknown
}

/// Map an HTTP failure from the provider onto the engine taxonomy.
///
/// 429 and 5xx are transient; a 400 that mentions the context limit is a
/// quota error; everything else is a provider error.
pub fn error_from_status(
    status: u16,
    body: &str,
    model: &str,
    prompt_tokens: u64,
    limit: u64,
) -> EngineError {
    let reason = classify_error(body);
    match (status, reason) {
        (_, FailureReason::ContextLength) => EngineError::Quota {
            model: model.to_string(),
            prompt_tokens,
            limit,
        },
        (429, _) | (500..=599, _) | (_, FailureReason::RateLimit) | (_, FailureReason::Timeout) => {
            EngineError::transient(format!("HTTP {}: {}", status, body.trim()))
        }
        _ => EngineError::provider(format!("HTTP {}: {}", status, body.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        assert_eq!(classify_error("429 Too Many Requests"), FailureReason::RateLimit);
        assert_eq!(classify_error("rate limit exceeded"), FailureReason::RateLimit);
        assert_eq!(classify_error("RESOURCE_EXHAUSTED"), FailureReason::RateLimit);
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(classify_error("401 Unauthorized"), FailureReason::Auth);
        assert_eq!(classify_error("invalid api key"), FailureReason::Auth);
        assert_eq!(classify_error("PERMISSION_DENIED"), FailureReason::Auth);
    }

    #[test]
    fn test_classify_timeout() {
        assert_eq!(classify_error("request timed out"), FailureReason::Timeout);
        assert_eq!(classify_error("ETIMEDOUT"), FailureReason::Timeout);
    }

    #[test]
    fn test_classify_context_length() {
        assert_eq!(
            classify_error("Number of input tokens must be no more than 8000"),
            FailureReason::ContextLength
        );
        assert_eq!(classify_error("context window exceeded"), FailureReason::ContextLength);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_error("something went wrong"), FailureReason::Unknown);
    }

    #[test]
    fn test_error_from_status() {
        assert_eq!(error_from_status(503, "", "m", 1, 10).kind(), "transient");
        assert_eq!(error_from_status(429, "slow down", "m", 1, 10).kind(), "transient");
        assert_eq!(error_from_status(401, "Unauthorized", "m", 1, 10).kind(), "provider");

        let quota = error_from_status(400, "Number of input tokens must be no more than 10", "m", 12, 10);
        assert_eq!(
            quota,
            EngineError::Quota {
                model: "m".to_string(),
                prompt_tokens: 12,
                limit: 10
            }
        );
    }
}
