use thiserror::Error;

/// Failure taxonomy of the engine. Every variant is scoped to one request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Empty or malformed input. Nothing was mutated.
    #[error("invalid message: {message}")]
    Validation { message: String },

    /// The prompt does not fit the selected model's context window.
    #[error("prompt of ~{prompt_tokens} tokens exceeds the {model} context window of {limit} tokens")]
    Quota {
        model: String,
        prompt_tokens: u64,
        limit: u64,
    },

    /// Network, timeout, rate limit or 5xx from the provider. Safe to retry.
    #[error("transient provider failure: {message}")]
    Transient { message: String },

    /// Compression attempted against a malformed or empty history.
    #[error("internal state error: {message}")]
    InternalState { message: String },

    /// Any other provider failure (auth, malformed payload).
    #[error("provider error: {message}")]
    Provider { message: String },
}

impl EngineError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn internal_state(message: impl Into<String>) -> Self {
        Self::InternalState {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn provider(message: impl std::fmt::Display) -> Self {
        Self::Provider {
            message: message.to_string(),
        }
    }

    /// Short machine-readable kind, used in API bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Quota { .. } => "quota",
            Self::Transient { .. } => "transient",
            Self::InternalState { .. } => "internal_state",
            Self::Provider { .. } => "provider",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
