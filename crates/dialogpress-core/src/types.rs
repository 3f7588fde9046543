use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::compaction::estimate_tokens;

/// Author of a turn. Closed set: anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Summary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Summary => "summary",
        }
    }
}

/// One message unit in a conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub token_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>, token_count: u64) -> Self {
        Self {
            role,
            text: text.into(),
            token_count,
            created_at: Utc::now(),
        }
    }

    /// A user turn whose token count is estimated from its text.
    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = estimate_tokens(&text);
        Self::new(Role::User, text, tokens)
    }

    /// An assistant turn carrying the measured output token count.
    pub fn assistant(text: impl Into<String>, output_tokens: u64) -> Self {
        Self::new(Role::Assistant, text, output_tokens)
    }

    pub fn summary(text: impl Into<String>, output_tokens: u64) -> Self {
        Self::new(Role::Summary, text, output_tokens)
    }

    pub fn is_summary(&self) -> bool {
        self.role == Role::Summary
    }
}

/// Wire role used when a history is replayed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// A `{role, text}` pair as sent to the LLM collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub text: String,
}

impl PromptMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            text: text.into(),
        }
    }
}

/// Root settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    /// Price and context window overrides, keyed by model id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub pricing: HashMap<String, ModelPricing>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
    /// Request timeout for one completion call. Default: 60
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            catalog_id: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Uncompressed turns that trigger a compression. Default: 10
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Most recent turns kept verbatim next to the summary. Default: 2
    #[serde(default = "default_retain")]
    pub retain: usize,
    /// Model used for summaries. Defaults to the chat model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f64,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            retain: default_retain(),
            summary_model: None,
            summary_temperature: default_summary_temperature(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Run both pipelines at the same time (doubles simultaneous load)
    #[serde(default)]
    pub concurrent: bool,
    /// Hold the session lock for the whole comparison
    #[serde(default = "default_true")]
    pub serialize_with_send: bool,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            concurrent: false,
            serialize_with_send: true,
        }
    }
}

/// Static per-model pricing (currency units per 1000 tokens) and context limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub context_window: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://llm.api.cloud.yandex.net/foundationModels/v1/completion".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_model() -> String {
    "yandexgpt-lite".to_string()
}

fn default_system_prompt() -> String {
    "You are a sophisticated film critic.".to_string()
}

fn default_temperature() -> f64 {
    0.6
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_threshold() -> usize {
    10
}

fn default_retain() -> usize {
    2
}

fn default_summary_temperature() -> f64 {
    0.3
}

fn default_summary_max_tokens() -> u32 {
    500
}

fn default_port() -> u16 {
    5005
}
