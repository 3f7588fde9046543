use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use dialogpress_core::compaction::estimate_tokens;
use dialogpress_core::error::{EngineError, Result};
use dialogpress_core::failure::error_from_status;
use dialogpress_core::models::resolve_pricing;
use dialogpress_core::types::{ModelPricing, PromptMessage, PromptRole, ProviderConfig};

/// Per-call generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// One model reply with measured usage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub elapsed_ms: u64,
}

/// The language model behind the engine.
///
/// Implementations do no retries; every failure is mapped onto
/// [`EngineError`] and handed back to the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[PromptMessage], params: &InvokeParams) -> Result<Completion>;
}

/// Estimated size of a prompt in tokens.
pub fn estimate_prompt_tokens(messages: &[PromptMessage]) -> u64 {
    messages.iter().map(|m| estimate_tokens(&m.text)).sum()
}

/// Reject a prompt that cannot fit the model's context window.
pub fn check_context_window(model: &str, prompt_tokens: u64, pricing: &ModelPricing) -> Result<()> {
    if prompt_tokens > pricing.context_window {
        return Err(EngineError::Quota {
            model: model.to_string(),
            prompt_tokens,
            limit: pricing.context_window,
        });
    }
    Ok(())
}

/// Client for the Yandex Foundation Models completion endpoint.
pub struct YandexGptClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    catalog_id: Option<String>,
    pricing: HashMap<String, ModelPricing>,
}

impl YandexGptClient {
    pub fn new(provider: &ProviderConfig, pricing: HashMap<String, ModelPricing>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(provider.timeout_secs))
            .build()
            .map_err(|e| EngineError::provider(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: provider.endpoint.clone(),
            api_key: provider.api_key.clone(),
            catalog_id: provider.catalog_id.clone(),
            pricing,
        })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EngineError::provider("YANDEX_API_KEY is not configured"))?;
        let catalog_id = self
            .catalog_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| EngineError::provider("YANDEX_CATALOG_ID is not configured"))?;
        Ok((api_key, catalog_id))
    }
}

/// Request body in the Foundation Models completion format.
pub fn build_request_body(
    catalog_id: &str,
    messages: &[PromptMessage],
    params: &InvokeParams,
) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                PromptRole::System => "system",
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            };
            json!({ "role": role, "text": m.text })
        })
        .collect();
    json!({
        "modelUri": format!("gpt://{}/{}/latest", catalog_id, params.model),
        "completionOptions": {
            "stream": false,
            "temperature": params.temperature,
            "maxTokens": params.max_tokens,
        },
        "messages": messages,
    })
}

/// Extract `(text, input_tokens, output_tokens)` from a completion response.
pub fn parse_completion(body: &Value) -> Result<(String, u64, u64)> {
    let result = body
        .get("result")
        .ok_or_else(|| EngineError::provider("response has no `result` field"))?;
    let text = result
        .get("alternatives")
        .and_then(|a| a.get(0))
        .and_then(|a| a.get("message"))
        .and_then(|m| m.get("text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| EngineError::provider("response has no alternatives[0].message.text"))?
        .to_string();
    let usage = result.get("usage");
    let input_tokens = usage.and_then(|u| token_field(u, "inputTextTokens")).unwrap_or(0);
    let output_tokens = usage.and_then(|u| token_field(u, "completionTokens")).unwrap_or(0);
    Ok((text, input_tokens, output_tokens))
}

/// Usage counters arrive either as numbers or as numeric strings.
fn token_field(usage: &Value, key: &str) -> Option<u64> {
    match usage.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn map_reqwest_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        EngineError::transient(e)
    } else {
        EngineError::provider(e)
    }
}

#[async_trait]
impl LlmClient for YandexGptClient {
    async fn invoke(&self, messages: &[PromptMessage], params: &InvokeParams) -> Result<Completion> {
        let (api_key, catalog_id) = self.credentials()?;
        let pricing = resolve_pricing(&params.model, &self.pricing);
        let prompt_tokens = estimate_prompt_tokens(messages);
        check_context_window(&params.model, prompt_tokens, &pricing)?;

        let body = build_request_body(catalog_id, messages, params);
        let started = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Api-Key {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error_from_status(
                status.as_u16(),
                &text,
                &params.model,
                prompt_tokens,
                pricing.context_window,
            ));
        }

        let json: Value = response.json().await.map_err(map_reqwest_error)?;
        let (text, input_tokens, output_tokens) = parse_completion(&json)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            model = %params.model,
            input_tokens,
            output_tokens,
            elapsed_ms,
            "completion received"
        );
        Ok(Completion {
            text,
            input_tokens,
            output_tokens,
            elapsed_ms,
        })
    }
}
