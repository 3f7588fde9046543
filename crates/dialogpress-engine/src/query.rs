use serde::Serialize;
use tracing::debug;

use dialogpress_core::error::Result;
use dialogpress_core::models::{calculate_cost, resolve_pricing, round_to};
use dialogpress_core::types::{PromptMessage, Role, Settings, Turn};

use crate::invoke::{check_context_window, estimate_prompt_tokens, InvokeParams, LlmClient};

/// Prefix put in front of a summary turn when it is replayed to the model.
pub const SUMMARY_PREFIX: &str = "Summary of the earlier conversation:";

/// Usage and cost of one model call, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Cost in RUB, rounded to 4 decimals.
    pub cost_rub: f64,
    /// Wall-clock seconds, rounded to 2 decimals.
    pub response_time: f64,
    /// Turns of history sent along with the message.
    pub history_messages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub response: String,
    pub metrics: QueryMetrics,
}

/// Replay a history for the model: system prompt first, summaries as system
/// messages, then the new message.
pub fn build_prompt(system_prompt: &str, history: &[Turn], message: &str) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 2);
    prompt.push(PromptMessage::system(system_prompt));
    for turn in history {
        prompt.push(match turn.role {
            Role::User => PromptMessage::user(turn.text.as_str()),
            Role::Assistant => PromptMessage::assistant(turn.text.as_str()),
            Role::Summary => PromptMessage::system(format!("{} {}", SUMMARY_PREFIX, turn.text)),
        });
    }
    prompt.push(PromptMessage::user(message));
    prompt
}

/// Generation parameters for the chat model.
pub fn chat_params(settings: &Settings) -> InvokeParams {
    InvokeParams {
        model: settings.chat.model.clone(),
        temperature: settings.chat.temperature,
        max_tokens: settings.chat.max_tokens,
    }
}

/// Send `message` on top of `history` and measure the call.
///
/// Shared by `send` and both comparison pipelines. Never touches session
/// state; the history is a snapshot owned by the caller.
pub async fn execute_query(
    client: &dyn LlmClient,
    settings: &Settings,
    history: &[Turn],
    message: &str,
) -> Result<QueryResult> {
    let params = chat_params(settings);
    let pricing = resolve_pricing(&params.model, &settings.pricing);
    let prompt = build_prompt(&settings.chat.system_prompt, history, message);
    check_context_window(&params.model, estimate_prompt_tokens(&prompt), &pricing)?;

    let started = std::time::Instant::now();
    let completion = client.invoke(&prompt, &params).await?;
    let elapsed = started.elapsed().as_secs_f64();

    let cost = calculate_cost(&pricing, completion.input_tokens, completion.output_tokens);
    let metrics = QueryMetrics {
        input_tokens: completion.input_tokens,
        output_tokens: completion.output_tokens,
        total_tokens: completion.input_tokens + completion.output_tokens,
        cost_rub: round_to(cost, 4),
        response_time: round_to(elapsed, 2),
        history_messages: history.len(),
    };
    debug!(
        model = %params.model,
        history = history.len(),
        total_tokens = metrics.total_tokens,
        "query executed"
    );
    Ok(QueryResult {
        response: completion.text,
        metrics,
    })
}
