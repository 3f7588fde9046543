use tracing::debug;

use dialogpress_core::compaction::{build_summary_instruction, estimate_tokens, serialize_turns};
use dialogpress_core::error::{EngineError, Result};
use dialogpress_core::types::{PromptMessage, Settings, Turn};

use crate::invoke::{InvokeParams, LlmClient};

/// Generation parameters for summaries; the chat model unless overridden.
pub fn summary_params(settings: &Settings) -> InvokeParams {
    InvokeParams {
        model: settings
            .compression
            .summary_model
            .clone()
            .unwrap_or_else(|| settings.chat.model.clone()),
        temperature: settings.compression.summary_temperature,
        max_tokens: settings.compression.summary_max_tokens,
    }
}

/// Condense `turns` into one summary turn.
///
/// The token count of the result is the measured output of the call, falling
/// back to the estimate when the provider reports none.
pub async fn summarize(client: &dyn LlmClient, params: &InvokeParams, turns: &[Turn]) -> Result<Turn> {
    if turns.is_empty() {
        return Err(EngineError::internal_state("nothing to summarize"));
    }
    let prompt = vec![
        PromptMessage::system(build_summary_instruction()),
        PromptMessage::user(serialize_turns(turns)),
    ];
    let completion = client.invoke(&prompt, params).await?;
    let text = completion.text.trim().to_string();
    if text.is_empty() {
        return Err(EngineError::provider("summarizer returned an empty summary"));
    }
    let tokens = if completion.output_tokens > 0 {
        completion.output_tokens
    } else {
        estimate_tokens(&text)
    };
    debug!(turns = turns.len(), summary_tokens = tokens, "summary produced");
    Ok(Turn::summary(text, tokens))
}
