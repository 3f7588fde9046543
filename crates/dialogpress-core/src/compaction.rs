use serde::Serialize;

use crate::types::Turn;

/// Approximate characters per token for estimation purposes.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Default number of uncompressed turns that triggers a compression.
pub const DEFAULT_THRESHOLD: usize = 10;

/// Default number of most recent turns kept verbatim after a compression.
pub const DEFAULT_RETAIN: usize = 2;

/// Estimate the token count of a text: chars / 4, rounded up, at least 1
/// for non-empty text.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    if chars == 0 {
        return 0;
    }
    chars.div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Outcome of evaluating the compression policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerDecision {
    pub should_compress: bool,
    /// Number of raw (non-summary) turns to fold into the summary.
    pub prefix_length: usize,
}

impl TriggerDecision {
    fn skip() -> Self {
        Self {
            should_compress: false,
            prefix_length: 0,
        }
    }
}

/// Decide whether to compress.
///
/// Fires when `turns_since_last_compression >= threshold`; the most recent
/// `retain` turns are kept out of the prefix.
pub fn evaluate_trigger(
    turns_since_last_compression: usize,
    threshold: usize,
    retain: usize,
) -> TriggerDecision {
    if threshold == 0 || turns_since_last_compression < threshold {
        return TriggerDecision::skip();
    }
    let prefix_length = turns_since_last_compression.saturating_sub(retain);
    if prefix_length == 0 {
        return TriggerDecision::skip();
    }
    TriggerDecision {
        should_compress: true,
        prefix_length,
    }
}

/// Instruction sent ahead of the turns being summarized.
pub fn build_summary_instruction() -> String {
    "Condense the following exchange into a short summary. Preserve the facts, \
     decisions, user preferences, and open questions that matter for continuing \
     the conversation. Output only the summary, no preamble."
        .to_string()
}

/// Serialize turns into the text block handed to the summarizer.
pub fn serialize_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("[{}] {}", t.role.as_str(), t.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
