use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Running counters describing compression effectiveness for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsAccumulator {
    total_messages: u64,
    compressed_messages: u64,
    compression_count: u64,
    total_tokens_saved: u64,
    current_full_tokens: u64,
    current_compressed_tokens: u64,
}

/// Point-in-time copy of the counters plus the derived ratio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_messages: u64,
    pub compressed_messages: u64,
    pub compression_count: u64,
    pub total_tokens_saved: u64,
    pub current_full_tokens: u64,
    pub current_compressed_tokens: u64,
    /// `current_compressed_tokens / current_full_tokens`, 0 for an empty session.
    pub compression_ratio: f64,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one original turn entering the history.
    ///
    /// Only user turns count as messages. Summary turns are ignored here;
    /// they are accounted through [`MetricsAccumulator::record_compression`].
    pub fn record_append(&mut self, token_count: u64, role: Role) {
        match role {
            Role::User => self.total_messages += 1,
            Role::Assistant => {}
            Role::Summary => return,
        }
        self.current_full_tokens += token_count;
        self.current_compressed_tokens += token_count;
    }

    /// Account for a prefix of `pre_tokens` history replaced by a history of
    /// `post_tokens`. Callers guarantee `post_tokens < pre_tokens`.
    pub fn record_compression(&mut self, pre_tokens: u64, post_tokens: u64, folded_messages: u64) {
        self.compression_count += 1;
        self.total_tokens_saved += pre_tokens.saturating_sub(post_tokens);
        self.current_compressed_tokens = post_tokens;
        self.compressed_messages =
            (self.compressed_messages + folded_messages).min(self.total_messages);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let compression_ratio = if self.current_full_tokens == 0 {
            0.0
        } else {
            (self.current_compressed_tokens as f64 / self.current_full_tokens as f64).clamp(0.0, 1.0)
        };
        MetricsSnapshot {
            total_messages: self.total_messages,
            compressed_messages: self.compressed_messages,
            compression_count: self.compression_count,
            total_tokens_saved: self.total_tokens_saved,
            current_full_tokens: self.current_full_tokens,
            current_compressed_tokens: self.current_compressed_tokens,
            compression_ratio,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn compression_count(&self) -> u64 {
        self.compression_count
    }
}

impl MetricsSnapshot {
    /// True when every counter is zero.
    pub fn is_zeroed(&self) -> bool {
        self.total_messages == 0
            && self.compressed_messages == 0
            && self.compression_count == 0
            && self.total_tokens_saved == 0
            && self.current_full_tokens == 0
            && self.current_compressed_tokens == 0
            && self.compression_ratio == 0.0
    }
}
