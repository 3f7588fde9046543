use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compaction::{evaluate_trigger, TriggerDecision};
use crate::error::{EngineError, Result};
use crate::history::HistoryStore;
use crate::metrics::{MetricsAccumulator, MetricsSnapshot};
use crate::types::{Role, Turn};

/// Lifecycle of a session as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Empty,
    Active,
    Compressing,
    Error,
}

impl SessionPhase {
    pub fn as_u8(self) -> u8 {
        match self {
            SessionPhase::Empty => 0,
            SessionPhase::Active => 1,
            SessionPhase::Compressing => 2,
            SessionPhase::Error => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionPhase::Active,
            2 => SessionPhase::Compressing,
            3 => SessionPhase::Error,
            _ => SessionPhase::Empty,
        }
    }
}

/// Record of one applied compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionEvent {
    pub pre_tokens: u64,
    pub pre_turn_count: usize,
    pub summary_turn: Turn,
    pub post_tokens: u64,
}

impl CompressionEvent {
    pub fn tokens_saved(&self) -> u64 {
        self.pre_tokens.saturating_sub(self.post_tokens)
    }
}

/// What a compression would fold, computed before the summarizer runs.
#[derive(Debug, Clone)]
pub struct CompressionPlan {
    pub decision: TriggerDecision,
    /// Length of the history prefix replaced (includes a leading summary).
    pub range_len: usize,
    /// The turns handed to the summarizer, oldest first.
    pub turns: Vec<Turn>,
    /// User messages folded for the first time.
    pub folded_messages: u64,
}

/// Result of trying to apply a summary.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    Applied(CompressionEvent),
    /// The summary was not smaller than what it would replace; originals kept.
    Discarded { pre_tokens: u64, post_tokens: u64 },
}

/// All state of one conversation: live history, the archive of original
/// turns, metrics and the compression log.
///
/// Cloning is the staging mechanism: a request mutates a clone and the owner
/// swaps it in only when the request succeeds.
#[derive(Debug, Clone)]
pub struct Conversation {
    session_id: String,
    history: HistoryStore,
    archive: Vec<Turn>,
    metrics: MetricsAccumulator,
    compressions: Vec<CompressionEvent>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            session_id: generate_session_id(),
            history: HistoryStore::new(),
            archive: Vec::new(),
            metrics: MetricsAccumulator::new(),
            compressions: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append an original user or assistant turn.
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if turn.is_summary() {
            return Err(EngineError::internal_state(
                "summary turns enter the history only through compression",
            ));
        }
        self.metrics.record_append(turn.token_count, turn.role);
        self.archive.push(turn.clone());
        self.history.append(turn);
        Ok(())
    }

    /// Evaluate the trigger against the live history.
    pub fn plan_compression(&self, threshold: usize, retain: usize) -> Option<CompressionPlan> {
        let raw_turns = self.history.turns_since_compression();
        let decision = evaluate_trigger(raw_turns, threshold, retain);
        if !decision.should_compress {
            return None;
        }
        let lead = usize::from(self.history.starts_with_summary());
        let range_len = lead + decision.prefix_length;
        let turns: Vec<Turn> = self.history.turns()[..range_len].to_vec();
        let folded_messages = turns.iter().filter(|t| t.role == Role::User).count() as u64;
        debug!(
            session = %self.session_id,
            raw_turns,
            range_len,
            "compression trigger fired"
        );
        Some(CompressionPlan {
            decision,
            range_len,
            turns,
            folded_messages,
        })
    }

    /// Swap the planned prefix for `summary`, or discard the summary if it
    /// would not reduce the history.
    pub fn apply_compression(
        &mut self,
        plan: &CompressionPlan,
        summary: Turn,
    ) -> Result<CompressionOutcome> {
        if plan.range_len == 0 || plan.range_len > self.history.len() {
            return Err(EngineError::internal_state(format!(
                "planned prefix of {} no longer fits history of {} turns",
                plan.range_len,
                self.history.len()
            )));
        }
        let pre_tokens = self.history.total_tokens();
        let pre_turn_count = self.history.len();
        let folded_tokens: u64 = self.history.turns()[..plan.range_len]
            .iter()
            .map(|t| t.token_count)
            .sum();
        let post_tokens = pre_tokens - folded_tokens + summary.token_count;
        if post_tokens >= pre_tokens {
            return Ok(CompressionOutcome::Discarded {
                pre_tokens,
                post_tokens,
            });
        }

        self.history.compress(plan.range_len, summary.clone())?;
        self.metrics
            .record_compression(pre_tokens, post_tokens, plan.folded_messages);
        let event = CompressionEvent {
            pre_tokens,
            pre_turn_count,
            summary_turn: summary,
            post_tokens,
        };
        self.compressions.push(event.clone());
        Ok(CompressionOutcome::Applied(event))
    }

    /// Live (possibly compressed) history.
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Every original turn ever appended, never compressed.
    pub fn archive(&self) -> &[Turn] {
        &self.archive
    }

    pub fn compressions(&self) -> &[CompressionEvent] {
        &self.compressions
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop everything and start over with a fresh session id.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

fn generate_session_id() -> String {
    let ts = Utc::now().timestamp_millis();
    let rand_part: u32 = rand::random();
    format!("sess-{}-{:08x}", ts, rand_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, tokens: u64) -> Turn {
        Turn::new(role, format!("{:?} text", role), tokens)
    }

    fn exchange(conv: &mut Conversation, n: usize) {
        for _ in 0..n {
            conv.append(turn(Role::User, 10)).unwrap();
            conv.append(turn(Role::Assistant, 20)).unwrap();
        }
    }

    #[test]
    fn test_phase_round_trips_through_u8() {
        for phase in [
            SessionPhase::Empty,
            SessionPhase::Active,
            SessionPhase::Compressing,
            SessionPhase::Error,
        ] {
            assert_eq!(SessionPhase::from_u8(phase.as_u8()), phase);
        }
    }

    #[test]
    fn test_append_rejects_summary() {
        let mut conv = Conversation::new();
        assert!(conv.append(Turn::summary("s", 1)).is_err());
        assert!(conv.is_empty());
    }

    #[test]
    fn test_nine_turns_do_not_trigger() {
        let mut conv = Conversation::new();
        for i in 0..9 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            conv.append(turn(role, 10)).unwrap();
        }
        assert!(conv.plan_compression(10, 2).is_none());
        assert_eq!(conv.metrics().compression_count, 0);
    }

    #[test]
    fn test_tenth_turn_compresses_to_summary_plus_retained() {
        let mut conv = Conversation::new();
        exchange(&mut conv, 5);
        let plan = conv.plan_compression(10, 2).unwrap();
        assert_eq!(plan.range_len, 8);
        assert_eq!(plan.folded_messages, 4);

        let outcome = conv.apply_compression(&plan, Turn::summary("sum", 12)).unwrap();
        let CompressionOutcome::Applied(event) = outcome else {
            panic!("expected compression to apply");
        };
        assert_eq!(conv.history().len(), 1 + 2);
        assert_eq!(event.pre_tokens, 150);
        assert_eq!(event.post_tokens, 150 - 120 + 12);
        assert_eq!(event.pre_turn_count, 10);

        let m = conv.metrics();
        assert_eq!(m.compression_count, 1);
        assert_eq!(m.total_tokens_saved, event.tokens_saved());
        assert_eq!(m.current_full_tokens, 150);
        assert_eq!(m.current_compressed_tokens, 42);
        assert_eq!(m.compressed_messages, 4);
        assert_eq!(conv.archive().len(), 10);
    }

    #[test]
    fn test_rolling_summary_folds_previous_summary() {
        let mut conv = Conversation::new();
        exchange(&mut conv, 5);
        let plan = conv.plan_compression(10, 2).unwrap();
        conv.apply_compression(&plan, Turn::summary("first", 5)).unwrap();

        exchange(&mut conv, 4);
        // summary + 2 retained + 8 new raw turns
        let plan = conv.plan_compression(10, 2).unwrap();
        assert_eq!(plan.range_len, 1 + 8);
        assert!(plan.turns[0].is_summary());
        conv.apply_compression(&plan, Turn::summary("second", 6)).unwrap();

        assert_eq!(conv.history().len(), 3);
        assert_eq!(
            conv.history().turns().iter().filter(|t| t.is_summary()).count(),
            1
        );
        let m = conv.metrics();
        assert_eq!(m.compression_count, 2);
        let summed: u64 = conv.compressions().iter().map(|e| e.tokens_saved()).sum();
        assert_eq!(m.total_tokens_saved, summed);
        assert!(m.compressed_messages <= m.total_messages);
        assert_eq!(m.total_messages, 9);
        assert!(m.compression_ratio >= 0.0 && m.compression_ratio <= 1.0);
    }

    #[test]
    fn test_unhelpful_summary_is_discarded() {
        let mut conv = Conversation::new();
        exchange(&mut conv, 5);
        let plan = conv.plan_compression(10, 2).unwrap();
        let outcome = conv
            .apply_compression(&plan, Turn::summary("huge", 500))
            .unwrap();
        assert!(matches!(outcome, CompressionOutcome::Discarded { .. }));
        assert_eq!(conv.history().len(), 10);
        assert_eq!(conv.metrics().compression_count, 0);
    }

    #[test]
    fn test_stale_plan_is_internal_state_error() {
        let mut conv = Conversation::new();
        exchange(&mut conv, 5);
        let plan = conv.plan_compression(10, 2).unwrap();
        conv.clear();
        let err = conv.apply_compression(&plan, Turn::summary("s", 1)).unwrap_err();
        assert_eq!(err.kind(), "internal_state");
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut conv = Conversation::new();
        let old_id = conv.session_id().to_string();
        exchange(&mut conv, 5);
        let plan = conv.plan_compression(10, 2).unwrap();
        conv.apply_compression(&plan, Turn::summary("s", 1)).unwrap();

        conv.clear();
        assert!(conv.is_empty());
        assert!(conv.archive().is_empty());
        assert!(conv.compressions().is_empty());
        assert!(conv.metrics().is_zeroed());
        assert_ne!(conv.session_id(), old_id);
    }
}
