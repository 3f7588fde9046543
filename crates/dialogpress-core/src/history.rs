use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::types::{Role, Turn};

/// Ordered turn log for one session.
///
/// Append-only except for [`HistoryStore::compress`], which swaps the oldest
/// prefix for a single summary turn in one step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryStore {
    turns: Vec<Turn>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Owned copy of the history, in order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Replace `[0, prefix_length)` with `summary`.
    pub fn compress(&mut self, prefix_length: usize, summary: Turn) -> Result<()> {
        if prefix_length == 0 {
            return Err(EngineError::internal_state("compression prefix is empty"));
        }
        if prefix_length > self.turns.len() {
            return Err(EngineError::internal_state(format!(
                "compression prefix of {} exceeds history of {} turns",
                prefix_length,
                self.turns.len()
            )));
        }
        if summary.role != Role::Summary {
            return Err(EngineError::internal_state(format!(
                "compression expects a summary turn, got {}",
                summary.role.as_str()
            )));
        }
        // splice keeps the swap a single Vec operation
        self.turns.splice(0..prefix_length, std::iter::once(summary));
        Ok(())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn total_tokens(&self) -> u64 {
        self.turns.iter().map(|t| t.token_count).sum()
    }

    /// Number of raw turns not yet folded into a summary.
    pub fn turns_since_compression(&self) -> usize {
        self.turns.iter().filter(|t| !t.is_summary()).count()
    }

    pub fn starts_with_summary(&self) -> bool {
        self.turns.first().map(Turn::is_summary).unwrap_or(false)
    }
}
