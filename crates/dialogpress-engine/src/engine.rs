use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use dialogpress_core::compaction::estimate_tokens;
use dialogpress_core::error::{EngineError, Result};
use dialogpress_core::logging::emit_compression_event;
use dialogpress_core::metrics::MetricsSnapshot;
use dialogpress_core::session::{CompressionOutcome, Conversation, SessionPhase};
use dialogpress_core::types::{Role, Settings, Turn};

use crate::comparison::{run_comparison, ComparisonInput, ComparisonResult};
use crate::invoke::LlmClient;
use crate::query::{execute_query, QueryMetrics};
use crate::session::{PhaseRestore, SessionHandle};
use crate::summarizer::{summarize, summary_params};

/// Longest message accepted, in characters.
pub const MAX_MESSAGE_CHARS: usize = 32_000;

/// Reply to one `send`.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub response: String,
    pub compression_triggered: bool,
    pub compression_stats: MetricsSnapshot,
    pub metrics: QueryMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_error: Option<String>,
}

/// Counters plus session state, as returned by `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub phase: SessionPhase,
    pub history_length: usize,
    pub session_id: String,
}

impl StatsReport {
    /// Report for a session that was never created.
    pub fn empty(session_id: &str) -> Self {
        Self {
            metrics: MetricsSnapshot::default(),
            phase: SessionPhase::Empty,
            history_length: 0,
            session_id: session_id.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct CompressionStep {
    applied: bool,
    error: Option<String>,
    /// The conversation was found inconsistent.
    broken: bool,
}

/// Trim and bound-check a user message.
pub fn validate_message(message: &str) -> Result<&str> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation("message is empty"));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(EngineError::validation(format!(
            "message is {} characters, limit is {}",
            chars, MAX_MESSAGE_CHARS
        )));
    }
    Ok(trimmed)
}

/// History to replay ahead of the message just appended.
fn prior_history(conversation: &Conversation) -> &[Turn] {
    let turns = conversation.history().turns();
    match turns.last() {
        Some(last) if last.role == Role::User => &turns[..turns.len() - 1],
        _ => turns,
    }
}

/// The compression engine: sends, compares and reports over sessions.
#[derive(Clone)]
pub struct Engine {
    client: Arc<dyn LlmClient>,
    settings: Arc<Settings>,
}

impl Engine {
    pub fn new(client: Arc<dyn LlmClient>, settings: Settings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Send a user message and record the exchange.
    ///
    /// Works on a staged copy of the conversation; nothing is committed
    /// unless the model call succeeds.
    pub async fn send(&self, session: &SessionHandle, message: &str) -> Result<SendOutcome> {
        let message = validate_message(message)?;
        let mut guard = session.lock().await;
        self.send_locked(session, &mut guard, message).await
    }

    /// `send` for a caller already holding the session lock.
    pub(crate) async fn send_locked(
        &self,
        session: &SessionHandle,
        conversation: &mut Conversation,
        message: &str,
    ) -> Result<SendOutcome> {
        let message = validate_message(message)?;
        let mut restore = PhaseRestore::new(session);
        let mut staged = conversation.clone();
        let mut errors = Vec::new();

        staged.append(Turn::user(message))?;
        session.set_phase(SessionPhase::Active);
        let first = self.compress_if_due(session, &mut staged).await;
        errors.extend(first.error);

        let result = execute_query(&*self.client, &self.settings, prior_history(&staged), message)
            .await
            .map_err(|e| {
                warn!(session = %staged.session_id(), kind = e.kind(), error = %e, "send failed");
                e
            })?;

        let output_tokens = if result.metrics.output_tokens > 0 {
            result.metrics.output_tokens
        } else {
            estimate_tokens(&result.response)
        };
        staged.append(Turn::assistant(result.response.clone(), output_tokens))?;
        if !first.broken {
            session.set_phase(SessionPhase::Active);
        }
        let second = self.compress_if_due(session, &mut staged).await;
        errors.extend(second.error);

        let outcome = SendOutcome {
            response: result.response,
            compression_triggered: first.applied || second.applied,
            compression_stats: staged.metrics(),
            metrics: result.metrics,
            compression_error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        };
        info!(
            session = %staged.session_id(),
            history = staged.history().len(),
            total_tokens = outcome.metrics.total_tokens,
            compressed = outcome.compression_triggered,
            "message sent"
        );

        *conversation = staged;
        session.set_phase(if first.broken || second.broken {
            SessionPhase::Error
        } else {
            SessionPhase::Active
        });
        restore.disarm();
        Ok(outcome)
    }

    async fn compress_if_due(
        &self,
        session: &SessionHandle,
        staged: &mut Conversation,
    ) -> CompressionStep {
        let mut step = CompressionStep::default();
        let compression = &self.settings.compression;
        if !compression.enabled {
            return step;
        }
        let Some(plan) = staged.plan_compression(compression.threshold, compression.retain) else {
            return step;
        };

        session.set_phase(SessionPhase::Compressing);
        let params = summary_params(&self.settings);
        let applied = match summarize(&*self.client, &params, &plan.turns).await {
            Ok(summary) => staged.apply_compression(&plan, summary),
            Err(e) => Err(e),
        };

        match applied {
            Ok(CompressionOutcome::Applied(event)) => {
                emit_compression_event(staged.session_id(), &event);
                session.set_phase(SessionPhase::Active);
                step.applied = true;
            }
            Ok(CompressionOutcome::Discarded {
                pre_tokens,
                post_tokens,
            }) => {
                info!(
                    session = %staged.session_id(),
                    pre_tokens,
                    post_tokens,
                    "summary not smaller than history, compression discarded"
                );
                session.set_phase(SessionPhase::Active);
            }
            Err(e @ EngineError::InternalState { .. }) => {
                error!(session = %staged.session_id(), error = %e, "compression aborted");
                session.set_phase(SessionPhase::Error);
                step.error = Some(e.to_string());
                step.broken = true;
            }
            Err(e) => {
                warn!(session = %staged.session_id(), error = %e, "summarizer failed, keeping full history");
                session.set_phase(SessionPhase::Active);
                step.error = Some(e.to_string());
            }
        }
        step
    }

    /// Ask `message` over the compressed and the full history without
    /// recording anything.
    pub async fn compare(&self, session: &SessionHandle, message: &str) -> Result<ComparisonResult> {
        let message = validate_message(message)?;
        let guard = session.lock().await;
        let input = comparison_input(&guard);
        let _held = if self.settings.comparison.serialize_with_send {
            Some(guard)
        } else {
            drop(guard);
            None
        };
        self.run_compare(input, message).await
    }

    /// `compare` for a caller already holding the session lock.
    pub(crate) async fn compare_locked(
        &self,
        conversation: &Conversation,
        message: &str,
    ) -> Result<ComparisonResult> {
        let message = validate_message(message)?;
        self.run_compare(comparison_input(conversation), message).await
    }

    async fn run_compare(&self, input: ComparisonInput, message: &str) -> Result<ComparisonResult> {
        let result = run_comparison(&*self.client, &self.settings, input, message).await?;
        match (&result.savings, &result.without_compression_error) {
            (Some(savings), _) => info!(
                tokens_saved = savings.tokens_saved,
                tokens_saved_percent = savings.tokens_saved_percent,
                "comparison finished"
            ),
            (None, Some(err)) => warn!(error = %err, "full history did not fit, comparison is one-sided"),
            (None, None) => {}
        }
        Ok(result)
    }

    pub async fn stats(&self, session: &SessionHandle) -> StatsReport {
        let guard = session.lock().await;
        self.stats_locked(session, &guard)
    }

    pub(crate) fn stats_locked(
        &self,
        session: &SessionHandle,
        conversation: &Conversation,
    ) -> StatsReport {
        StatsReport {
            metrics: conversation.metrics(),
            phase: session.phase(),
            history_length: conversation.history().len(),
            session_id: conversation.session_id().to_string(),
        }
    }

    /// Live history snapshot.
    pub async fn history(&self, session: &SessionHandle) -> Vec<Turn> {
        session.lock().await.history().snapshot()
    }

    pub async fn clear(&self, session: &SessionHandle) {
        let mut guard = session.lock().await;
        self.clear_locked(session, &mut guard);
    }

    pub(crate) fn clear_locked(&self, session: &SessionHandle, conversation: &mut Conversation) {
        conversation.clear();
        session.set_phase(SessionPhase::Empty);
        info!(session = %conversation.session_id(), "session cleared");
    }
}

fn comparison_input(conversation: &Conversation) -> ComparisonInput {
    ComparisonInput {
        live_history: conversation.history().snapshot(),
        archive: conversation.archive().to_vec(),
        compression_stats: conversation.metrics(),
    }
}
