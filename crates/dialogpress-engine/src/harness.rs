use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use dialogpress_core::models::round_to;

use crate::comparison::ComparisonResult;
use crate::engine::{Engine, StatsReport};
use crate::query::QueryMetrics;
use crate::session::SessionHandle;

/// Messages sent to build up a long history.
pub const TEST_MESSAGES: [&str; 12] = [
    "Hi! Tell me about space.",
    "What is a black hole?",
    "How many planets are in the Solar System?",
    "Tell me more about Mars.",
    "What is the surface temperature on Mars?",
    "Is there life on Mars?",
    "What are exoplanets?",
    "How many exoplanets have we found?",
    "What is the habitable zone?",
    "How do we search for extraterrestrial life?",
    "Tell me about the SETI program.",
    "What is the Fermi paradox?",
];

/// Question asked over both histories at the end of the run.
pub const TEST_QUESTION: &str = "What theories are there about the future of the Universe?";

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub index: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<QueryMetrics>,
    pub compression_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// Messages that got a reply.
    pub messages_sent: usize,
    /// Seconds spent in the whole run.
    pub total_time: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub per_message: Vec<MessageRecord>,
    pub final_stats: StatsReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_error: Option<String>,
}

impl Engine {
    /// Clear the session, replay the scripted conversation, then compare.
    ///
    /// The session stays locked for the whole run, so other requests on it
    /// wait until the report is built. A failed send is recorded and the run
    /// goes on.
    pub async fn run_test(&self, session: &SessionHandle) -> TestReport {
        let started = Instant::now();
        let mut guard = session.lock().await;
        self.clear_locked(session, &mut guard);

        let mut per_message = Vec::with_capacity(TEST_MESSAGES.len());
        let mut total_tokens = 0;
        let mut total_cost = 0.0;
        for (i, message) in TEST_MESSAGES.iter().enumerate() {
            let record = match self.send_locked(session, &mut guard, message).await {
                Ok(outcome) => {
                    total_tokens += outcome.metrics.total_tokens;
                    total_cost += outcome.metrics.cost_rub;
                    MessageRecord {
                        index: i + 1,
                        message: message.to_string(),
                        metrics: Some(outcome.metrics),
                        compression_triggered: outcome.compression_triggered,
                        error: outcome.compression_error,
                    }
                }
                Err(e) => {
                    warn!(index = i + 1, error = %e, "self-test message failed");
                    MessageRecord {
                        index: i + 1,
                        message: message.to_string(),
                        metrics: None,
                        compression_triggered: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            per_message.push(record);
        }

        let compared = self.compare_locked(&guard, TEST_QUESTION).await;
        let (comparison, comparison_error) = match compared {
            Ok(result) => (Some(result), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let messages_sent = per_message.iter().filter(|r| r.metrics.is_some()).count();
        let report = TestReport {
            messages_sent,
            total_time: round_to(started.elapsed().as_secs_f64(), 2),
            total_tokens,
            total_cost: round_to(total_cost, 4),
            per_message,
            final_stats: self.stats_locked(session, &guard),
            comparison,
            comparison_error,
        };
        info!(
            messages_sent = report.messages_sent,
            total_tokens = report.total_tokens,
            compressions = report.final_stats.metrics.compression_count,
            "self-test finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use dialogpress_core::error::EngineError;
    use dialogpress_core::types::Settings;

    use crate::testing::ScriptedClient;

    #[tokio::test]
    async fn test_run_test_full_pass() {
        let client = Arc::new(ScriptedClient::new());
        let engine = Engine::new(client, Settings::default());
        let session = SessionHandle::new();
        engine.send(&session, "left over from before").await.unwrap();

        let report = engine.run_test(&session).await;
        assert_eq!(report.messages_sent, 12);
        assert_eq!(report.per_message.len(), 12);
        assert_eq!(report.final_stats.metrics.total_messages, 12);
        assert!(report.final_stats.metrics.compression_count >= 1);
        assert!(report.total_tokens > 0);
        let comparison = report.comparison.unwrap();
        assert!(comparison.savings.unwrap().tokens_saved > 0);
        assert!(report.comparison_error.is_none());
    }

    #[tokio::test]
    async fn test_failed_send_is_recorded() {
        let client = Arc::new(ScriptedClient::new());
        client.push_reply("fine", 2);
        client.push_error(EngineError::transient("flaky network"));
        let engine = Engine::new(client, Settings::default());
        let session = SessionHandle::new();

        let report = engine.run_test(&session).await;
        assert_eq!(report.messages_sent, 11);
        let failed = &report.per_message[1];
        assert!(failed.metrics.is_none());
        assert!(failed.error.as_deref().unwrap().contains("flaky network"));
        assert_eq!(report.final_stats.metrics.total_messages, 11);
    }

    #[tokio::test]
    async fn test_concurrent_send_waits_for_run() {
        let client = Arc::new(ScriptedClient::with_delay(Duration::from_millis(5)));
        let engine = Engine::new(client, Settings::default());
        let session = SessionHandle::new();

        let run = {
            let engine = engine.clone();
            let session = session.clone();
            tokio::spawn(async move { engine.run_test(&session).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let intruder = {
            let engine = engine.clone();
            let session = session.clone();
            tokio::spawn(async move { engine.send(&session, "a message from elsewhere").await })
        };

        let report = run.await.unwrap();
        assert_eq!(report.messages_sent, 12);
        assert_eq!(report.final_stats.metrics.total_messages, 12);
        let comparison = report.comparison.unwrap();
        assert_eq!(comparison.compression_stats.total_messages, 12);
        let without = comparison.without_compression.unwrap();
        assert!(comparison.with_compression.metrics.history_messages < without.metrics.history_messages);

        intruder.await.unwrap().unwrap();
        assert_eq!(engine.stats(&session).await.metrics.total_messages, 13);
    }
}
