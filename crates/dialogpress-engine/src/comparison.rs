use serde::Serialize;

use dialogpress_core::error::{EngineError, Result};
use dialogpress_core::metrics::MetricsSnapshot;
use dialogpress_core::models::round_to;
use dialogpress_core::types::{Settings, Turn};

use crate::invoke::LlmClient;
use crate::query::{execute_query, QueryResult};

/// What compression bought on one question.
///
/// Token savings compare prompt (input) tokens only, since the reply length
/// is not under the history's control.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Savings {
    /// `input_without - input_with`; negative when compression cost more.
    pub tokens_saved: i64,
    pub tokens_saved_percent: f64,
    pub cost_saved: f64,
    pub cost_saved_percent: f64,
    /// Seconds, `time_without - time_with`.
    pub time_difference: f64,
}

impl Savings {
    pub fn between(with: &QueryResult, without: &QueryResult) -> Self {
        let tokens_with = with.metrics.input_tokens as i64;
        let tokens_without = without.metrics.input_tokens as i64;
        let tokens_saved = tokens_without - tokens_with;
        let cost_saved = without.metrics.cost_rub - with.metrics.cost_rub;
        Self {
            tokens_saved,
            tokens_saved_percent: percent(tokens_saved as f64, tokens_without as f64),
            cost_saved: round_to(cost_saved, 4),
            cost_saved_percent: percent(cost_saved, without.metrics.cost_rub),
            time_difference: round_to(
                without.metrics.response_time - with.metrics.response_time,
                2,
            ),
        }
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round_to(part / whole * 100.0, 2)
    }
}

/// Both sides of a comparison.
///
/// The full-history side may be missing when it alone overflowed the
/// context window; `savings` is then absent too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub with_compression: QueryResult,
    pub without_compression: Option<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub without_compression_error: Option<String>,
    pub savings: Option<Savings>,
    pub compression_stats: MetricsSnapshot,
}

/// Snapshots taken from a session before comparing.
pub struct ComparisonInput {
    pub live_history: Vec<Turn>,
    pub archive: Vec<Turn>,
    pub compression_stats: MetricsSnapshot,
}

/// Ask the same question over the compressed and the full history.
///
/// Both pipelines read only the snapshots in `input`.
pub async fn run_comparison(
    client: &dyn LlmClient,
    settings: &Settings,
    input: ComparisonInput,
    message: &str,
) -> Result<ComparisonResult> {
    let (with_compression, without) = if settings.comparison.concurrent {
        let (with, without) = tokio::join!(
            execute_query(client, settings, &input.live_history, message),
            execute_query(client, settings, &input.archive, message),
        );
        (with?, without)
    } else {
        let with = execute_query(client, settings, &input.live_history, message).await?;
        let without = execute_query(client, settings, &input.archive, message).await;
        (with, without)
    };

    // A context overflow on the full history alone is reported in-band.
    let (without_compression, without_compression_error) = match without {
        Ok(result) => (Some(result), None),
        Err(e @ EngineError::Quota { .. }) => (None, Some(e.to_string())),
        Err(e) => return Err(e),
    };
    let savings = without_compression
        .as_ref()
        .map(|without| Savings::between(&with_compression, without));
    Ok(ComparisonResult {
        with_compression,
        without_compression,
        without_compression_error,
        savings,
        compression_stats: input.compression_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryMetrics;

    fn result(input_tokens: u64, cost: f64, time: f64) -> QueryResult {
        QueryResult {
            response: String::new(),
            metrics: QueryMetrics {
                input_tokens,
                output_tokens: 0,
                total_tokens: input_tokens,
                cost_rub: cost,
                response_time: time,
                history_messages: 0,
            },
        }
    }

    #[test]
    fn test_savings_between() {
        let with = result(300, 0.06, 1.25);
        let without = result(1200, 0.24, 2.0);
        let s = Savings::between(&with, &without);
        assert_eq!(s.tokens_saved, 900);
        assert_eq!(s.tokens_saved_percent, 75.0);
        assert_eq!(s.cost_saved, 0.18);
        assert_eq!(s.cost_saved_percent, 75.0);
        assert_eq!(s.time_difference, 0.75);
    }

    #[test]
    fn test_savings_zero_baseline() {
        let s = Savings::between(&result(0, 0.0, 0.0), &result(0, 0.0, 0.0));
        assert_eq!(s.tokens_saved, 0);
        assert_eq!(s.tokens_saved_percent, 0.0);
        assert_eq!(s.cost_saved_percent, 0.0);
    }

    #[test]
    fn test_negative_savings_allowed() {
        let s = Savings::between(&result(120, 0.0, 0.0), &result(100, 0.0, 0.0));
        assert_eq!(s.tokens_saved, -20);
        assert_eq!(s.tokens_saved_percent, -20.0);
    }

    #[test]
    fn test_savings_ignore_reply_length() {
        let mut with = result(13, 0.0, 0.0);
        with.metrics.output_tokens = 3;
        with.metrics.total_tokens = 16;
        let mut without = result(13, 0.0, 0.0);
        without.metrics.output_tokens = 40;
        without.metrics.total_tokens = 53;
        let s = Savings::between(&with, &without);
        assert_eq!(s.tokens_saved, 0);
        assert_eq!(s.tokens_saved_percent, 0.0);
    }
}
