use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::types::ModelPricing;

/// Context window assumed for models missing from the pricing table.
pub const DEFAULT_CONTEXT_WINDOW: u64 = 8_000;

/// Built-in pricing for Yandex Foundation Models (RUB per 1000 tokens).
pub static MODEL_PRICING: Lazy<HashMap<&str, ModelPricing>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "yandexgpt-lite",
        ModelPricing {
            input_per_1k: 0.20,
            output_per_1k: 0.20,
            context_window: 8_000,
        },
    );
    m.insert(
        "yandexgpt",
        ModelPricing {
            input_per_1k: 1.20,
            output_per_1k: 1.20,
            context_window: 8_000,
        },
    );
    m.insert(
        "yandexgpt-32k",
        ModelPricing {
            input_per_1k: 1.20,
            output_per_1k: 1.20,
            context_window: 32_000,
        },
    );
    m
});

/// Resolve pricing for a model: settings overrides first, then the built-in
/// table, then a free entry with the default context window.
pub fn resolve_pricing(model: &str, overrides: &HashMap<String, ModelPricing>) -> ModelPricing {
    overrides
        .get(model)
        .or_else(|| MODEL_PRICING.get(model))
        .copied()
        .unwrap_or(ModelPricing {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
            context_window: DEFAULT_CONTEXT_WINDOW,
        })
}

/// `input/1000 × price_in + output/1000 × price_out`
pub fn calculate_cost(pricing: &ModelPricing, input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 / 1000.0) * pricing.input_per_1k
        + (output_tokens as f64 / 1000.0) * pricing.output_per_1k
}

/// Round for presentation. Counters are never rounded, only reported values.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
