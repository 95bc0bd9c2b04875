//! Estimated cost of a model call from its token usage.
//!
//! Prices are kept in nanodollars per token (1 USD = 1_000_000_000) so the
//! arithmetic stays integral; conversion to USD happens once at the edge.

use serde::{Deserialize, Serialize};

/// Token usage reported by a generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn has_usage(&self) -> bool {
        self.prompt_tokens > 0 || self.completion_tokens > 0
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_nano_per_token: u64,
    pub output_nano_per_token: u64,
}

/// Model-name fragment to pricing. More specific fragments come first so
/// `gpt-4o-mini` is never priced as `gpt-4o`.
// $X per 1M tokens = X * 1000 nanodollars per token
const PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", ModelPricing { input_nano_per_token: 150, output_nano_per_token: 600 }),
    ("gpt-4o", ModelPricing { input_nano_per_token: 2_500, output_nano_per_token: 10_000 }),
    ("gpt-4-turbo", ModelPricing { input_nano_per_token: 10_000, output_nano_per_token: 30_000 }),
    ("gpt-4.1-mini", ModelPricing { input_nano_per_token: 400, output_nano_per_token: 1_600 }),
    ("gpt-4.1", ModelPricing { input_nano_per_token: 2_000, output_nano_per_token: 8_000 }),
    ("o4-mini", ModelPricing { input_nano_per_token: 1_100, output_nano_per_token: 4_400 }),
    ("claude-3-5-haiku", ModelPricing { input_nano_per_token: 800, output_nano_per_token: 4_000 }),
    ("claude-sonnet-4", ModelPricing { input_nano_per_token: 3_000, output_nano_per_token: 15_000 }),
    ("claude-3-5-sonnet", ModelPricing { input_nano_per_token: 3_000, output_nano_per_token: 15_000 }),
    ("claude-opus-4", ModelPricing { input_nano_per_token: 15_000, output_nano_per_token: 75_000 }),
    ("gemini-2.5-flash", ModelPricing { input_nano_per_token: 150, output_nano_per_token: 600 }),
    ("gemini-2.5-pro", ModelPricing { input_nano_per_token: 1_250, output_nano_per_token: 10_000 }),
];

/// Look up pricing by the first matching model-name fragment.
pub fn pricing_for_model(model: &str) -> Option<ModelPricing> {
    let model = model.trim().to_lowercase().replace("3.5", "3-5");
    PRICING
        .iter()
        .find(|(fragment, _)| model.contains(fragment))
        .map(|(_, pricing)| *pricing)
}

/// Cost in nanodollars, or `None` for an unknown model.
pub fn cost_nanodollars(model: &str, usage: &TokenUsage) -> Option<u64> {
    let pricing = pricing_for_model(model)?;
    Some(
        usage
            .prompt_tokens
            .saturating_mul(pricing.input_nano_per_token)
            .saturating_add(
                usage
                    .completion_tokens
                    .saturating_mul(pricing.output_nano_per_token),
            ),
    )
}

/// Estimated USD cost for an AI-call row. Unknown models cost 0.
pub fn estimate_cost_usd(model: &str, usage: &TokenUsage) -> f64 {
    if !usage.has_usage() {
        return 0.0;
    }
    match cost_nanodollars(model, usage) {
        Some(nano) => nano as f64 / 1_000_000_000.0,
        None => {
            tracing::debug!(model = %model, "No pricing for model, recording zero cost");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specific_fragment_wins_over_prefix() {
        assert_eq!(
            pricing_for_model("gpt-4o-mini-2024-07-18").map(|p| p.input_nano_per_token),
            Some(150)
        );
        assert_eq!(
            pricing_for_model("gpt-4o-2024-08-06").map(|p| p.input_nano_per_token),
            Some(2_500)
        );
        assert!(pricing_for_model("claude-3.5-sonnet-latest").is_some());
        assert!(pricing_for_model("unknown-model-xyz").is_none());
    }

    #[test]
    fn cost_is_computed_in_nanodollars() {
        // 1000 * 150 + 500 * 600 = 450_000 nanodollars
        let usage = TokenUsage::new(1000, 500);
        assert_eq!(cost_nanodollars("gpt-4o-mini", &usage), Some(450_000));
        let usd = estimate_cost_usd("gpt-4o-mini", &usage);
        assert!((usd - 0.00045).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_or_no_usage_costs_nothing() {
        assert_eq!(estimate_cost_usd("mystery", &TokenUsage::new(10, 10)), 0.0);
        assert_eq!(estimate_cost_usd("gpt-4o", &TokenUsage::default()), 0.0);
    }
}
