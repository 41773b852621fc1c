//! Static per-model price table.
//!
//! Rates are USD per million tokens. Unlisted models use [`DEFAULT_PRICING`].

/// Input and output rates for one model, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }
}

/// Rate applied to models missing from the table.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(1.0, 2.0);

const PRICES: &[(&str, ModelPricing)] = &[
    ("claude-3-5-sonnet-20241022", ModelPricing::new(3.0, 15.0)),
    ("claude-3-opus-20240229", ModelPricing::new(15.0, 75.0)),
    ("gpt-4-turbo-preview", ModelPricing::new(10.0, 30.0)),
    ("gpt-4", ModelPricing::new(30.0, 60.0)),
    ("gpt-3.5-turbo", ModelPricing::new(0.5, 1.5)),
];

pub fn pricing_for(model: &str) -> ModelPricing {
    PRICES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_PRICING)
}

/// Estimated cost in USD of one call.
pub fn estimate_cost(prompt_tokens: u32, completion_tokens: u32, model: &str) -> f64 {
    let pricing = pricing_for(model);
    f64::from(prompt_tokens) / 1_000_000.0 * pricing.input_per_million
        + f64::from(completion_tokens) / 1_000_000.0 * pricing.output_per_million
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        let cost = estimate_cost(1_000_000, 1_000_000, "gpt-4");
        assert!((cost - 90.0).abs() < 1e-9);
    }

    #[test]
    fn sonnet_cost() {
        let cost = estimate_cost(2000, 500, "claude-3-5-sonnet-20241022");
        assert!((cost - (0.006 + 0.0075)).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_uses_default_rate() {
        assert_eq!(pricing_for("llama-3"), DEFAULT_PRICING);
        let cost = estimate_cost(1_000_000, 500_000, "llama-3");
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_tokens_cost_nothing() {
        assert_eq!(estimate_cost(0, 0, "gpt-4"), 0.0);
    }
}
