use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_1m_usd: f64,
    pub output_per_1m_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

/// Frozen model -> pricing table, priced with exact match first, then
/// case-insensitive substring match so near-matches (a dated model
/// suffix, a provider prefix) still price.
pub struct CostTracker {
    pricing: HashMap<String, ModelPricing>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::with_default_pricing()
    }
}

impl CostTracker {
    pub fn new(pricing: HashMap<String, ModelPricing>) -> Self {
        Self { pricing }
    }

    /// Seed pricing table for common model families. Operators can
    /// override via `new` with their own table.
    pub fn with_default_pricing() -> Self {
        let mut pricing = HashMap::new();
        pricing.insert(
            "claude-3-5-sonnet".to_string(),
            ModelPricing {
                input_per_1m_usd: 3.0,
                output_per_1m_usd: 15.0,
            },
        );
        pricing.insert(
            "claude-3-opus".to_string(),
            ModelPricing {
                input_per_1m_usd: 15.0,
                output_per_1m_usd: 75.0,
            },
        );
        pricing.insert(
            "claude-3-haiku".to_string(),
            ModelPricing {
                input_per_1m_usd: 0.25,
                output_per_1m_usd: 1.25,
            },
        );
        pricing.insert(
            "gpt-4o".to_string(),
            ModelPricing {
                input_per_1m_usd: 2.5,
                output_per_1m_usd: 10.0,
            },
        );
        pricing.insert(
            "gpt-4o-mini".to_string(),
            ModelPricing {
                input_per_1m_usd: 0.15,
                output_per_1m_usd: 0.6,
            },
        );
        Self { pricing }
    }

    fn lookup(&self, model: &str) -> Option<ModelPricing> {
        if let Some(p) = self.pricing.get(model) {
            return Some(*p);
        }
        let lower = model.to_lowercase();
        self.pricing
            .iter()
            .find(|(k, _)| lower.contains(&k.to_lowercase()) || k.to_lowercase().contains(&lower))
            .map(|(_, v)| *v)
    }

    pub fn price(&self, model: &str, input_tokens: u64, output_tokens: u64) -> CostEstimate {
        let pricing = self.lookup(model).unwrap_or_else(|| {
            warn!(model, "no pricing entry, defaulting to $0.00");
            ModelPricing {
                input_per_1m_usd: 0.0,
                output_per_1m_usd: 0.0,
            }
        });

        let input_cost_usd = (input_tokens as f64 / 1_000_000.0) * pricing.input_per_1m_usd;
        let output_cost_usd = (output_tokens as f64 / 1_000_000.0) * pricing.output_per_1m_usd;

        CostEstimate {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_prices_correctly() {
        let tracker = CostTracker::with_default_pricing();
        let est = tracker.price("claude-3-5-sonnet", 1_000_000, 1_000_000);
        assert_eq!(est.input_cost_usd, 3.0);
        assert_eq!(est.output_cost_usd, 15.0);
    }

    #[test]
    fn substring_match_prices_dated_suffix() {
        let tracker = CostTracker::with_default_pricing();
        let est = tracker.price("claude-3-5-sonnet-20241022", 1_000_000, 0);
        assert_eq!(est.input_cost_usd, 3.0);
    }

    #[test]
    fn unknown_model_prices_zero() {
        let tracker = CostTracker::with_default_pricing();
        let est = tracker.price("totally-unknown-model", 1000, 1000);
        assert_eq!(est.total_cost_usd, 0.0);
    }
}
