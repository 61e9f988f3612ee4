//! Per-model pricing table and cost calculation
//!
//! Four independent per-million-token rates per model: fresh input, output,
//! cache read (a steep discount off input), cache write (a markup over
//! input). The base calculation covers input/output/cache-read; cache-write
//! cost is priced separately by the invocation layer since those tokens only
//! appear the first time a cacheable prefix is seen.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Model identifier for the high-capability tier (full, personalized mode).
pub const SONNET_4_5: &str = "claude-sonnet-4-5-20250929";

/// Model identifier for the fast/economical tier (basic mode).
pub const HAIKU_4_5: &str = "claude-haiku-4-5-20250929";

#[derive(Error, Debug)]
pub enum PricingError {
    /// A silent default here would corrupt the cost ledger, so an unknown
    /// model always fails loudly.
    #[error("no pricing configured for model: {0}")]
    UnknownModel(String),
}

/// USD rates per 1M tokens for a single model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

/// Pricing table keyed by model identifier.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Table for the two analysis tiers. Cache read is a 90% discount off
    /// the input rate; cache write carries a 25% markup.
    pub fn builtin() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            SONNET_4_5.to_string(),
            ModelPricing {
                input: 3.00,
                output: 15.00,
                cache_read: 0.30,
                cache_write: 3.75,
            },
        );
        rates.insert(
            HAIKU_4_5.to_string(),
            ModelPricing {
                input: 1.00,
                output: 5.00,
                cache_read: 0.10,
                cache_write: 1.25,
            },
        );
        Self { rates }
    }

    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.rates.insert(model.into(), pricing);
        self
    }

    pub fn rates_for(&self, model: &str) -> Result<&ModelPricing, PricingError> {
        self.rates
            .get(model)
            .ok_or_else(|| PricingError::UnknownModel(model.to_string()))
    }

    /// Cost of fresh input + output + discounted cache reads, rounded to six
    /// decimal places (individual calls cost fractions of a cent).
    pub fn base_cost(
        &self,
        model: &str,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
    ) -> Result<f64, PricingError> {
        let rates = self.rates_for(model)?;

        let cost = input_tokens as f64 * rates.input / 1_000_000.0
            + output_tokens as f64 * rates.output / 1_000_000.0
            + cache_read_tokens as f64 * rates.cache_read / 1_000_000.0;

        Ok(round6(cost))
    }

    /// One-time indexing cost for tokens written into the provider's prompt
    /// cache, at the cache-write markup rate.
    pub fn cache_write_cost(
        &self,
        model: &str,
        cache_write_tokens: u32,
    ) -> Result<f64, PricingError> {
        let rates = self.rates_for(model)?;
        Ok(round6(
            cache_write_tokens as f64 * rates.cache_write / 1_000_000.0,
        ))
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_cost_without_cache() {
        let table = PricingTable::builtin();

        // 1000 input at $3/M + 500 output at $15/M
        let cost = table.base_cost(SONNET_4_5, 1000, 500, 0).unwrap();
        assert!((cost - 0.0105).abs() < 1e-4);
    }

    #[test]
    fn test_base_cost_with_cache_read() {
        let table = PricingTable::builtin();

        // 200 input + 500 output + 800 cache-read at $0.30/M
        let cost = table.base_cost(SONNET_4_5, 200, 500, 800).unwrap();
        assert!((cost - 0.00834).abs() < 1e-6);
    }

    #[test]
    fn test_cache_write_cost() {
        let table = PricingTable::builtin();

        let cost = table.cache_write_cost(SONNET_4_5, 1_000_000).unwrap();
        assert!((cost - 3.75).abs() < 1e-9);
    }

    #[test]
    fn test_haiku_rates() {
        let table = PricingTable::builtin();

        let cost = table.base_cost(HAIKU_4_5, 1000, 1000, 0).unwrap();
        assert!((cost - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let table = PricingTable::builtin();

        let err = table.base_cost("gpt-oss-1", 100, 100, 0).unwrap_err();
        assert!(matches!(err, PricingError::UnknownModel(_)));

        let err = table.cache_write_cost("gpt-oss-1", 100).unwrap_err();
        assert!(matches!(err, PricingError::UnknownModel(_)));
    }

    #[test]
    fn test_custom_model_rates() {
        let table = PricingTable::empty().with_model(
            "house-model",
            ModelPricing {
                input: 1.0,
                output: 2.0,
                cache_read: 0.1,
                cache_write: 1.25,
            },
        );

        let cost = table.base_cost("house-model", 1_000_000, 0, 0).unwrap();
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cost_is_rounded_to_six_places() {
        let table = PricingTable::builtin();

        // 1 input token at $3/M = 0.000003 exactly; 1 output at $15/M = 0.000015
        let cost = table.base_cost(SONNET_4_5, 1, 1, 0).unwrap();
        assert_eq!(cost, 0.000018);
    }
}
