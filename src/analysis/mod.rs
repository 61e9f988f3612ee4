//! Invocation strategy: mode selection, provider call, parsing, metering
//!
//! One request runs through a fixed pipeline: pick the mode and model from
//! profile presence, assemble the segment list, invoke the provider with a
//! mode-dependent output cap, extract the JSON payload from the response
//! text, meter the four token classes, and price the call. A response that
//! fails to parse is converted into a structured error payload so callers
//! always receive a well-formed record.

use crate::config::ModelSettings;
use crate::pricing::{round6, PricingError, PricingTable};
use crate::product::ProductDetails;
use crate::profile::StyleProfile;
use crate::prompt::{AnalysisMode, PromptAssembler};
use crate::provider::{AiProvider, ProviderError, ProviderRequest, TokenBreakdown};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// Result of one provider invocation, ready to be cached and logged.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis: Value,
    pub model_used: String,
    pub mode: AnalysisMode,
    pub tokens: TokenBreakdown,
    pub cost_usd: f64,
}

/// Orchestrates a single analysis call against the injected provider.
pub struct AnalysisEngine {
    provider: Arc<dyn AiProvider>,
    pricing: PricingTable,
    models: ModelSettings,
    assembler: PromptAssembler,
}

impl AnalysisEngine {
    pub fn new(provider: Arc<dyn AiProvider>, pricing: PricingTable, models: ModelSettings) -> Self {
        Self {
            provider,
            pricing,
            models,
            assembler: PromptAssembler::new(),
        }
    }

    /// Run one analysis. Profile present selects full mode on the
    /// high-capability model; absent selects basic mode on the economical
    /// model. Never configurable per call.
    pub async fn run(
        &self,
        product: &ProductDetails,
        profile: Option<&StyleProfile>,
    ) -> Result<AnalysisOutcome, EngineError> {
        let mode = AnalysisMode::for_profile(profile);
        let (model, max_tokens) = match mode {
            AnalysisMode::Full => (
                self.models.full_model.clone(),
                self.models.full_max_tokens,
            ),
            AnalysisMode::Basic => (
                self.models.basic_model.clone(),
                self.models.basic_max_tokens,
            ),
        };

        info!(product_id = product.id, %mode, %model, "invoking provider");

        let request = ProviderRequest {
            model: model.clone(),
            max_tokens,
            system: self.assembler.system_segments(mode, profile),
            user_message: self.assembler.subject_message(product, mode),
        };

        let response = self.provider.complete(request).await?;
        let tokens = response.usage;

        let mut cost =
            self.pricing
                .base_cost(&model, tokens.input, tokens.output, tokens.cache_read)?;

        // Cache writes are rare (first sighting of a cacheable prefix) and
        // priced at the markup rate on top of the base calculation.
        if tokens.cache_write > 0 {
            cost = round6(cost + self.pricing.cache_write_cost(&model, tokens.cache_write)?);
        }

        debug!(
            product_id = product.id,
            input = tokens.input,
            output = tokens.output,
            cache_read = tokens.cache_read,
            cache_write = tokens.cache_write,
            cost_usd = cost,
            "provider call metered"
        );

        Ok(AnalysisOutcome {
            analysis: parse_analysis(&response.text),
            model_used: model,
            mode,
            tokens,
            cost_usd: cost,
        })
    }
}

/// Parse the provider's natural-language-wrapped output into a JSON payload.
/// On parse failure, returns a structured error payload with a truncated
/// excerpt of the raw text instead of raising.
pub fn parse_analysis(text: &str) -> Value {
    let candidate = extract_json_block(text);

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => value,
        Err(err) => {
            let excerpt: String = candidate.chars().take(500).collect();
            json!({
                "error": "Failed to parse analysis response",
                "parse_error": err.to_string(),
                "raw_response": excerpt,
            })
        }
    }
}

/// Extraction rule: a fenced `json`-tagged block wins, then any fenced
/// block, then the raw text.
fn extract_json_block(text: &str) -> &str {
    if let Some(inner) = fenced_block(text, "```json") {
        return inner;
    }
    if let Some(inner) = fenced_block(text, "```") {
        return inner;
    }
    text.trim()
}

fn fenced_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let start = text.find(fence)? + fence.len();
    let end = text[start..].find("```")? + start;
    Some(text[start..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderResponse;
    use async_trait::async_trait;

    struct CannedProvider {
        text: String,
        usage: TokenBreakdown,
    }

    #[async_trait]
    impl AiProvider for CannedProvider {
        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                text: self.text.clone(),
                model: request.model,
                usage: self.usage,
            })
        }

        async fn verify_connection(&self) -> bool {
            true
        }
    }

    fn engine(text: &str, usage: TokenBreakdown) -> AnalysisEngine {
        AnalysisEngine::new(
            Arc::new(CannedProvider {
                text: text.to_string(),
                usage,
            }),
            PricingTable::builtin(),
            ModelSettings::default(),
        )
    }

    fn product() -> ProductDetails {
        ProductDetails {
            id: 42,
            title: "Linen Shirt".to_string(),
            price: 49.9,
            currency: "USD".to_string(),
            description: None,
            materials: None,
            category: None,
            colors: Vec::new(),
            sizes: Vec::new(),
        }
    }

    #[test]
    fn test_extract_prefers_json_tagged_fence() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nand also ```\nnoise\n```";
        assert_eq!(extract_json_block(text), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_falls_back_to_any_fence() {
        let text = "Result:\n```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(text), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_falls_back_to_raw_text() {
        assert_eq!(extract_json_block("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_unterminated_fence_uses_raw_text() {
        let text = "```json\n{\"a\": 1}";
        // No closing fence: the whole text is the candidate and fails to
        // parse, which yields the structured error payload downstream.
        assert_eq!(extract_json_block(text), text.trim());
    }

    #[test]
    fn test_parse_malformed_yields_error_payload() {
        let payload = parse_analysis("not valid json {");

        assert_eq!(payload["error"], "Failed to parse analysis response");
        assert!(payload["parse_error"].is_string());
        assert_eq!(payload["raw_response"], "not valid json {");
    }

    #[test]
    fn test_parse_error_excerpt_is_truncated() {
        let long = format!("not json {}", "x".repeat(2000));
        let payload = parse_analysis(&long);

        assert_eq!(payload["raw_response"].as_str().unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn test_basic_mode_uses_economical_model() {
        let engine = engine("{\"ok\": true}", TokenBreakdown::new(100, 50));

        let outcome = engine.run(&product(), None).await.unwrap();

        assert_eq!(outcome.mode, AnalysisMode::Basic);
        assert_eq!(outcome.model_used, ModelSettings::default().basic_model);
    }

    #[tokio::test]
    async fn test_full_mode_uses_high_capability_model_even_for_empty_profile() {
        let engine = engine("{\"ok\": true}", TokenBreakdown::new(100, 50));
        let profile = StyleProfile::new();

        let outcome = engine.run(&product(), Some(&profile)).await.unwrap();

        assert_eq!(outcome.mode, AnalysisMode::Full);
        assert_eq!(outcome.model_used, ModelSettings::default().full_model);
    }

    #[tokio::test]
    async fn test_cost_includes_cache_write_markup() {
        let usage = TokenBreakdown {
            input: 0,
            output: 0,
            cache_read: 0,
            cache_write: 1_000_000,
        };
        let engine = engine("{\"ok\": true}", usage);
        let profile = StyleProfile::new();

        let outcome = engine.run(&product(), Some(&profile)).await.unwrap();

        // Full mode runs on Sonnet: 1M cache-write tokens at $3.75/M.
        assert!((outcome.cost_usd - 3.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_response_never_errors() {
        let engine = engine("not valid json {", TokenBreakdown::new(10, 10));

        let outcome = engine.run(&product(), None).await.unwrap();

        assert_eq!(outcome.analysis["error"], "Failed to parse analysis response");
    }

    #[tokio::test]
    async fn test_unknown_model_fails_loudly() {
        let provider = Arc::new(CannedProvider {
            text: "{}".to_string(),
            usage: TokenBreakdown::new(1, 1),
        });
        let models = ModelSettings {
            basic_model: "unpriced-model".to_string(),
            ..Default::default()
        };
        let engine = AnalysisEngine::new(provider, PricingTable::builtin(), models);

        let err = engine.run(&product(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Pricing(PricingError::UnknownModel(_))));
    }
}
