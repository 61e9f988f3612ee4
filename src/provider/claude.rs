//! Claude Messages API client with prompt-caching support
//!
//! Cache-eligible segments are sent as system content blocks carrying
//! `cache_control: ephemeral` markers; the provider then bills repeated
//! prefixes at the cache-read discount and first-time prefixes at the
//! cache-write markup. With caching disabled no segment is marked and no
//! cache token counts are expected back.

use super::{AiProvider, ProviderError, ProviderRequest, ProviderResponse, TokenBreakdown};
use crate::config::ProviderSettings;
use crate::pricing::HAIKU_4_5;
use crate::prompt::PromptSegment;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

/// Long-lived Messages API client. Constructed once from configuration and
/// injected wherever provider access is needed.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    messages_url: String,
    enable_cache: bool,
}

impl ClaudeClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ProviderError::Configuration("Anthropic API key is required".to_string())
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            messages_url: format!("{}/messages", settings.base_url.trim_end_matches('/')),
            enable_cache: settings.enable_cache,
        })
    }

    pub fn cache_enabled(&self) -> bool {
        self.enable_cache
    }

    async fn post(&self, body: &Value) -> Result<Value, ProviderError> {
        let mut request = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);

        if self.enable_cache {
            request = request.header("anthropic-beta", PROMPT_CACHING_BETA);
        }

        let response = request.json(body).send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            Err(ProviderError::Provider(format!("{status}: {error_text}")))
        }
    }
}

#[async_trait]
impl AiProvider for ClaudeClient {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": system_blocks(&request.system, self.enable_cache),
            "messages": [{ "role": "user", "content": request.user_message }],
        });

        debug!(model = %request.model, segments = request.system.len(), "sending analysis request");

        let response = self.post(&body).await?;
        Ok(parse_response(&response))
    }

    async fn verify_connection(&self) -> bool {
        let body = json!({
            "model": HAIKU_4_5,
            "max_tokens": 10,
            "messages": [{ "role": "user", "content": "Hi" }],
        });

        match self.post(&body).await {
            Ok(response) => response["content"][0]["text"].is_string(),
            Err(_) => false,
        }
    }
}

/// System content blocks with `cache_control` markers on cache-eligible
/// segments. When caching is disabled no segment is marked.
fn system_blocks(segments: &[PromptSegment], enable_cache: bool) -> Vec<Value> {
    segments
        .iter()
        .map(|segment| {
            if enable_cache && segment.cache_eligible {
                json!({
                    "type": "text",
                    "text": segment.text,
                    "cache_control": { "type": "ephemeral" },
                })
            } else {
                json!({ "type": "text", "text": segment.text })
            }
        })
        .collect()
}

fn parse_response(response: &Value) -> ProviderResponse {
    let usage = TokenBreakdown {
        input: response["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output: response["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read: response["usage"]["cache_read_input_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
        cache_write: response["usage"]["cache_creation_input_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
    };

    ProviderResponse {
        text: response["content"][0]["text"].as_str().unwrap_or("").to_string(),
        model: response["model"].as_str().unwrap_or("").to_string(),
        usage,
    }
}
