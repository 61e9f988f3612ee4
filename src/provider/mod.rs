//! AI provider boundary
//!
//! The invocation layer talks to the provider through [`AiProvider`]: an
//! ordered list of system segments (cache-eligibility propagated per
//! segment), a model identifier, an output cap, and a single subject
//! message. Responses carry generated text plus a usage report with up to
//! four token counts.

pub mod claude;

pub use claude::ClaudeClient;

use crate::prompt::PromptSegment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Missing or invalid provider configuration (e.g. no credential).
    /// Fatal for the request; retrying without a config fix is pointless.
    #[error("provider configuration error: {0}")]
    Configuration(String),

    /// Network failure or timeout reaching the provider. Retryable by the
    /// caller; the core never retries on its own.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider error: {0}")]
    Provider(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

/// Request to the provider: cache-eligible system segments first, then the
/// per-request subject message.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: Vec<PromptSegment>,
    pub user_message: String,
}

/// Generated text plus the provider's usage report.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenBreakdown,
}

/// The four token classes metered per call. Cache counts default to zero
/// when the provider or response omits them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
    pub cache_write: u32,
}

impl TokenBreakdown {
    pub fn new(input: u32, output: u32) -> Self {
        Self {
            input,
            output,
            ..Default::default()
        }
    }

    /// Fresh input + output; cache tokens are accounted separately.
    pub fn total(&self) -> u32 {
        self.input + self.output
    }

    pub fn has_cache_activity(&self) -> bool {
        self.cache_read > 0 || self.cache_write > 0
    }
}

/// Trait for AI providers.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Minimal call to verify credentials and connectivity. Never panics.
    async fn verify_connection(&self) -> bool;
}
