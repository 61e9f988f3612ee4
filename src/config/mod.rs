//! Configuration management for the analysis broker
//!
//! Supports configuration via:
//! 1. Config file (~/.config/style-broker/config.toml)
//! 2. Environment variables (ANTHROPIC_API_KEY, STYLE_BROKER_DB, ...)
//! 3. The builder (tests and embedding applications)
//!
//! Configuration is constructed explicitly and passed to components at
//! construction time; there is no process-wide lazy singleton.

use crate::pricing::{HAIKU_4_5, SONNET_4_5};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Anthropic provider settings
    pub provider: ProviderSettings,

    /// Model tier selection and output caps
    pub models: ModelSettings,

    /// Persistence settings
    pub store: StoreSettings,
}

/// Anthropic provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API key (can also use ANTHROPIC_API_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL for the Anthropic API
    pub base_url: String,

    /// Whether to mark cache-eligible segments for prompt caching
    pub enable_cache: bool,

    /// Request timeout; a timeout surfaces as a provider-call failure
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com/v1".to_string(),
            enable_cache: true,
            timeout_secs: 60,
        }
    }
}

/// Model tiers per analysis mode. The mode-to-tier mapping is a hard rule;
/// only the model identifiers and output caps are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// High-capability model for full, personalized analysis
    pub full_model: String,

    /// Fast/economical model for basic analysis
    pub basic_model: String,

    /// Response cap for full analyses
    pub full_max_tokens: u32,

    /// Response cap for basic analyses (simpler schema needs less room)
    pub basic_max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            full_model: SONNET_4_5.to_string(),
            basic_model: HAIKU_4_5.to_string(),
            full_max_tokens: 2048,
            basic_max_tokens: 1536,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database file path
    pub database_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("style-broker")
                .join("analyses.db"),
        }
    }
}

impl BrokerConfig {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("style-broker")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: BrokerConfig = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(path) = std::env::var("STYLE_BROKER_DB") {
            self.store.database_path = PathBuf::from(path);
        }

        self
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration before constructing components
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingRequired(
                "Anthropic API key (set ANTHROPIC_API_KEY or provider.api_key)".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate example config content
    pub fn example() -> String {
        toml::to_string_pretty(&BrokerConfig::default()).unwrap_or_default()
    }
}

/// Builder for creating a BrokerConfig programmatically
pub struct ConfigBuilder {
    config: BrokerConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::default(),
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.provider.api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.provider.base_url = url.into();
        self
    }

    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.config.provider.enable_cache = enabled;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.provider.timeout_secs = secs;
        self
    }

    pub fn full_model(mut self, model: impl Into<String>) -> Self {
        self.config.models.full_model = model.into();
        self
    }

    pub fn basic_model(mut self, model: impl Into<String>) -> Self {
        self.config.models.basic_model = model.into();
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store.database_path = path.into();
        self
    }

    pub fn build(self) -> BrokerConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();

        assert_eq!(config.models.full_model, SONNET_4_5);
        assert_eq!(config.models.basic_model, HAIKU_4_5);
        assert!(config.provider.enable_cache);
        assert_eq!(config.models.full_max_tokens, 2048);
        assert_eq!(config.models.basic_max_tokens, 1536);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .api_key("test-key")
            .enable_cache(false)
            .database_path("/tmp/test.db")
            .build();

        assert_eq!(config.provider.api_key, Some("test-key".to_string()));
        assert!(!config.provider.enable_cache);
        assert_eq!(config.store.database_path, PathBuf::from("/tmp/test.db"));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = BrokerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));

        let config = ConfigBuilder::new().api_key("k").build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config() {
        let example = BrokerConfig::example();

        assert!(example.contains("[provider]"));
        assert!(example.contains("[models]"));
        assert!(example.contains("[store]"));
    }
}
