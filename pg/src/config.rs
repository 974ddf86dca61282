//! panelgen configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{ImageQuality, ImageSize, ProviderType};
use crate::fallback::FallbackStrategy;
use crate::provider::MockStep;
use crate::retry::RetryConfig;

/// Main panelgen configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Providers in fallback order; the first one is the default primary
    pub providers: Vec<ProviderConfig>,

    /// Retry/backoff behavior
    pub retry: RetryConfig,

    /// Fallback strategy once a provider gives up
    pub fallback: FallbackStrategy,

    /// Worker pool settings
    pub queue: QueueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            providers: vec![ProviderConfig::mock("mock")],
            retry: RetryConfig::default(),
            fallback: FallbackStrategy::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks provider names, pool size, backoff parameters and that every
    /// remote provider has a resolvable API key.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(eyre::eyre!("At least one provider must be configured"));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(eyre::eyre!("Provider names must not be empty"));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(eyre::eyre!("Duplicate provider name: {}", provider.name));
            }
            if provider.provider_type.is_remote() && provider.resolve_api_key().is_none() {
                return Err(eyre::eyre!(
                    "API key for provider '{}' not found. Set the {} environment variable.",
                    provider.name,
                    provider.api_key_env_name()
                ));
            }
        }

        if self.queue.max_concurrent == 0 {
            return Err(eyre::eyre!("queue.max-concurrent must be at least 1"));
        }

        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(eyre::eyre!(
                "retry.backoff-factor must be >= 1.0 (got {})",
                self.retry.backoff_factor
            ));
        }

        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .panelgen.yml
        let local_config = PathBuf::from(".panelgen.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/panelgen/panelgen.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("panelgen").join("panelgen.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Configuration for one image provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Unique name used in task routing, statistics and fallback ordering
    pub name: String,

    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    /// API key given inline; prefer `api-key-env`
    #[serde(rename = "api-key", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env", skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(rename = "base-url", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Requests per minute
    #[serde(rename = "rate-limit")]
    pub rate_limit: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Overrides `retry.max-retries` for this provider
    #[serde(rename = "max-retries", skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// USD, used by pricing fallbacks and the cheapest-fallback strategy
    #[serde(rename = "cost-per-image")]
    pub cost_per_image: f64,

    #[serde(rename = "default-size")]
    pub default_size: ImageSize,

    #[serde(rename = "default-quality")]
    pub default_quality: ImageQuality,

    /// Scripted outcomes for mock providers
    #[serde(rename = "mock-script", skip_serializing_if = "Vec::is_empty")]
    pub mock_script: Vec<MockStep>,

    /// Simulated latency for mock providers
    #[serde(rename = "mock-latency-ms")]
    pub mock_latency_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            provider_type: ProviderType::Mock,
            api_key: None,
            api_key_env: None,
            base_url: None,
            model: None,
            rate_limit: 10,
            timeout_ms: 60_000,
            max_retries: None,
            cost_per_image: 0.04,
            default_size: ImageSize::Square1024,
            default_quality: ImageQuality::Standard,
            mock_script: Vec::new(),
            mock_latency_ms: 0,
        }
    }
}

impl ProviderConfig {
    /// A mock provider config with the given name
    pub fn mock(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cost_per_image: 0.0,
            ..Default::default()
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_cost(mut self, cost_per_image: f64) -> Self {
        self.cost_per_image = cost_per_image;
        self
    }

    pub fn with_quality(mut self, quality: ImageQuality) -> Self {
        self.default_quality = quality;
        self
    }

    /// Environment variable consulted for the API key
    pub fn api_key_env_name(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| self.provider_type.default_api_key_env().to_string())
    }

    /// Inline key, else the environment variable; empty values count as missing
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let env_var = self.api_key_env_name();
        if env_var.is_empty() {
            return None;
        }
        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of workers
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// How long an idle worker waits on the queue before re-checking for shutdown
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on how long `stop` waits for workers
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,

    /// Enforce per-provider sliding-window rate limits
    #[serde(rename = "enable-rate-limiting")]
    pub enable_rate_limiting: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval_ms: 1000,
            shutdown_timeout_ms: 5000,
            enable_rate_limiting: true,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
