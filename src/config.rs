use crate::constants;
use crate::error::{GeocoderError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
    pub processing: ProcessingConfig,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Never echoed back through the configuration endpoint.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub delay_between_requests_ms: u64,
    pub max_concurrent_requests: u32,
    pub retry_on_rate_limit: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub enable_limits: bool,
    pub max_addresses_per_batch: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: constants::DEFAULT_PROVIDER_URL.to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: constants::DEFAULT_REQUESTS_PER_MINUTE,
            delay_between_requests_ms: constants::DEFAULT_DELAY_BETWEEN_REQUESTS_MS,
            max_concurrent_requests: constants::DEFAULT_MAX_CONCURRENT_REQUESTS,
            retry_on_rate_limit: true,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay_ms: constants::DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            enable_limits: true,
            max_addresses_per_batch: constants::DEFAULT_MAX_ADDRESSES_PER_BATCH,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_SERVER_PORT,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: constants::DEFAULT_METRICS_PORT,
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(constants::DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                GeocoderError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            info!("Loaded configuration from {}", path.display());
            Self::from_toml_str(&content)?
        } else {
            warn!("Config file '{}' not found, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment-style overrides; `lookup` returns the value for a key if set.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(constants::ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup(constants::ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.provider.base_url = url;
        }
        if let Some(port) = lookup(constants::ENV_PORT) {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!("Ignoring invalid {} value: {}", constants::ENV_PORT, port),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(GeocoderError::Config(
                "rate_limit.requests_per_minute must be greater than zero".into(),
            ));
        }
        if self.rate_limit.max_concurrent_requests == 0 {
            return Err(GeocoderError::Config(
                "rate_limit.max_concurrent_requests must be greater than zero".into(),
            ));
        }
        if self.processing.enable_limits && self.processing.max_addresses_per_batch == 0 {
            return Err(GeocoderError::Config(
                "processing.max_addresses_per_batch must be greater than zero when limits are enabled"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.provider
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}
