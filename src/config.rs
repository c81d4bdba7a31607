use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, RouterError};

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Ordered list of JSON-RPC endpoint URLs
    pub endpoints: Vec<String>,

    /// Defaults applied to every request
    #[serde(default)]
    pub request: RequestConfig,

    /// Response cache bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// Circuit breaker settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Sequential retry backoff
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub use_parallel: bool,
    #[serde(default = "default_parallel_count")]
    pub parallel_count: usize,
    #[serde(default)]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_parallel_count() -> usize {
    3
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_cache_capacity() -> usize {
    100
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_backoff_initial_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_backoff_max_ms() -> u64 {
    2_000
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            use_parallel: false,
            parallel_count: default_parallel_count(),
            use_cache: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            multiplier: default_backoff_multiplier(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl HealthConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (0-based): initial * multiplier^retry, capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let ms = self.initial_ms as f64 * self.multiplier.powi(retry as i32);
        Duration::from_millis(ms.min(self.max_ms as f64) as u64)
    }
}

impl RouterConfig {
    /// Configuration with defaults for everything but the endpoint list
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            request: RequestConfig::default(),
            cache: CacheConfig::default(),
            health: HealthConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), endpoints = config.endpoints.len(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RouterConfig =
            toml::from_str(content).map_err(|e| RouterError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables
    ///
    /// `RPC_ENDPOINTS` is a comma separated URL list. `RPC_CACHE_TTL_MS` and
    /// `RPC_CACHE_CAPACITY` optionally override the cache bounds.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var("RPC_ENDPOINTS")
            .map_err(|_| RouterError::Configuration("RPC_ENDPOINTS is not set".to_string()))?;
        let mut config = Self::new(parse_endpoint_list(&raw));

        if let Some(ttl_ms) = env_number("RPC_CACHE_TTL_MS")? {
            config.cache.ttl_ms = ttl_ms;
        }
        if let Some(capacity) = env_number("RPC_CACHE_CAPACITY")? {
            config.cache.capacity = capacity as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the router cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.iter().all(|url| url.trim().is_empty()) {
            return Err(RouterError::Configuration(
                "endpoint list is empty".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(RouterError::Configuration(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.request.parallel_count == 0 {
            return Err(RouterError::Configuration(
                "parallel_count must be at least 1".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(RouterError::Configuration(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(RouterError::Configuration(
                "backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a comma separated URL list, trimming blanks
pub fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_number(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| RouterError::Configuration(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
