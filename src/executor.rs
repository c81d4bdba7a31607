//! Request execution: cache lookup, endpoint selection, retry or race, and
//! health/cache bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::{BackoffConfig, RequestConfig, RouterConfig};
use crate::error::{EndpointFailure, Result, RouterError};
use crate::health::{EndpointSnapshot, HealthTracker};
use crate::registry::EndpointRegistry;
use crate::selector::Selector;
use crate::transport::{HttpTransport, Transport};

/// Attempts made by a sequential request before giving up
pub const MAX_SEQUENTIAL_ATTEMPTS: usize = 3;

/// Per-request routing options
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Deadline for each individual attempt
    pub timeout: Duration,
    /// Race `parallel_count` endpoints instead of retrying sequentially
    pub use_parallel: bool,
    pub parallel_count: usize,
    pub use_cache: bool,
    /// Overrides the cache-wide TTL for this request's entry
    pub cache_ttl: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from(&RequestConfig::default())
    }
}

impl From<&RequestConfig> for RequestOptions {
    fn from(config: &RequestConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            use_parallel: config.use_parallel,
            parallel_count: config.parallel_count,
            use_cache: config.use_cache,
            cache_ttl: None,
        }
    }
}

impl RequestOptions {
    /// Race `count` endpoints
    pub fn parallel(mut self, count: usize) -> Self {
        self.use_parallel = true;
        self.parallel_count = count;
        self
    }

    /// Retry one endpoint at a time
    pub fn sequential(mut self) -> Self {
        self.use_parallel = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache(mut self) -> Self {
        self.use_cache = true;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.use_cache = true;
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Routes JSON-RPC calls across the configured endpoints
///
/// Built once by the application and shared (typically behind an `Arc`).
pub struct RequestExecutor {
    health: Arc<HealthTracker>,
    selector: Selector,
    cache: ResponseCache,
    transport: Arc<dyn Transport>,
    backoff: BackoffConfig,
    defaults: RequestOptions,
}

impl RequestExecutor {
    /// Create an executor with a custom transport
    pub fn new(config: &RouterConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(EndpointRegistry::new(&config.endpoints)?);
        let health = Arc::new(HealthTracker::new(registry.clone(), &config.health));
        let selector = Selector::new(health.clone());

        info!(
            endpoints = registry.len(),
            cache_ttl_ms = config.cache.ttl_ms,
            cache_capacity = config.cache.capacity,
            "RPC router ready"
        );

        Ok(Self {
            health,
            selector,
            cache: ResponseCache::new(&config.cache),
            transport,
            backoff: config.backoff.clone(),
            defaults: RequestOptions::from(&config.request),
        })
    }

    /// Create an executor that talks HTTP
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        Self::new(config, Arc::new(HttpTransport::new()))
    }

    /// Options built from the `[request]` configuration section
    pub fn default_options(&self) -> &RequestOptions {
        &self.defaults
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Health of every configured endpoint
    pub fn endpoint_health(&self) -> Vec<EndpointSnapshot> {
        self.health.snapshot()
    }

    /// Execute with the configured default options
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let options = self.defaults.clone();
        self.execute(method, params, &options).await
    }

    /// Execute one JSON-RPC call
    ///
    /// Transient endpoint failures are retried or raced away. Callers only see
    /// [`RouterError::Exhausted`] (every endpoint tried failed) or
    /// [`RouterError::Configuration`].
    pub async fn execute(
        &self,
        method: &str,
        params: Vec<Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        if options.use_parallel && options.parallel_count == 0 {
            return Err(RouterError::Configuration(
                "parallel_count must be at least 1".to_string(),
            ));
        }

        if options.use_cache {
            if let Some(value) = self.cache.get(method, &params) {
                return Ok(value);
            }
        }

        let value = if options.use_parallel {
            self.execute_parallel(method, &params, options).await?
        } else {
            self.execute_sequential(method, &params, options).await?
        };

        if options.use_cache {
            match options.cache_ttl {
                Some(ttl) => self.cache.put_with_ttl(method, &params, value.clone(), ttl),
                None => self.cache.put(method, &params, value.clone()),
            }
        }

        Ok(value)
    }

    /// Execute and decode the result into `T`
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let value = self.execute(method, params, options).await?;
        serde_json::from_value(value).map_err(|e| RouterError::Decode(e.to_string()))
    }

    async fn execute_sequential(
        &self,
        method: &str,
        params: &[Value],
        options: &RequestOptions,
    ) -> Result<Value> {
        let mut failures = Vec::with_capacity(MAX_SEQUENTIAL_ATTEMPTS);

        for attempt in 0..MAX_SEQUENTIAL_ATTEMPTS {
            let url = self.selector.pick_one().ok_or_else(no_endpoints)?;
            let (elapsed, outcome) = self.attempt(&url, method, params, options.timeout).await;

            match outcome {
                Ok(value) => {
                    self.health.report_success(&url, elapsed);
                    debug!(
                        url = %url,
                        method = %method,
                        attempt = attempt + 1,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "request succeeded"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    self.health.report_failure(&url);
                    debug!(url = %url, method = %method, attempt = attempt + 1, error = %e, "request failed");
                    failures.push(EndpointFailure::new(url, e));
                }
            }

            if attempt + 1 < MAX_SEQUENTIAL_ATTEMPTS {
                tokio::time::sleep(self.backoff.delay(attempt as u32)).await;
            }
        }

        warn!(method = %method, attempts = MAX_SEQUENTIAL_ATTEMPTS, "all attempts failed");
        Err(RouterError::Exhausted {
            attempts: MAX_SEQUENTIAL_ATTEMPTS,
            failures,
        })
    }

    async fn execute_parallel(
        &self,
        method: &str,
        params: &[Value],
        options: &RequestOptions,
    ) -> Result<Value> {
        let urls = self.selector.pick_top(options.parallel_count);
        if urls.is_empty() {
            return Err(no_endpoints());
        }
        debug!(method = %method, endpoints = ?urls, "racing request");

        let mut in_flight: FuturesUnordered<_> = urls
            .iter()
            .map(|url| async move {
                let (elapsed, outcome) = self.attempt(url, method, params, options.timeout).await;
                (url, elapsed, outcome)
            })
            .collect();

        let mut failures = Vec::with_capacity(urls.len());
        while let Some((url, elapsed, outcome)) = in_flight.next().await {
            match outcome {
                Ok(value) => {
                    self.health.report_success(url, elapsed);
                    debug!(
                        url = %url,
                        method = %method,
                        elapsed_ms = elapsed.as_millis() as u64,
                        cancelled = in_flight.len(),
                        "race won"
                    );
                    // Dropping `in_flight` cancels the slower requests.
                    return Ok(value);
                }
                Err(e) => {
                    self.health.report_failure(url);
                    debug!(url = %url, method = %method, error = %e, "race participant failed");
                    failures.push(EndpointFailure::new(url.clone(), e));
                }
            }
        }

        warn!(method = %method, endpoints = urls.len(), "every raced endpoint failed");
        Err(RouterError::Exhausted {
            attempts: urls.len(),
            failures,
        })
    }

    /// One transport call under its deadline
    async fn attempt(
        &self,
        url: &str,
        method: &str,
        params: &[Value],
        timeout: Duration,
    ) -> (Duration, Result<Value>) {
        let start = Instant::now();
        let outcome =
            match tokio::time::timeout(timeout, self.transport.send(url, method, params, timeout))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(RouterError::Timeout(timeout.as_millis() as u64)),
            };
        (start.elapsed(), outcome)
    }
}

fn no_endpoints() -> RouterError {
    RouterError::Configuration("no RPC endpoints configured".to_string())
}
