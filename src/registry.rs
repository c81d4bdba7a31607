//! Endpoint registry: the fixed URL list and per-endpoint health metrics.
//!
//! All metrics live behind one registry-wide lock so concurrent `execute`
//! calls see atomic updates. Only the health tracker mutates them.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Result, RouterError};

/// Per-endpoint health metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_response_time_ms: u64,
    pub last_response_time_ms: u64,
    pub avg_response_time_ms: f64,
    pub last_used_at: Option<Instant>,
    pub consecutive_failures: u32,
    /// Circuit-breaker state
    pub available: bool,
    /// When an open circuit closes again
    pub next_eligible_at: Option<Instant>,
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            total_response_time_ms: 0,
            last_response_time_ms: 0,
            avg_response_time_ms: 0.0,
            last_used_at: None,
            consecutive_failures: 0,
            available: true,
            next_eligible_at: None,
        }
    }
}

impl EndpointMetrics {
    /// Never reported on, in either direction
    pub fn is_unused(&self) -> bool {
        self.success_count == 0 && self.failure_count == 0
    }

    /// successes / (successes + failures); an unused endpoint scores 1.0
    pub fn success_ratio(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 1.0;
        }
        self.success_count as f64 / total as f64
    }

    /// Time left before an open circuit closes
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.next_eligible_at
            .map(|at| at.saturating_duration_since(now))
    }
}

/// A configured endpoint and its metrics
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub metrics: EndpointMetrics,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metrics: EndpointMetrics::default(),
        }
    }
}

/// Fixed, ordered set of endpoints
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Mutex<Vec<Endpoint>>,
}

impl EndpointRegistry {
    /// Build the registry from the configured URLs
    ///
    /// Blank entries and duplicates are dropped; the first occurrence keeps
    /// its position. An empty result is a configuration error.
    pub fn new<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut endpoints: Vec<Endpoint> = Vec::new();
        for url in urls {
            let url = url.as_ref().trim();
            if url.is_empty() {
                continue;
            }
            if endpoints.iter().any(|e| e.url == url) {
                warn!(url = %url, "duplicate endpoint ignored");
                continue;
            }
            endpoints.push(Endpoint::new(url));
        }

        if endpoints.is_empty() {
            return Err(RouterError::Configuration(
                "no RPC endpoints configured".to_string(),
            ));
        }

        info!(count = endpoints.len(), "endpoint registry initialized");
        Ok(Self {
            endpoints: Mutex::new(endpoints),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Configured URLs in order
    pub fn urls(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.url.clone()).collect()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().iter().any(|e| e.url == url)
    }

    /// Copy of the endpoint's current metrics
    pub fn metrics(&self, url: &str) -> Option<EndpointMetrics> {
        self.lock()
            .iter()
            .find(|e| e.url == url)
            .map(|e| e.metrics.clone())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Endpoint>> {
        // Metric updates never leave the vector half-written, so a poisoned
        // lock still holds consistent data.
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
