//! Health tracking and the per-endpoint circuit breaker.
//!
//! An endpoint's circuit opens after `failure_threshold` consecutive failures
//! and stays open until the cool-down elapses. Recovery is evaluated lazily
//! against `next_eligible_at` whenever availability is read, so no timers are
//! left behind.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::registry::{Endpoint, EndpointMetrics, EndpointRegistry};

/// Serializable view of one endpoint's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub url: String,
    pub available: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub success_ratio: f64,
    pub avg_response_time_ms: f64,
    pub last_response_time_ms: u64,
    /// Milliseconds since the endpoint was last reported on
    pub last_used_ms_ago: Option<u64>,
    /// Milliseconds until an open circuit closes
    pub cooldown_remaining_ms: Option<u64>,
}

/// Records request outcomes and decides endpoint availability
pub struct HealthTracker {
    registry: Arc<EndpointRegistry>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl HealthTracker {
    pub fn new(registry: Arc<EndpointRegistry>, config: &HealthConfig) -> Self {
        Self {
            registry,
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown(),
        }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Record a successful call and its response time
    pub fn report_success(&self, url: &str, response_time: Duration) {
        let now = Instant::now();
        let mut endpoints = self.registry.lock();
        let Some(endpoint) = endpoints.iter_mut().find(|e| e.url == url) else {
            debug!(url = %url, "success reported for unknown endpoint");
            return;
        };

        let elapsed_ms = response_time.as_millis() as u64;
        let m = &mut endpoint.metrics;
        m.success_count += 1;
        m.consecutive_failures = 0;
        m.last_response_time_ms = elapsed_ms;
        m.total_response_time_ms += elapsed_ms;
        m.avg_response_time_ms = m.total_response_time_ms as f64 / m.success_count as f64;
        m.last_used_at = Some(now);
        if !m.available {
            info!(url = %url, "circuit closed by successful response");
        }
        m.available = true;
        m.next_eligible_at = None;
    }

    /// Record a failed call (node error, transport error or timeout)
    pub fn report_failure(&self, url: &str) {
        let now = Instant::now();
        let mut endpoints = self.registry.lock();
        let Some(endpoint) = endpoints.iter_mut().find(|e| e.url == url) else {
            debug!(url = %url, "failure reported for unknown endpoint");
            return;
        };

        refresh(endpoint, now);
        let m = &mut endpoint.metrics;
        m.failure_count += 1;
        m.consecutive_failures += 1;
        m.last_used_at = Some(now);

        // An already open circuit keeps its original deadline.
        if m.available && m.consecutive_failures >= self.failure_threshold {
            m.available = false;
            m.next_eligible_at = Some(now + self.cooldown);
            warn!(
                url = %url,
                consecutive_failures = m.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit opened"
            );
        }
    }

    /// Whether the endpoint may currently receive traffic
    pub fn is_available(&self, url: &str) -> bool {
        let now = Instant::now();
        let mut endpoints = self.registry.lock();
        match endpoints.iter_mut().find(|e| e.url == url) {
            Some(endpoint) => {
                refresh(endpoint, now);
                endpoint.metrics.available
            }
            None => false,
        }
    }

    /// Available endpoints in configuration order
    pub fn available_endpoints(&self) -> Vec<Endpoint> {
        let now = Instant::now();
        let mut endpoints = self.registry.lock();
        endpoints
            .iter_mut()
            .filter_map(|endpoint| {
                refresh(endpoint, now);
                endpoint.metrics.available.then(|| endpoint.clone())
            })
            .collect()
    }

    /// Safety valve: mark every endpoint available again
    ///
    /// Used when no endpoint is available at all, so a correlated outage can
    /// never lock the router out permanently. Failure streaks are kept: an
    /// endpoint that fails again right away reopens its circuit.
    pub fn reset_all(&self) {
        let mut endpoints = self.registry.lock();
        warn!(count = endpoints.len(), "no endpoints available, resetting all circuits");
        for endpoint in endpoints.iter_mut() {
            let m = &mut endpoint.metrics;
            m.available = true;
            m.next_eligible_at = None;
        }
    }

    /// Point-in-time health of every endpoint
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = Instant::now();
        let mut endpoints = self.registry.lock();
        endpoints
            .iter_mut()
            .map(|endpoint| {
                refresh(endpoint, now);
                snapshot_of(&endpoint.url, &endpoint.metrics, now)
            })
            .collect()
    }
}

/// Close the circuit if its cool-down has elapsed
fn refresh(endpoint: &mut Endpoint, now: Instant) {
    let m = &mut endpoint.metrics;
    if let Some(at) = m.next_eligible_at {
        if now >= at {
            m.available = true;
            m.consecutive_failures = 0;
            m.next_eligible_at = None;
            info!(url = %endpoint.url, "circuit closed after cool-down");
        }
    }
}

fn snapshot_of(url: &str, m: &EndpointMetrics, now: Instant) -> EndpointSnapshot {
    EndpointSnapshot {
        url: url.to_string(),
        available: m.available,
        success_count: m.success_count,
        failure_count: m.failure_count,
        consecutive_failures: m.consecutive_failures,
        success_ratio: m.success_ratio(),
        avg_response_time_ms: m.avg_response_time_ms,
        last_response_time_ms: m.last_response_time_ms,
        last_used_ms_ago: m
            .last_used_at
            .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        cooldown_remaining_ms: m.cooldown_remaining(now).map(|d| d.as_millis() as u64),
    }
}
