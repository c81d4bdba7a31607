//! Endpoint selection for sequential and racing requests.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::health::HealthTracker;
use crate::registry::Endpoint;

/// Minimum success ratio for latency-based selection
const HEALTHY_RATIO: f64 = 0.7;

/// Ratios closer than this are compared on latency instead
const RATIO_TOLERANCE: f64 = 0.1;

/// Picks endpoints from the registry based on current health
pub struct Selector {
    health: Arc<HealthTracker>,
    cursor: AtomicUsize,
}

impl Selector {
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self {
            health,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Choose one endpoint for a sequential attempt
    ///
    /// Never-used endpoints go first (in configuration order), then the
    /// fastest endpoint with a success ratio above 0.7, then round-robin.
    pub fn pick_one(&self) -> Option<String> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return None;
        }

        if let Some(fresh) = candidates.iter().find(|e| e.metrics.is_unused()) {
            debug!(url = %fresh.url, "selected untried endpoint");
            return Some(fresh.url.clone());
        }

        let fastest = candidates
            .iter()
            .filter(|e| {
                e.metrics.success_count > 0 && e.metrics.success_ratio() > HEALTHY_RATIO
            })
            .min_by(|a, b| {
                a.metrics
                    .avg_response_time_ms
                    .partial_cmp(&b.metrics.avg_response_time_ms)
                    .unwrap_or(CmpOrdering::Equal)
            });
        if let Some(best) = fastest {
            debug!(
                url = %best.url,
                avg_ms = best.metrics.avg_response_time_ms,
                "selected fastest healthy endpoint"
            );
            return Some(best.url.clone());
        }

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        debug!(url = %candidates[idx].url, "selected endpoint round-robin");
        Some(candidates[idx].url.clone())
    }

    /// Choose up to `n` endpoints to race, best first
    pub fn pick_top(&self, n: usize) -> Vec<String> {
        let mut ranked = self.candidates();
        rank(&mut ranked);
        ranked.into_iter().take(n).map(|e| e.url).collect()
    }

    /// Available endpoints, running the safety valve when there are none
    fn candidates(&self) -> Vec<Endpoint> {
        let available = self.health.available_endpoints();
        if !available.is_empty() {
            return available;
        }
        self.health.reset_all();
        self.health.available_endpoints()
    }
}

/// Success ratio descending; near-equal ratios fall back to latency ascending
fn compare(a: &Endpoint, b: &Endpoint) -> CmpOrdering {
    let (ra, rb) = (a.metrics.success_ratio(), b.metrics.success_ratio());
    if (ra - rb).abs() < RATIO_TOLERANCE {
        a.metrics
            .avg_response_time_ms
            .partial_cmp(&b.metrics.avg_response_time_ms)
            .unwrap_or(CmpOrdering::Equal)
    } else {
        rb.partial_cmp(&ra).unwrap_or(CmpOrdering::Equal)
    }
}

/// Stable insertion sort with `compare`.
///
/// The tolerance band makes `compare` non-transitive, which `slice::sort_by`
/// may reject at runtime.
fn rank(endpoints: &mut [Endpoint]) {
    for i in 1..endpoints.len() {
        let mut j = i;
        while j > 0 && compare(&endpoints[j], &endpoints[j - 1]) == CmpOrdering::Less {
            endpoints.swap(j, j - 1);
            j -= 1;
        }
    }
}
