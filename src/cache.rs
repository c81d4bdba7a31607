//! TTL- and capacity-bounded response cache keyed by (method, params).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
    /// Insertion order, breaks `stored_at` ties
    seq: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

/// Response cache shared by all requests of one router
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_bounds(config.ttl(), config.capacity)
    }

    pub fn with_bounds(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live cached value, if any. Expired entries are removed on the way.
    pub fn get(&self, method: &str, params: &[Value]) -> Option<Value> {
        let key = cache_key(method, params);
        let now = Instant::now();
        let mut state = self.lock();

        match state.entries.get(&key) {
            Some(entry) if entry.is_live(now) => {
                debug!(method = %method, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                state.entries.remove(&key);
                debug!(method = %method, "cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store a value with the cache-wide TTL
    pub fn put(&self, method: &str, params: &[Value], value: Value) {
        self.put_with_ttl(method, params, value, self.ttl);
    }

    /// Store a value with an explicit TTL
    pub fn put_with_ttl(&self, method: &str, params: &[Value], value: Value, ttl: Duration) {
        let key = cache_key(method, params);
        let now = Instant::now();
        let mut state = self.lock();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity {
            // drop expired entries before evicting a live one
            state.entries.retain(|_, entry| entry.is_live(now));
            if state.entries.len() >= self.capacity {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| (entry.stored_at, entry.seq))
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    state.entries.remove(&oldest);
                    debug!(evicted = %oldest, "cache full, evicted oldest entry");
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                ttl,
                seq,
            },
        );
    }

    /// Entries currently held, including expired ones not yet looked up
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `method:params` with params as compact JSON
///
/// Array order is kept as given; object keys serialize in sorted order, so
/// equal params always produce the same key.
pub fn cache_key(method: &str, params: &[Value]) -> String {
    let params = serde_json::to_string(params).unwrap_or_default();
    format!("{}:{}", method, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(ttl_ms: u64, capacity: usize) -> ResponseCache {
        ResponseCache::with_bounds(Duration::from_millis(ttl_ms), capacity)
    }

    #[test]
    fn test_cache_key_is_canonical() {
        let a = cache_key("eth_call", &[json!({"to": "0x1", "data": "0x2"}), json!("latest")]);
        let b = cache_key("eth_call", &[json!({"data": "0x2", "to": "0x1"}), json!("latest")]);
        assert_eq!(a, b);
        assert_eq!(a, r#"eth_call:[{"data":"0x2","to":"0x1"},"latest"]"#);

        // param order matters
        let c = cache_key("eth_call", &[json!("latest"), json!({"to": "0x1", "data": "0x2"})]);
        assert_ne!(a, c);
        assert_ne!(cache_key("eth_blockNumber", &[]), cache_key("eth_chainId", &[]));
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache(30_000, 10);
        assert!(cache.get("eth_chainId", &[]).is_none());

        cache.put("eth_chainId", &[], json!("0x1"));
        assert_eq!(cache.get("eth_chainId", &[]), Some(json!("0x1")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_and_are_removed() {
        let cache = cache(10_000, 10);
        cache.put("eth_blockNumber", &[], json!("0x10"));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(cache.get("eth_blockNumber", &[]), Some(json!("0x10")));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("eth_blockNumber", &[]).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let cache = cache(30_000, 10);
        cache.put_with_ttl("eth_gasPrice", &[], json!("0x5"), Duration::from_secs(1));
        cache.put("eth_chainId", &[], json!("0x1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("eth_gasPrice", &[]).is_none());
        assert_eq!(cache.get("eth_chainId", &[]), Some(json!("0x1")));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = cache(30_000, 3);
        for i in 0..10 {
            cache.put("eth_getBlockByNumber", &[json!(i)], json!(i * 100));
            assert!(cache.len() <= 3);
        }

        for i in 0..7 {
            assert!(cache.get("eth_getBlockByNumber", &[json!(i)]).is_none());
        }
        for i in 7..10 {
            assert_eq!(
                cache.get("eth_getBlockByNumber", &[json!(i)]),
                Some(json!(i * 100))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_evicted_before_live_ones() {
        let cache = cache(30_000, 2);
        cache.put("eth_chainId", &[], json!("0x1"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.put_with_ttl("eth_gasPrice", &[], json!("0x5"), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.put("eth_blockNumber", &[], json!("0x10"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("eth_chainId", &[]), Some(json!("0x1")));
        assert_eq!(cache.get("eth_blockNumber", &[]), Some(json!("0x10")));
        assert!(cache.get("eth_gasPrice", &[]).is_none());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = cache(30_000, 2);
        cache.put("a", &[], json!(1));
        cache.put("b", &[], json!(2));
        cache.put("a", &[], json!(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a", &[]), Some(json!(3)));
        assert_eq!(cache.get("b", &[]), Some(json!(2)));
    }

    #[test]
    fn test_clear() {
        let cache = cache(30_000, 5);
        cache.put("a", &[], json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
