//! Candle cache (component B): TTL + LRU + byte-budget, thread-safe.
//!
//! A single `tokio::sync::Mutex` guards the map, LRU order, and byte
//! counter together, matching the "one reentrant lock covering map + LRU
//! order + byte counter" requirement. A background janitor task sweeps
//! expired entries every 60 seconds.

use crate::types::{CandleSeries, DataRequest};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Wraps a `CandleSeries` with cache bookkeeping.
pub struct CacheEntry {
    pub series: CandleSeries,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: usize,
}

impl CacheEntry {
    fn new(series: CandleSeries, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        let size_bytes = estimate_size(&series);
        Self {
            series,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds),
            access_count: 0,
            last_accessed: now,
            size_bytes,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_stale(&self, max_age_secs: i64) -> bool {
        Utc::now() - self.created_at > chrono::Duration::seconds(max_age_secs)
    }

    fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}

/// Rough per-candle footprint: 4 f64 OHLC + volume + optional fields + the
/// DateTime/Symbol overhead, rounded to a stable estimate rather than a
/// true `size_of` walk (candles are heap-adjacent via Vec, not boxed).
fn estimate_size(series: &CandleSeries) -> usize {
    const PER_CANDLE_BYTES: usize = 120;
    series.candles.len() * PER_CANDLE_BYTES + 64
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// LRU order, most-recently-used at the end.
    order: Vec<String>,
    total_bytes: usize,
    max_bytes: usize,
    default_ttl_secs: i64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn touch_order(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn evict_to_budget(&mut self) {
        let target = (self.max_bytes as f64 * 0.8) as usize;
        while self.total_bytes > target && !self.order.is_empty() {
            let key = self.order.remove(0);
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
                self.evictions += 1;
            }
        }
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        if let Some(old) = self.entries.remove(&key) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
            self.order.retain(|k| k != &key);
        }
        self.total_bytes += entry.size_bytes;
        self.entries.insert(key.clone(), entry);
        self.order.push(key);
        self.evict_to_budget();
    }
}

/// Thread-safe candle cache with TTL, LRU eviction, and a byte budget.
pub struct CandleCache {
    inner: Arc<Mutex<Inner>>,
}

impl CandleCache {
    pub fn new(max_size_mb: usize, default_ttl_secs: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                total_bytes: 0,
                max_bytes: max_size_mb * 1_048_576,
                default_ttl_secs,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
        }
    }

    /// `get(request) -> Option<CandleSeries>`. Misses when the key is
    /// absent, the entry is expired, `force_refresh` is set, or the entry
    /// is older than `cache_staleness_budget_secs`.
    pub async fn get(&self, request: &DataRequest) -> Option<CandleSeries> {
        let key = request.cache_key();
        let mut inner = self.inner.lock().await;

        if request.force_refresh {
            inner.misses += 1;
            return None;
        }

        let hit = inner
            .entries
            .get(&key)
            .map(|e| !e.is_expired() && !e.is_stale(request.cache_staleness_budget_secs))
            .unwrap_or(false);

        if !hit {
            inner.misses += 1;
            return None;
        }

        inner.touch_order(&key);
        let entry = inner.entries.get_mut(&key).expect("checked above");
        entry.touch();
        inner.hits += 1;
        Some(entry.series.clone())
    }

    pub async fn put(&self, request: &DataRequest, series: CandleSeries, ttl_secs: Option<i64>) {
        let key = request.cache_key();
        let mut inner = self.inner.lock().await;
        let ttl = ttl_secs.unwrap_or(inner.default_ttl_secs);
        let entry = CacheEntry::new(series, ttl);
        inner.insert(key, entry);
    }

    /// Drop all entries for `symbol`, optionally restricted to `interval`.
    pub async fn invalidate(&self, symbol: &str, interval: Option<&str>) {
        let mut inner = self.inner.lock().await;
        let matches: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| {
                let mut parts = k.splitn(2, '|');
                let k_symbol = parts.next().unwrap_or("");
                if k_symbol != symbol {
                    return false;
                }
                match interval {
                    Some(iv) => k.split('|').nth(1) == Some(iv),
                    None => true,
                }
            })
            .cloned()
            .collect();

        for key in matches {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            }
            inner.order.retain(|k| k != &key);
        }
    }

    /// Sweep expired entries. Intended to run on a 60s interval from the
    /// scheduler's background task set.
    pub async fn sweep_expired(&self) {
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            }
            inner.order.retain(|k| k != key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "cache janitor swept expired entries");
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            bytes: inner.total_bytes,
        }
    }

    /// Spawns the background janitor loop on the current tokio runtime.
    /// Returns a handle the caller can abort on shutdown.
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                cache.sweep_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Interval, Symbol};

    fn sample_series(symbol: &str) -> CandleSeries {
        let candle = Candle::new(
            Symbol::new(symbol),
            Interval::M1,
            Utc::now(),
            100.0,
            101.0,
            99.0,
            100.5,
            10.0,
        )
        .unwrap();
        CandleSeries::new(Symbol::new(symbol), Interval::M1, vec![candle], "test")
    }

    #[tokio::test]
    async fn put_then_get_within_ttl_hits() {
        let cache = CandleCache::new(100, 60);
        let req = DataRequest::new(Symbol::new("BTCUSDT"), Interval::M1, 100);
        cache.put(&req, sample_series("BTCUSDT"), None).await;
        assert!(cache.get(&req).await.is_some());
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn get_misses_when_expired() {
        let cache = CandleCache::new(100, 0);
        let req = DataRequest::new(Symbol::new("BTCUSDT"), Interval::M1, 100);
        cache.put(&req, sample_series("BTCUSDT"), Some(-1)).await;
        assert!(cache.get(&req).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_drops_all_matching_symbol_entries() {
        let cache = CandleCache::new(100, 60);
        let req1 = DataRequest::new(Symbol::new("BTCUSDT"), Interval::M1, 100);
        let req2 = DataRequest::new(Symbol::new("BTCUSDT"), Interval::H1, 100);
        cache.put(&req1, sample_series("BTCUSDT"), None).await;
        cache.put(&req2, sample_series("BTCUSDT"), None).await;
        cache.invalidate("BTCUSDT", None).await;
        assert!(cache.get(&req1).await.is_none());
        assert!(cache.get(&req2).await.is_none());
    }

    #[tokio::test]
    async fn force_refresh_always_misses() {
        let cache = CandleCache::new(100, 60);
        let mut req = DataRequest::new(Symbol::new("BTCUSDT"), Interval::M1, 100);
        cache.put(&req, sample_series("BTCUSDT"), None).await;
        req.force_refresh = true;
        assert!(cache.get(&req).await.is_none());
    }
}
