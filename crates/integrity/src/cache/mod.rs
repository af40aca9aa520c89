// LRU decode cache bounded by entry count and estimated bytes.
//
// Layout:
//
//   entries: HashMap<key, DecodeCacheEntry<T>>
//   recency: BTreeMap<tick, key>             front = least recently used
//   expiry:  BTreeMap<(deadline, seq), key>  front = next to expire
//
// TTL is lazy: `get`/`has` drop an expired entry when they see it, and
// `evict_expired` sweeps the expiry index from the front. When room is needed
// expired entries go first, then LRU order.
//
// There is no per-key locking. Two callers racing `get_or_compute` for the
// same key may both compute; layer load-deduplication on top if that matters.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod size;

pub use size::EstimateSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeCacheConfig {
    pub max_entries: usize,
    pub max_size_bytes: usize,
    /// `None` disables expiry.
    pub ttl: Option<Duration>,
    /// Keys on each side of the center that `prefetch_window` loads.
    pub prefetch_radius: usize,
}

impl Default for DecodeCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2_048,
            max_size_bytes: 16 * 1024 * 1024,
            ttl: Some(Duration::from_secs(300)),
            prefetch_radius: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodeCacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub size_bytes: usize,
    tick: u64,
    expiry_key: Option<(Instant, u64)>,
}

/// Cumulative counters since creation or the last `reset_stats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub prefetches: u64,
    pub rejected_inserts: u64,
    pub entries: usize,
    pub size_bytes: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    prefetches: u64,
    rejected_inserts: u64,
}

#[derive(Debug)]
pub struct DecodeCache<T> {
    config: DecodeCacheConfig,
    entries: HashMap<String, DecodeCacheEntry<T>>,
    recency: BTreeMap<u64, String>,
    expiry: BTreeMap<(Instant, u64), String>,
    next_tick: u64,
    current_size_bytes: usize,
    counters: Counters,
}

impl<T> DecodeCache<T> {
    pub fn new(config: DecodeCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            expiry: BTreeMap::new(),
            next_tick: 1,
            current_size_bytes: 0,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DecodeCacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_size_bytes(&self) -> usize {
        self.current_size_bytes
    }

    /// Keys from least to most recently used.
    pub fn lru_keys(&self) -> Vec<&str> {
        self.recency.values().map(String::as_str).collect()
    }

    /// Inspect an entry without touching recency, TTL or stats.
    pub fn peek_entry(&self, key: &str) -> Option<&DecodeCacheEntry<T>> {
        self.entries.get(key)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get(&mut self, key: &str) -> Option<&T> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<&T> {
        if self.expire_if_stale(key, now) || !self.entries.contains_key(key) {
            self.counters.misses += 1;
            return None;
        }

        self.counters.hits += 1;
        let tick = self.bump_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        self.recency.insert(tick, key.to_string());
        entry.tick = tick;
        entry.last_accessed_at = now;
        entry.access_count += 1;
        Some(&entry.value)
    }

    /// Presence check. Drops the entry if expired; never touches recency or stats.
    pub fn has(&mut self, key: &str) -> bool {
        self.has_at(key, Instant::now())
    }

    pub fn has_at(&mut self, key: &str, now: Instant) -> bool {
        !self.expire_if_stale(key, now) && self.entries.contains_key(key)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert with an explicit size estimate. Returns `false` when the value
    /// alone exceeds `max_size_bytes` and was not cached.
    pub fn insert_with_size(
        &mut self,
        key: impl Into<String>,
        value: T,
        size_bytes: usize,
    ) -> bool {
        self.insert_with_size_at(key, value, size_bytes, Instant::now())
    }

    pub fn insert_with_size_at(
        &mut self,
        key: impl Into<String>,
        value: T,
        size_bytes: usize,
        now: Instant,
    ) -> bool {
        let key = key.into();
        self.remove(&key);

        if size_bytes > self.config.max_size_bytes || self.config.max_entries == 0 {
            self.counters.rejected_inserts += 1;
            debug!(key = %key, size_bytes, "decode cache rejected oversized entry");
            return false;
        }

        self.make_room(size_bytes, now);

        let tick = self.bump_tick();
        let expiry_key = self.config.ttl.map(|ttl| (now + ttl, tick));
        if let Some(expiry_key) = expiry_key {
            self.expiry.insert(expiry_key, key.clone());
        }
        self.recency.insert(tick, key.clone());
        self.current_size_bytes += size_bytes;
        self.entries.insert(
            key,
            DecodeCacheEntry {
                value,
                created_at: now,
                last_accessed_at: now,
                access_count: 0,
                size_bytes,
                tick,
                expiry_key,
            },
        );
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        if let Some(expiry_key) = entry.expiry_key {
            self.expiry.remove(&expiry_key);
        }
        self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.size_bytes);
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.expiry.clear();
        self.current_size_bytes = 0;
    }

    /// Sweep every expired entry. Returns how many were dropped.
    pub fn evict_expired(&mut self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&mut self, now: Instant) -> usize {
        let mut dropped = 0;
        while let Some((&(deadline, _), key)) = self.expiry.first_key_value() {
            if deadline > now {
                break;
            }
            let key = key.clone();
            self.remove(&key);
            self.counters.expirations += 1;
            dropped += 1;
        }
        dropped
    }

    // ── Stats ──────────────────────────────────────────────────────

    pub fn stats(&self) -> CacheStats {
        let lookups = self.counters.hits + self.counters.misses;
        let hit_ratio = if lookups == 0 { 0.0 } else { self.counters.hits as f64 / lookups as f64 };
        CacheStats {
            hits: self.counters.hits,
            misses: self.counters.misses,
            hit_ratio,
            evictions: self.counters.evictions,
            expirations: self.counters.expirations,
            prefetches: self.counters.prefetches,
            rejected_inserts: self.counters.rejected_inserts,
            entries: self.entries.len(),
            size_bytes: self.current_size_bytes,
        }
    }

    pub fn reset_stats(&mut self) {
        self.counters = Counters::default();
    }

    // ── Internals ──────────────────────────────────────────────────

    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick = self.next_tick.saturating_add(1);
        tick
    }

    fn expire_if_stale(&mut self, key: &str, now: Instant) -> bool {
        let stale = self
            .entries
            .get(key)
            .and_then(|entry| entry.expiry_key)
            .is_some_and(|(deadline, _)| deadline <= now);
        if stale {
            self.remove(key);
            self.counters.expirations += 1;
        }
        stale
    }

    fn needs_room(&self, incoming: usize) -> bool {
        self.entries.len() + 1 > self.config.max_entries
            || self.current_size_bytes + incoming > self.config.max_size_bytes
    }

    fn make_room(&mut self, incoming: usize, now: Instant) {
        if !self.needs_room(incoming) {
            return;
        }
        self.evict_expired_at(now);
        while self.needs_room(incoming) {
            let Some(key) = self.recency.values().next().cloned() else {
                break;
            };
            self.remove(&key);
            self.counters.evictions += 1;
        }
    }
}

impl<T: EstimateSize> DecodeCache<T> {
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> bool {
        let size = value.estimate_size();
        self.insert_with_size(key, value, size)
    }

    pub fn insert_at(&mut self, key: impl Into<String>, value: T, now: Instant) -> bool {
        let size = value.estimate_size();
        self.insert_with_size_at(key, value, size, now)
    }
}

impl<T: EstimateSize + Clone> DecodeCache<T> {
    /// Return the cached value or compute, cache and return it.
    pub fn get_or_compute<F>(&mut self, key: &str, compute: F) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(key) {
            return value.clone();
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    /// Fallible `get_or_compute`. Errors are not cached.
    pub fn try_get_or_compute<F, E>(&mut self, key: &str, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value.clone());
        }
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Load the keys within `prefetch_radius` of `center_key` in `all_keys`
    /// that are not cached yet, with one batched call. `compute_many` returns
    /// values in the order of the keys it was given. Returns how many entries
    /// were inserted.
    pub fn prefetch_window<F>(
        &mut self,
        center_key: &str,
        all_keys: &[String],
        compute_many: F,
    ) -> usize
    where
        F: FnOnce(&[String]) -> Vec<T>,
    {
        self.prefetch_window_at(center_key, all_keys, compute_many, Instant::now())
    }

    pub fn prefetch_window_at<F>(
        &mut self,
        center_key: &str,
        all_keys: &[String],
        compute_many: F,
        now: Instant,
    ) -> usize
    where
        F: FnOnce(&[String]) -> Vec<T>,
    {
        let Some(center) = all_keys.iter().position(|key| key == center_key) else {
            return 0;
        };
        let radius = self.config.prefetch_radius;
        let start = center.saturating_sub(radius);
        let end = (center + radius + 1).min(all_keys.len());

        let missing: Vec<String> =
            all_keys[start..end].iter().filter(|key| !self.has_at(key, now)).cloned().collect();
        if missing.is_empty() {
            return 0;
        }

        let values = compute_many(&missing);
        let mut inserted = 0;
        for (key, value) in missing.into_iter().zip(values) {
            if self.insert_at(key, value, now) {
                inserted += 1;
            }
        }
        self.counters.prefetches += inserted as u64;
        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(
        max_entries: usize,
        max_size_bytes: usize,
        ttl: Option<Duration>,
    ) -> DecodeCache<String> {
        DecodeCache::new(DecodeCacheConfig { max_entries, max_size_bytes, ttl, prefetch_radius: 2 })
    }

    // ── LRU / bounds ───────────────────────────────────────────────

    #[test]
    fn lru_evicts_least_recently_used_not_oldest_inserted() {
        let mut c = cache(100, 100, None);
        for key in ["k1", "k2", "k3", "k4"] {
            assert!(c.insert_with_size(key, key.to_string(), 25));
        }
        assert_eq!(c.current_size_bytes(), 100);

        assert!(c.get("k1").is_some());
        c.insert_with_size("k5", "k5".to_string(), 25);

        assert!(c.has("k1"));
        assert!(!c.has("k2"));
        assert!(c.has("k3") && c.has("k4") && c.has("k5"));
        assert_eq!(c.stats().evictions, 1);
        assert!(c.current_size_bytes() <= 100);
    }

    #[test]
    fn entry_count_bound_is_enforced() {
        let mut c = cache(3, usize::MAX, None);
        for i in 0..10 {
            c.insert_with_size(format!("k{i}"), String::new(), 1);
            assert!(c.len() <= 3);
        }
        assert_eq!(c.lru_keys(), vec!["k7", "k8", "k9"]);
    }

    #[test]
    fn size_bound_holds_for_any_insert_sequence() {
        let mut c = cache(1_000, 64, None);
        for i in 0..50usize {
            c.insert_with_size(format!("k{i}"), String::new(), (i * 7) % 40 + 1);
            assert!(c.current_size_bytes() <= 64);
        }
    }

    #[test]
    fn oversized_entry_is_rejected_without_flushing() {
        let mut c = cache(10, 50, None);
        c.insert_with_size("small", "s".into(), 10);
        assert!(!c.insert_with_size("huge", "h".into(), 51));
        assert!(c.has("small"));
        assert!(!c.has("huge"));
        assert_eq!(c.stats().rejected_inserts, 1);
    }

    #[test]
    fn reinsert_replaces_size() {
        let mut c = cache(10, 100, None);
        c.insert_with_size("k", "a".into(), 40);
        c.insert_with_size("k", "b".into(), 10);
        assert_eq!(c.len(), 1);
        assert_eq!(c.current_size_bytes(), 10);
        assert_eq!(c.get("k").map(String::as_str), Some("b"));
    }

    // ── TTL ────────────────────────────────────────────────────────

    #[test]
    fn ttl_expires_lazily_on_read() {
        let mut c = cache(10, 1_000, Some(Duration::from_secs(5)));
        let t0 = Instant::now();
        c.insert_with_size_at("k", "v".into(), 1, t0);

        assert!(c.has_at("k", t0 + Duration::from_secs(4)));
        assert!(c.get_at("k", t0 + Duration::from_secs(5)).is_none());
        assert!(c.is_empty());
        let stats = c.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn evict_expired_sweeps_only_stale_entries() {
        let mut c = cache(10, 1_000, Some(Duration::from_secs(10)));
        let t0 = Instant::now();
        c.insert_with_size_at("old", "o".into(), 1, t0);
        c.insert_with_size_at("new", "n".into(), 1, t0 + Duration::from_secs(8));

        assert_eq!(c.evict_expired_at(t0 + Duration::from_secs(12)), 1);
        assert!(c.peek_entry("old").is_none());
        assert!(c.peek_entry("new").is_some());
    }

    #[test]
    fn expired_entries_are_evicted_before_lru() {
        let mut c = cache(2, 1_000, Some(Duration::from_secs(10)));
        let t0 = Instant::now();
        c.insert_with_size_at("lru-live", "a".into(), 1, t0 + Duration::from_secs(9));
        c.insert_with_size_at("mru-stale", "b".into(), 1, t0);
        // Re-touch so the stale one is most recently used.
        c.get_at("mru-stale", t0 + Duration::from_secs(1));

        c.insert_with_size_at("fresh", "c".into(), 1, t0 + Duration::from_secs(11));
        assert!(c.peek_entry("lru-live").is_some());
        assert!(c.peek_entry("mru-stale").is_none());
        assert_eq!(c.stats().evictions, 0);
    }

    // ── get_or_compute / prefetch ──────────────────────────────────

    #[test]
    fn get_or_compute_computes_once() {
        let mut c = cache(10, 10_000, None);
        let mut calls = 0;
        for _ in 0..3 {
            let value = c.get_or_compute("k", || {
                calls += 1;
                "computed".to_string()
            });
            assert_eq!(value, "computed");
        }
        assert_eq!(calls, 1);
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert!((stats.hit_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn try_get_or_compute_does_not_cache_errors() {
        let mut c = cache(10, 10_000, None);
        let err: Result<String, &str> = c.try_get_or_compute("k", || Err("boom"));
        assert_eq!(err, Err("boom"));
        assert!(!c.has("k"));
    }

    #[test]
    fn prefetch_window_loads_neighbours_in_one_batch() {
        let mut c = cache(100, 10_000, None);
        let keys: Vec<String> = (0..10).map(|i| format!("b{i}")).collect();
        c.insert("b4".to_string(), "cached".to_string());

        let mut batches = Vec::new();
        let inserted = c.prefetch_window("b5", &keys, |missing| {
            batches.push(missing.to_vec());
            missing.iter().map(|key| format!("decoded:{key}")).collect()
        });

        assert_eq!(inserted, 4);
        assert_eq!(batches, vec![vec!["b3", "b5", "b6", "b7"]]);
        assert_eq!(c.get("b4").map(String::as_str), Some("cached"));
        assert_eq!(c.stats().prefetches, 4);
    }

    #[test]
    fn prefetch_unknown_center_is_noop() {
        let mut c = cache(100, 10_000, None);
        let keys = vec!["a".to_string()];
        assert_eq!(c.prefetch_window("zzz", &keys, |_| panic!("must not compute")), 0);
    }

    #[test]
    fn reset_stats_keeps_entries() {
        let mut c = cache(10, 10_000, None);
        c.insert("k".to_string(), "v".to_string());
        c.get("k");
        c.reset_stats();
        let stats = c.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_ratio, 0.0);
    }

    #[test]
    fn entry_metadata_tracks_access() {
        let mut c = cache(10, 10_000, None);
        let t0 = Instant::now();
        c.insert_with_size_at("k", "v".into(), 3, t0);
        c.get_at("k", t0 + Duration::from_millis(5));
        c.get_at("k", t0 + Duration::from_millis(9));

        let entry = c.peek_entry("k").unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.size_bytes, 3);
        assert_eq!(entry.created_at, t0);
        assert_eq!(entry.last_accessed_at, t0 + Duration::from_millis(9));
    }
}
