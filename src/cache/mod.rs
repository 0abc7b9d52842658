//! Namespaced, TTL+LRU in-memory cache (§4.8).
//!
//! Grounded in
//! `examples/other_examples/000a7db4_speelbreaker12-opus-trader__crates-soldier_core-src-venue-cache.rs.rs`
//! for the injectable-clock TTL pattern (`_at` test variants backing
//! `Instant::now()`-based production entry points) and in
//! `examples/other_examples/426553c2_jiansoft-stock_crawler__src-cache.rs.rs`
//! for the namespaced-store shape. Eviction is LRU on overflow, lazy TTL
//! expiry on `get`; no background sweep thread (optional per spec).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-namespace policy: TTL and max entry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl CachePolicy {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            ttl_secs,
            max_entries,
        }
    }
}

/// Per-namespace hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct Entry {
    value: String,
    inserted_at: Instant,
    last_used: Instant,
}

struct Namespace {
    policy: CachePolicy,
    entries: HashMap<String, Entry>,
    stats: NamespaceStats,
}

impl Namespace {
    fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            stats: NamespaceStats::default(),
        }
    }
}

/// A namespaced cache. Values are stored as owned `String`s; callers
/// serialize whatever payload they need (matching the cheap string-keyed
/// decorator pattern in §9's design notes — wrapper functions compute the
/// key, check/populate the cache).
pub struct Cache {
    default_policy: CachePolicy,
    namespaces: HashMap<String, Namespace>,
}

impl Cache {
    pub fn new(default_policy: CachePolicy) -> Self {
        Self {
            default_policy,
            namespaces: HashMap::new(),
        }
    }

    /// Register an explicit policy for a namespace, overriding the default.
    pub fn configure_namespace(&mut self, ns: &str, policy: CachePolicy) {
        self.namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Namespace::new(policy))
            .policy = policy;
    }

    fn namespace_mut(&mut self, ns: &str) -> &mut Namespace {
        let default_policy = self.default_policy;
        self.namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Namespace::new(default_policy))
    }

    pub fn get(&mut self, ns: &str, key: &str) -> Option<String> {
        self.get_at(ns, key, Instant::now())
    }

    pub fn get_at(&mut self, ns: &str, key: &str, now: Instant) -> Option<String> {
        let namespace = self.namespace_mut(ns);
        let ttl = Duration::from_secs(namespace.policy.ttl_secs);

        let expired = match namespace.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= ttl,
            None => {
                namespace.stats.misses += 1;
                return None;
            }
        };

        if expired {
            namespace.entries.remove(key);
            namespace.stats.entries = namespace.entries.len();
            namespace.stats.misses += 1;
            return None;
        }

        let entry = namespace.entries.get_mut(key).expect("checked above");
        entry.last_used = now;
        namespace.stats.hits += 1;
        Some(entry.value.clone())
    }

    pub fn put(&mut self, ns: &str, key: &str, value: impl Into<String>) {
        self.put_at(ns, key, value, Instant::now());
    }

    pub fn put_at(&mut self, ns: &str, key: &str, value: impl Into<String>, now: Instant) {
        let namespace = self.namespace_mut(ns);

        if !namespace.entries.contains_key(key)
            && namespace.entries.len() >= namespace.policy.max_entries
            && namespace.policy.max_entries > 0
        {
            if let Some(lru_key) = namespace
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                namespace.entries.remove(&lru_key);
                namespace.stats.evictions += 1;
            }
        }

        namespace.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                inserted_at: now,
                last_used: now,
            },
        );
        namespace.stats.entries = namespace.entries.len();
    }

    /// Invalidate an entire namespace.
    pub fn invalidate(&mut self, ns: &str) {
        if let Some(namespace) = self.namespaces.get_mut(ns) {
            namespace.entries.clear();
            namespace.stats.entries = 0;
        }
    }

    /// Invalidate a single key within a namespace.
    pub fn invalidate_key(&mut self, ns: &str, key: &str) {
        if let Some(namespace) = self.namespaces.get_mut(ns) {
            namespace.entries.remove(key);
            namespace.stats.entries = namespace.entries.len();
        }
    }

    pub fn clear_all(&mut self) {
        for namespace in self.namespaces.values_mut() {
            namespace.entries.clear();
            namespace.stats.entries = 0;
        }
    }

    pub fn stats(&self, ns: &str) -> NamespaceStats {
        self.namespaces
            .get(ns)
            .map(|n| n.stats)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit_after_put() {
        let mut cache = Cache::new(CachePolicy::new(60, 10));
        assert!(cache.get("stats", "k").is_none());
        cache.put("stats", "k", "v");
        assert_eq!(cache.get("stats", "k"), Some("v".to_string()));
        let stats = cache.stats("stats");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let mut cache = Cache::new(CachePolicy::new(10, 10));
        let t0 = Instant::now();
        cache.put_at("ns", "k", "v", t0);
        let later = t0 + Duration::from_secs(11);
        assert_eq!(cache.get_at("ns", "k", later), None);
    }

    #[test]
    fn entry_at_exact_ttl_boundary_is_expired() {
        // get_at uses >= ttl as the expiry condition (age must be strictly
        // less than ttl to remain a hit).
        let mut cache = Cache::new(CachePolicy::new(10, 10));
        let t0 = Instant::now();
        cache.put_at("ns", "k", "v", t0);
        let at_ttl = t0 + Duration::from_secs(10);
        assert_eq!(cache.get_at("ns", "k", at_ttl), None);
    }

    #[test]
    fn invalidate_namespace_clears_all_keys() {
        let mut cache = Cache::new(CachePolicy::new(60, 10));
        cache.put("ns", "a", "1");
        cache.put("ns", "b", "2");
        cache.invalidate("ns");
        assert!(cache.get("ns", "a").is_none());
        assert!(cache.get("ns", "b").is_none());
    }

    #[test]
    fn invalidate_single_key_leaves_others() {
        let mut cache = Cache::new(CachePolicy::new(60, 10));
        cache.put("ns", "a", "1");
        cache.put("ns", "b", "2");
        cache.invalidate_key("ns", "a");
        assert!(cache.get("ns", "a").is_none());
        assert_eq!(cache.get("ns", "b"), Some("2".to_string()));
    }

    #[test]
    fn eviction_respects_max_entries_bound() {
        let mut cache = Cache::new(CachePolicy::new(60, 2));
        let t0 = Instant::now();
        cache.put_at("ns", "a", "1", t0);
        cache.put_at("ns", "b", "2", t0 + Duration::from_secs(1));
        // "a" is now the least-recently-used; inserting a third key evicts it.
        cache.put_at("ns", "c", "3", t0 + Duration::from_secs(2));

        assert!(cache.get_at("ns", "a", t0 + Duration::from_secs(3)).is_none());
        assert_eq!(cache.stats("ns").entries, 2);
        assert_eq!(cache.stats("ns").evictions, 1);
    }

    #[test]
    fn get_refreshes_recency_so_it_survives_eviction() {
        let mut cache = Cache::new(CachePolicy::new(60, 2));
        let t0 = Instant::now();
        cache.put_at("ns", "a", "1", t0);
        cache.put_at("ns", "b", "2", t0 + Duration::from_secs(1));
        // Touch "a" so "b" becomes the LRU victim instead.
        cache.get_at("ns", "a", t0 + Duration::from_secs(2));
        cache.put_at("ns", "c", "3", t0 + Duration::from_secs(3));

        assert!(cache.get_at("ns", "b", t0 + Duration::from_secs(4)).is_none());
        assert!(cache
            .get_at("ns", "a", t0 + Duration::from_secs(4))
            .is_some());
    }

    #[test]
    fn size_never_exceeds_max_entries_across_many_puts() {
        let mut cache = Cache::new(CachePolicy::new(60, 5));
        let t0 = Instant::now();
        for i in 0..100 {
            cache.put_at("ns", &format!("k{i}"), "v", t0 + Duration::from_secs(i));
            assert!(cache.stats("ns").entries <= 5);
        }
    }

    #[test]
    fn namespaces_are_independent() {
        let mut cache = Cache::new(CachePolicy::new(60, 10));
        cache.configure_namespace("short_ttl", CachePolicy::new(1, 10));
        let t0 = Instant::now();
        cache.put_at("short_ttl", "k", "v", t0);
        cache.put_at("long_lived", "k", "v", t0);

        assert!(cache
            .get_at("short_ttl", "k", t0 + Duration::from_secs(2))
            .is_none());
        assert!(cache
            .get_at("long_lived", "k", t0 + Duration::from_secs(2))
            .is_some());
    }
}
