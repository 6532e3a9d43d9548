//! Key/value cache port with TTL and "return expired" semantics.
//!
//! # Design
//! `Cache` is the narrow contract the client consumes: get, save, save with
//! a TTL, delete. `MemoryCache` implements it over an `lru::LruCache` behind
//! a mutex. Expiry is tracked per entry and only checked on read. An expired
//! entry stays in the LRU until it is evicted, overwritten or deleted, which
//! is what lets a cache built with `return_expired` hand stale values back.
//!
//! Every operation takes an optional `Context`. Diagnostic logging happens
//! only when one is supplied.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Context;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// No entry, or an expired entry the cache was told not to return.
    Miss,
    /// A live entry.
    Fresh(V),
    /// An expired entry, returned because the cache was built with
    /// `return_expired`.
    Expired(V),
}

impl<V> Lookup<V> {
    pub fn is_expired(&self) -> bool {
        matches!(self, Lookup::Expired(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Lookup::Miss => None,
            Lookup::Fresh(value) | Lookup::Expired(value) => Some(value),
        }
    }

    pub fn into_value(self) -> Option<V> {
        match self {
            Lookup::Miss => None,
            Lookup::Fresh(value) | Lookup::Expired(value) => Some(value),
        }
    }
}

/// Storage contract consumed by the REST client.
///
/// Implementations must be safe to call from several threads at once; the
/// client adds no locking of its own around cache calls.
pub trait Cache<V>: Send + Sync {
    fn get(&self, ctx: Option<&Context>, key: &str) -> Lookup<V>;

    /// Store `value` under `key` with the cache's default TTL, replacing any
    /// existing entry.
    fn save(&self, ctx: Option<&Context>, key: &str, value: V);

    /// Store `value` under `key` with an explicit TTL, replacing any
    /// existing entry.
    fn save_with_ttl(&self, ctx: Option<&Context>, key: &str, value: V, ttl: Duration);

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, ctx: Option<&Context>, key: &str);
}

/// Settings for a `MemoryCache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name used in log output.
    pub name: String,
    /// Maximum number of entries before the least recently used is evicted.
    pub size: usize,
    /// Default TTL applied by `save`, in seconds.
    pub ttl_secs: u64,
    /// Hand back expired entries (flagged as expired) instead of a miss.
    pub return_expired: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "restclient".to_string(),
            size: 30,
            ttl_secs: 3600,
            return_expired: false,
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    // None when the TTL overflows `Instant`: the entry never expires.
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Bounded in-memory LRU cache with per-entry TTL.
#[derive(Debug)]
pub struct MemoryCache<V> {
    name: String,
    default_ttl: Duration,
    return_expired: bool,
    entries: Mutex<LruCache<String, Entry<V>>>,
}

impl<V: Clone + Send> MemoryCache<V> {
    /// Create a cache holding at most `size` entries (at least one).
    pub fn new(name: impl Into<String>, size: usize, ttl: Duration, return_expired: bool) -> Self {
        let capacity = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            default_ttl: ttl,
            return_expired,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.name.clone(),
            config.size,
            Duration::from_secs(config.ttl_secs),
            config.return_expired,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn log(&self, ctx: Option<&Context>, op: &str, key: &str) {
        if ctx.is_some() {
            debug!(cache = %self.name, op, key, "cache operation");
        }
    }
}

impl<V: Clone + Send> Cache<V> for MemoryCache<V> {
    fn get(&self, ctx: Option<&Context>, key: &str) -> Lookup<V> {
        self.log(ctx, "get", key);
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            None => Lookup::Miss,
            Some(entry) if !entry.is_expired(now) => Lookup::Fresh(entry.value.clone()),
            Some(entry) if self.return_expired => Lookup::Expired(entry.value.clone()),
            Some(_) => Lookup::Miss,
        }
    }

    fn save(&self, ctx: Option<&Context>, key: &str, value: V) {
        self.log(ctx, "save", key);
        self.entries
            .lock()
            .put(key.to_owned(), Entry::new(value, self.default_ttl));
    }

    fn save_with_ttl(&self, ctx: Option<&Context>, key: &str, value: V, ttl: Duration) {
        if ctx.is_some() {
            debug!(cache = %self.name, op = "save_with_ttl", key, ?ttl, "cache operation");
        }
        self.entries.lock().put(key.to_owned(), Entry::new(value, ttl));
    }

    fn delete(&self, ctx: Option<&Context>, key: &str) {
        self.log(ctx, "delete", key);
        self.entries.lock().pop(key);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const SHORT_TTL: Duration = Duration::from_millis(40);
    const PAST_TTL: Duration = Duration::from_millis(120);

    fn cache(return_expired: bool) -> MemoryCache<String> {
        MemoryCache::new("test", 10, Duration::from_secs(10), return_expired)
    }

    #[test]
    fn save_then_get_is_fresh() {
        let cache = cache(false);
        let ctx = Context::background();
        cache.save(Some(&ctx), "key", "value".to_string());
        assert_eq!(cache.get(Some(&ctx), "key"), Lookup::Fresh("value".to_string()));
    }

    #[test]
    fn missing_key_is_a_miss() {
        let cache = cache(true);
        let lookup = cache.get(None, "absent");
        assert!(lookup.is_miss());
        assert!(!lookup.is_expired());
    }

    #[test]
    fn expired_entry_returned_when_configured() {
        let cache = cache(true);
        cache.save_with_ttl(None, "key", "value".to_string(), SHORT_TTL);
        assert_eq!(cache.get(None, "key"), Lookup::Fresh("value".to_string()));

        thread::sleep(PAST_TTL);
        let lookup = cache.get(None, "key");
        assert!(lookup.is_expired());
        assert_eq!(lookup.value().map(String::as_str), Some("value"));
    }

    #[test]
    fn expired_entry_suppressed_but_still_stored() {
        let cache = cache(false);
        cache.save_with_ttl(None, "key", "value".to_string(), SHORT_TTL);

        thread::sleep(PAST_TTL);
        assert_eq!(cache.get(None, "key"), Lookup::Miss);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let cache = cache(false);
        cache.save(None, "key", "value".to_string());
        cache.delete(None, "key");
        cache.delete(None, "key");
        cache.delete(None, "never-saved");
        assert_eq!(cache.get(None, "key"), Lookup::Miss);
        assert!(cache.is_empty());
    }

    #[test]
    fn save_overwrites_and_refreshes_ttl() {
        let cache = cache(false);
        cache.save_with_ttl(None, "key", "old".to_string(), SHORT_TTL);
        cache.save(None, "key", "new".to_string());

        thread::sleep(PAST_TTL);
        assert_eq!(cache.get(None, "key"), Lookup::Fresh("new".to_string()));
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache: MemoryCache<u32> = MemoryCache::new("small", 2, Duration::from_secs(10), false);
        cache.save(None, "a", 1);
        cache.save(None, "b", 2);
        assert_eq!(cache.get(None, "a"), Lookup::Fresh(1));

        cache.save(None, "c", 3);
        assert_eq!(cache.get(None, "b"), Lookup::Miss);
        assert_eq!(cache.get(None, "a"), Lookup::Fresh(1));
        assert_eq!(cache.get(None, "c"), Lookup::Fresh(3));
    }

    #[test]
    fn zero_size_still_holds_one_entry() {
        let cache: MemoryCache<u32> = MemoryCache::new("tiny", 0, Duration::from_secs(10), false);
        cache.save(None, "a", 1);
        assert_eq!(cache.get(None, "a"), Lookup::Fresh(1));
    }

    #[test]
    fn from_config_uses_defaults() {
        let config = CacheConfig::default();
        let cache: MemoryCache<u32> = MemoryCache::from_config(&config);
        assert_eq!(cache.name(), "restclient");
        assert_eq!(config.size, 30);
        assert_eq!(config.ttl_secs, 3600);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let cache = std::sync::Arc::new(MemoryCache::<usize>::new(
            "shared",
            64,
            Duration::from_secs(10),
            false,
        ));
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let key = format!("k{n}");
                    cache.save(None, &key, n);
                    cache.get(None, &key)
                })
            })
            .collect();
        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Lookup::Fresh(n));
        }
    }
}
