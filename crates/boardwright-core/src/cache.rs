//! Bounded response cache with LRU eviction and per-entry TTL.
//!
//! Thread safety: all methods take `&self`; the LRU map and counters sit
//! behind one [`parking_lot::Mutex`], so every operation is a single
//! critical section.
//!
//! Cache keys are SHA-256 digests of a canonical JSON rendering (object
//! keys sorted recursively), so structurally identical requests always hash
//! the same way regardless of how they were built.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use boardwright_llm::types::ModelRequest;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One stored value. Only the value ever leaves the cache.
#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    timestamp: Instant,
    ttl: Duration,
    hits: u64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.timestamp) >= self.ttl
    }
}

/// Running cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub size: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

struct Inner<T> {
    entries: LruCache<String, CacheEntry<T>>,
    stats: CacheStats,
}

/// LRU cache of `T` keyed by request fingerprint.
pub struct ResponseCache<T> {
    inner: Mutex<Inner<T>>,
    default_ttl: Duration,
}

impl<T: Clone> ResponseCache<T> {
    /// `max_entries` of zero is treated as one.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
            default_ttl,
        }
    }

    /// Look up `key`, marking it recently used. Expired entries are dropped
    /// and reported as a miss. A miss never creates an entry.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let Inner { entries, stats } = &mut *guard;

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hits += 1;
                stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            stats.evictions += 1;
        }
        stats.misses += 1;
        None
    }

    /// Store `value` under the default TTL, replacing any existing entry.
    pub fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            timestamp: Instant::now(),
            ttl,
            hits: 0,
        };
        let mut inner = self.inner.lock();
        inner.stats.sets += 1;
        // `push` hands back either the replaced entry (same key) or the
        // least recently used one it pushed out.
        if let Some((displaced, _)) = inner.entries.push(key.clone(), entry)
            && displaced != key
        {
            inner.stats.evictions += 1;
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Lookups served for `key` since it was stored.
    pub fn hits_for(&self, key: &str) -> Option<u64> {
        self.inner.lock().entries.peek(key).map(|e| e.hits)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }
}

/// Deterministic JSON rendering with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex SHA-256 of the canonical rendering of `value`.
pub fn fingerprint(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Cache key for a request: fingerprint of `{messages, model}`.
pub fn cache_key(request: &ModelRequest) -> String {
    fingerprint(&serde_json::json!({
        "messages": request.messages,
        "model": request.model,
    }))
}

/// Fingerprint of a prompt template and its variables.
pub fn generate_prompt_fingerprint(template: &str, variables: &serde_json::Map<String, Value>) -> String {
    fingerprint(&serde_json::json!({
        "template": template,
        "variables": variables,
    }))
}
