//! Fingerprint-keyed response cache with TTL expiry and bounded capacity
//!
//! Cache keys are computed from an order-irrelevant set of request attributes
//! (category tag, query text, provider id, serialized context): the components
//! are sorted, encoded as canonical JSON, and digested with SHA-256. Two
//! logically identical requests always map to the same fingerprint, in any
//! component order and across process restarts.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// A cached value with TTL metadata
struct CacheEntry<V> {
    /// The cached value, immutable once stored
    value: V,
    /// When this entry was created (drives oldest-first eviction)
    created_at: Instant,
    /// When this entry stops being visible to readers
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            value,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// An entry is logically absent from the moment its TTL elapses,
    /// regardless of physical presence.
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Table and counters, guarded together so `clear` resets both atomically
/// with respect to concurrent `get`/`set`.
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe fingerprint cache with TTL expiry and bounded capacity
///
/// `get` is O(1) amortized; `set` is O(capacity) only when eviction runs.
/// Neither suspends on I/O, so the lock is never held across an await point.
pub struct FingerprintCache<V> {
    inner: Mutex<CacheInner<V>>,
    /// Maximum live entry count; holds after every `set`
    capacity: usize,
    /// TTL applied when the caller does not override
    default_ttl: Duration,
}

impl<V: Clone> FingerprintCache<V> {
    /// Create a cache with the given capacity and default TTL
    ///
    /// A zero capacity is bumped to one so `set` always has a slot to fill.
    #[must_use]
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Compute the fingerprint for a set of key components
    ///
    /// Components are sorted before encoding, so permutations of the same set
    /// digest identically. Encoding falls back to a separator join in the
    /// (unreachable for strings) case where JSON encoding fails; fingerprint
    /// computation never errors out of the request path.
    #[must_use]
    pub fn fingerprint(components: &[String]) -> String {
        let mut sorted: Vec<&str> = components.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let canonical =
            serde_json::to_string(&sorted).unwrap_or_else(|_| sorted.join("\u{1f}"));
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a value by its key components
    ///
    /// Returns the value if present and unexpired, counting a hit. An expired
    /// entry is removed on observation and counts as a miss, as does an
    /// absent key. Lookups never refresh an entry's TTL or creation time.
    pub fn get(&self, components: &[String]) -> Option<V> {
        let key = Self::fingerprint(components);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.entries.entry(key) {
            Entry::Occupied(occupied) if occupied.get().is_expired() => {
                occupied.remove();
                inner.misses += 1;
                None
            }
            Entry::Occupied(occupied) => {
                let value = occupied.get().value.clone();
                inner.hits += 1;
                Some(value)
            }
            Entry::Vacant(_) => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a value under its key components
    ///
    /// When inserting a new key into a full table, expired entries are purged
    /// first; if the table is still full, the oldest-created entries are
    /// evicted until a slot frees up. Overwriting an existing key never
    /// evicts. The entry lives for `ttl_override`, or the default TTL.
    pub fn set(&self, components: &[String], value: V, ttl_override: Option<Duration>) {
        let key = Self::fingerprint(components);
        let ttl = ttl_override.unwrap_or(self.default_ttl);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            inner.entries.retain(|_, entry| !entry.is_expired());

            while inner.entries.len() >= self.capacity {
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.created_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        inner.entries.remove(&k);
                    }
                    None => break,
                }
            }
        }

        inner.entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Remove all entries and reset the hit/miss counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Snapshot of cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        };

        CacheStatsSnapshot {
            size: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Current number of entries (expired-but-unobserved included)
    pub size: usize,
    /// Maximum live entry count
    pub capacity: usize,
    /// Total lookups served from cache
    pub hits: u64,
    /// Total lookups that found nothing usable
    pub misses: u64,
    /// Hit rate (0.0-1.0); 0.0 before any lookup
    pub hit_rate: f64,
}
