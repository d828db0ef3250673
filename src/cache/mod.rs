//! Process-wide key/value cache shared by every script context.
//!
//! Keys are namespaced by the acting user, so two users storing the same key
//! never see each other's value. Every entry expires a fixed TTL after its
//! last write; expired entries read as absent even before they are swept.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::config::DEFAULT_CACHE_TTL;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    user: String,
    key: String,
}

impl CacheKey {
    fn new(user: &str, key: &str) -> Self {
        Self {
            user: user.to_string(),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Concurrency-safe, time-expiring cache.
#[derive(Debug)]
pub struct CacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl CacheStore {
    /// Create a cache whose entries live for `ttl` after their last write.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `value` under `key` for `user`, resetting the entry's expiry.
    pub fn set(&self, user: &str, key: &str, value: Value) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(CacheKey::new(user, key), entry);
    }

    /// Read the live value stored under `key` for `user`.
    pub fn get(&self, user: &str, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&CacheKey::new(user, key))
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Remove `key` for `user`.
    pub fn del(&self, user: &str, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&CacheKey::new(user, key));
    }

    /// Drop every expired entry. Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
