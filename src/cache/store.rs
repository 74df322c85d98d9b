//! Cache store adapters.
//!
//! The engine talks to storage through [`CacheStore`]: get/set/delete plus
//! a glob-style key scan used by invalidation sweeps. [`RedisStore`] is the
//! remote implementation; [`MemoryStore`] is the bounded in-process store
//! substituted while the circuit is open (and the store of choice in
//! tests).

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::entry::CacheEntry;
use super::error::CacheError;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Abstract key-value operations against a cache backend.
///
/// Keys are normalized to lowercase by implementations so that scans and
/// deletes agree with writes.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError>;

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// All stored keys matching a glob-style pattern (`*` wildcards).
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

fn normalize(key: &str) -> String {
    key.to_lowercase()
}

/// Glob matcher for `*` patterns, shared by the in-process store and
/// strategy tests. Mirrors the subset of Redis `MATCH` syntax we emit.
pub(crate) fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == candidate;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0usize;

    for (index, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if index == 0 {
            if !candidate.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if index == parts.len() - 1 {
            let rest = &candidate[pos.min(candidate.len())..];
            return rest.ends_with(part);
        } else {
            match candidate[pos.min(candidate.len())..].find(part) {
                Some(found) => pos = pos + found + part.len(),
                None => return false,
            }
        }
    }

    true
}

// ============================================================================
// Redis store
// ============================================================================

/// Redis-backed store. Entries are stored as JSON strings with a TTL.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to a Redis-compatible server.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(normalize(key)).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(normalize(key), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let normalized: Vec<String> = keys.iter().map(|key| normalize(key)).collect();
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(normalized).await?;
        Ok(deleted)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut iter = conn
            .scan_match::<_, String>(normalize(pattern))
            .await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

// ============================================================================
// In-process store
// ============================================================================

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

/// Bounded in-process store: LRU eviction plus per-entry expiry.
///
/// Used as the breaker-open fallback so a Redis outage degrades to
/// process-local caching instead of none at all.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = normalize(key);
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(&key) {
            Some(stored) if stored.expires_at > Instant::now() => {
                return Ok(Some(stored.entry.clone()));
            }
            Some(_) => {}
            None => return Ok(None),
        }

        // Entry outlived its TTL; drop it eagerly.
        entries.pop(&key);
        Ok(None)
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let stored = StoredEntry {
            entry: entry.clone(),
            expires_at: Instant::now() + ttl,
        };
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        if let Some((evicted, _)) = entries.push(normalize(key), stored) {
            debug!(key = %evicted, "memory store evicted entry at capacity");
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete");
        let mut deleted = 0u64;
        for key in keys {
            if entries.pop(&normalize(key)).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let pattern = normalize(pattern);
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "keys_matching");
        Ok(entries
            .iter()
            .filter(|(key, stored)| stored.expires_at > now && wildcard_match(&pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
