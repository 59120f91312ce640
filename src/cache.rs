//! Content-addressed, TTL-bounded memoization of LM responses.
//!
//! Two tiers: a sharded in-memory LRU capped by entry count, and a disk
//! tier sharded by the first two hex characters of the key. Reads promote
//! disk hits into memory; expired entries are deleted on access. Writes to
//! disk are best-effort: a failed write is logged and ignored, never
//! surfaced, because the cache is an optimization and not a store of
//! record.
//!
//! Keys hash the full parameter bundle
//! `(provider, model, tokenizer, kind, prompt, temperature, top_p,
//! max_tokens, stop, seed?)`, so any change to any parameter is a miss.

use crate::error::StudioResult;
use crate::logging::{log_debug, log_warn};
use crate::provider::{GenerationParams, LmResponse};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SHARD_COUNT: usize = 16;

/// Compute the content address of one LM call.
pub fn cache_key(
    provider: &str,
    model: &str,
    tokenizer: &str,
    kind: &str,
    prompt: &str,
    params: &GenerationParams,
) -> String {
    let mut hasher = Sha256::new();
    for part in [provider, model, tokenizer, kind, prompt] {
        hasher.update(part.as_bytes());
        hasher.update([0x1e]);
    }
    hasher.update(params.cache_fragment().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One memoized response with its expiry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: LmResponse,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() >= self.ttl_seconds as i64
    }
}

/// Process-scoped two-tier response cache.
///
/// Constructed once at startup from [`CacheConfig`](crate::config::CacheConfig)
/// and passed by reference to the components that need it.
pub struct ResponseCache {
    enabled: bool,
    default_ttl_seconds: u64,
    shards: Vec<Mutex<LruCache<String, CacheEntry>>>,
    disk_dir: Option<PathBuf>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("enabled", &self.enabled)
            .field("default_ttl_seconds", &self.default_ttl_seconds)
            .field("disk_dir", &self.disk_dir)
            .finish()
    }
}

impl ResponseCache {
    /// Build a cache with a memory tier of `max_memory_entries` and an
    /// optional disk tier rooted at `disk_dir`.
    pub fn new(
        enabled: bool,
        max_memory_entries: usize,
        default_ttl_seconds: u64,
        disk_dir: Option<PathBuf>,
    ) -> Self {
        let per_shard = (max_memory_entries / SHARD_COUNT).max(1);
        let cap = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(LruCache::new(cap)))
            .collect();
        Self {
            enabled,
            default_ttl_seconds,
            shards,
            disk_dir,
        }
    }

    /// A memory-only cache, used by tests and ephemeral sessions.
    pub fn memory_only(max_entries: usize, ttl_seconds: u64) -> Self {
        Self::new(true, max_entries, ttl_seconds, None)
    }

    /// A disabled cache: every `get` misses, every `set` is a no-op.
    pub fn disabled() -> Self {
        Self::new(false, 1, 0, None)
    }

    fn shard_for(&self, key: &str) -> &Mutex<LruCache<String, CacheEntry>> {
        let idx = key
            .as_bytes()
            .first()
            .map(|b| (*b as usize) % SHARD_COUNT)
            .unwrap_or(0);
        &self.shards[idx]
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.disk_dir.as_ref()?;
        let prefix = key.get(..2).unwrap_or("00");
        Some(dir.join(prefix).join(format!("{key}.json")))
    }

    /// Look up a memoized response. Expired entries are removed from both
    /// tiers on access; stale-but-unexpired reads are allowed.
    pub fn get(&self, key: &str) -> Option<LmResponse> {
        if !self.enabled {
            return None;
        }
        let now = Utc::now();

        {
            let mut shard = self.shard_for(key).lock().ok()?;
            if let Some(entry) = shard.get(key) {
                if entry.is_expired(now) {
                    shard.pop(key);
                    drop(shard);
                    self.remove_from_disk(key);
                } else {
                    log_debug!(key = %&key[..12.min(key.len())], tier = "memory", "Cache hit");
                    return Some(entry.response.clone());
                }
            }
        }

        self.get_from_disk(key, now)
    }

    fn get_from_disk(&self, key: &str, now: DateTime<Utc>) -> Option<LmResponse> {
        let path = self.disk_path(key)?;
        let bytes = std::fs::read(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                log_warn!(path = %path.display(), error = %e, "Corrupt disk cache entry, deleting");
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        if entry.is_expired(now) {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        log_debug!(key = %&key[..12.min(key.len())], tier = "disk", "Cache hit, promoting");
        if let Ok(mut shard) = self.shard_for(key).lock() {
            shard.put(key.to_string(), entry.clone());
        }
        Some(entry.response)
    }

    /// Memoize a response under the default TTL.
    pub fn set(&self, key: &str, response: LmResponse) {
        self.set_with_ttl(key, response, self.default_ttl_seconds);
    }

    /// Memoize a response with an explicit TTL.
    pub fn set_with_ttl(&self, key: &str, response: LmResponse, ttl_seconds: u64) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            response,
            created_at: Utc::now(),
            ttl_seconds,
        };
        if let Ok(mut shard) = self.shard_for(key).lock() {
            shard.put(key.to_string(), entry.clone());
        }
        self.write_to_disk(key, &entry);
    }

    fn write_to_disk(&self, key: &str, entry: &CacheEntry) {
        let Some(path) = self.disk_path(key) else {
            return;
        };
        if let Err(e) = self.try_write(&path, entry) {
            log_warn!(path = %path.display(), error = %e, "Disk cache write failed, ignoring");
        }
    }

    fn try_write(&self, path: &Path, entry: &CacheEntry) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn remove_from_disk(&self, key: &str) {
        if let Some(path) = self.disk_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Drop everything from the memory tier. The disk tier is untouched.
    pub fn clear_memory(&self) {
        for shard in &self.shards {
            if let Ok(mut shard) = shard.lock() {
                shard.clear();
            }
        }
    }

    /// Lifecycle hook called at shutdown. Disk writes are already durable,
    /// so this only logs the final state.
    pub fn flush(&self) -> StudioResult<()> {
        log_debug!(disk = self.disk_dir.is_some(), "Response cache flushed");
        Ok(())
    }
}
