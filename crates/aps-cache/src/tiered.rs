//! Two-level cache with remote-first reads and local fallback

use crate::entry::{CacheEntry, CacheRegion};
use crate::error::CacheError;
use crate::local::LocalTier;
use crate::pattern::GlobPattern;
use crate::remote::{MokaRemoteTier, RemoteTier};
use aps_core::{system_clock, CacheConfig, SharedClock};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Reads served by the remote tier
    pub remote_hits: u64,
    /// Reads served by the local fallback
    pub local_hits: u64,
    /// Reads that found nothing live
    pub misses: u64,
    /// Remote calls that returned an error
    pub remote_failures: u64,
    /// Entries currently held locally
    pub local_entries: usize,
}

impl CacheStats {
    /// Fraction of reads that hit either tier
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.remote_hits + self.local_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    remote_hits: AtomicU64,
    local_hits: AtomicU64,
    misses: AtomicU64,
    remote_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A caller's hold on the per-key fetch gate
///
/// Dropping the slot, on return or on cancellation, releases the gate and
/// removes the map entry once no other caller holds it.
struct InflightSlot<'a> {
    inflight: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    gate: Arc<Mutex<()>>,
}

impl<'a> InflightSlot<'a> {
    fn claim(inflight: &'a DashMap<String, Arc<Mutex<()>>>, key: &'a str) -> Self {
        let gate = inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { inflight, key, gate }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        // The map's handle plus ours: nobody else is waiting on this key.
        self.inflight
            .remove_if(self.key, |_, gate| Arc::strong_count(gate) == 2);
    }
}

/// Remote + local cache
///
/// Reads go to the remote tier first and fall back to the local tier on a
/// miss, an expired entry or a remote failure. Writes go to both. Remote
/// failures never reach the caller; they are logged and counted.
#[derive(Debug)]
pub struct TieredCache {
    remote: Arc<dyn RemoteTier>,
    local: LocalTier,
    clock: SharedClock,
    config: CacheConfig,
    counters: Counters,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl TieredCache {
    /// Create cache over a remote tier
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteTier>, config: CacheConfig) -> Self {
        Self::with_clock(remote, config, system_clock())
    }

    /// Create cache with an explicit time source
    #[must_use]
    pub fn with_clock(remote: Arc<dyn RemoteTier>, config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            remote,
            local: LocalTier::new(),
            clock,
            config,
            counters: Counters::default(),
            inflight: DashMap::new(),
        }
    }

    /// Create cache whose remote tier is an in-process moka cache
    #[must_use]
    pub fn in_process(config: CacheConfig, clock: SharedClock) -> Self {
        let remote = Arc::new(MokaRemoteTier::new(config.remote_capacity, Arc::clone(&clock)));
        Self::with_clock(remote, config, clock)
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live value for `key`
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();

        match self.remote.get(key).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                Counters::bump(&self.counters.remote_hits);
                return Some(entry.value);
            }
            Ok(Some(_)) => {
                if let Err(err) = self.remote.delete(key).await {
                    tracing::debug!(key, error = %err, "failed to drop expired remote entry");
                }
            }
            Ok(None) => {}
            Err(err) => {
                Counters::bump(&self.counters.remote_failures);
                tracing::warn!(key, error = %err, "remote cache read failed, using local tier");
            }
        }

        match self.local.get(key, now) {
            Some(value) => {
                Counters::bump(&self.counters.local_hits);
                Some(value)
            }
            None => {
                Counters::bump(&self.counters.misses);
                None
            }
        }
    }

    /// Live value for `key`, decoded as `T`
    ///
    /// A value that does not decode is treated as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(key, error = %err, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Store `value` in both tiers for `ttl`
    ///
    /// Always succeeds from the caller's point of view: the local write
    /// cannot fail and a remote failure is only logged.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> bool {
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl, CacheRegion::Remote);

        if let Err(err) = self.remote.set(entry.clone()).await {
            Counters::bump(&self.counters.remote_failures);
            tracing::warn!(key, error = %err, "remote cache write failed, stored locally only");
        }
        self.local.set(entry);
        true
    }

    /// Store with the configured default TTL
    pub async fn set_default(&self, key: &str, value: Value) -> bool {
        self.set(key, value, self.config.default_ttl()).await
    }

    /// Remove `key` from both tiers
    ///
    /// Returns whether either tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let remote = match self.remote.delete(key).await {
            Ok(removed) => removed,
            Err(err) => {
                Counters::bump(&self.counters.remote_failures);
                tracing::warn!(key, error = %err, "remote cache delete failed");
                false
            }
        };
        let local = self.local.delete(key);
        remote || local
    }

    /// Remove every key matching a `*` glob from both tiers
    ///
    /// Returns the number of distinct keys removed.
    ///
    /// # Errors
    /// Returns `CacheError::InvalidPattern` if `pattern` is empty or too
    /// long. Remote failures are logged, not returned.
    pub async fn invalidate(&self, pattern: &str) -> Result<usize, CacheError> {
        let glob = GlobPattern::new(pattern)?;

        let remote = match self.remote.delete_matching(&glob).await {
            Ok(keys) => keys,
            Err(err) => {
                Counters::bump(&self.counters.remote_failures);
                tracing::warn!(pattern, error = %err, "remote invalidation failed");
                Vec::new()
            }
        };
        let local = self.local.delete_matching(&glob);

        let removed: HashSet<String> = remote.into_iter().chain(local).collect();
        tracing::info!(pattern, removed = removed.len(), "cache invalidated");
        Ok(removed.len())
    }

    /// Cache-aside lookup
    ///
    /// On a miss `fetcher` runs and its result is stored for `ttl`.
    /// Concurrent misses on the same key are serialized: the first caller
    /// fetches, later callers re-read the cache once it finishes and only
    /// fetch themselves if nothing was stored.
    ///
    /// # Errors
    /// Returns the fetcher's error unchanged. Nothing is cached in that case.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, fetcher: F, ttl: Duration) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_as::<T>(key).await {
            return Ok(hit);
        }

        let slot = InflightSlot::claim(&self.inflight, key);
        let _turn = slot.gate.lock().await;
        if let Some(hit) = self.get_as::<T>(key).await {
            return Ok(hit);
        }
        let value = fetcher().await?;
        match serde_json::to_value(&value) {
            Ok(encoded) => {
                self.set(key, encoded, ttl).await;
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "fetched value not serializable, not cached");
            }
        }
        Ok(value)
    }

    /// Read many keys concurrently
    pub async fn mget(&self, keys: &[&str]) -> Vec<(String, Option<Value>)> {
        futures::future::join_all(
            keys.iter()
                .map(|key| async move { ((*key).to_string(), self.get(key).await) }),
        )
        .await
    }

    /// Write many entries concurrently
    pub async fn mset(&self, entries: Vec<(String, Value)>, ttl: Duration) -> Vec<(String, bool)> {
        futures::future::join_all(entries.into_iter().map(|(key, value)| async move {
            let stored = self.set(&key, value, ttl).await;
            (key, stored)
        }))
        .await
    }

    /// Drop expired local entries
    pub fn sweep_expired(&self) -> usize {
        let removed = self.local.sweep(self.clock.now());
        if removed > 0 {
            tracing::debug!(removed, "swept expired local cache entries");
        }
        removed
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            remote_failures: self.counters.remote_failures.load(Ordering::Relaxed),
            local_entries: self.local.len(),
        }
    }

    /// Keys currently being fetched by `get_or_set`
    #[inline]
    #[must_use]
    pub fn inflight_fetches(&self) -> usize {
        self.inflight.len()
    }

    /// Run [`Self::sweep_expired`] on the configured interval
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        aps_core::spawn_periodic(self, self.config.sweep_interval(), "cache", |cache| {
            cache.sweep_expired();
        })
    }
}
