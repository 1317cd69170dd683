//! Remote (shared) cache tier
//!
//! The remote tier is a collaborator: anything that can get, set and delete
//! entries by key and by glob pattern. [`MokaRemoteTier`] is the in-process
//! implementation used when no external store is configured.

use crate::entry::{CacheEntry, CacheRegion};
use crate::error::CacheError;
use crate::pattern::GlobPattern;
use aps_core::SharedClock;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Shared cache backend
///
/// Implementations may block on network I/O; the tiered cache never holds
/// a local lock while awaiting them.
#[async_trait]
pub trait RemoteTier: Send + Sync + Debug {
    /// Fetch an entry, expired or not
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, replacing any previous one
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove one key, reporting whether it existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key matching `pattern`, returning the removed keys
    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<Vec<String>, CacheError>;
}

/// Longest lifetime handed to moka; entries with later deadlines are
/// still checked against `expires_at` on read
const MAX_TIER_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Expires moka entries at their own `expires_at`
#[derive(Debug)]
struct EntryExpiry {
    clock: SharedClock,
}

impl EntryExpiry {
    fn lifetime(&self, value: &CacheEntry) -> Option<Duration> {
        Some(value.remaining(self.clock.now()).min(MAX_TIER_LIFETIME))
    }
}

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.lifetime(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.lifetime(value)
    }
}

/// In-process remote tier backed by moka
///
/// Provides:
/// - Per-entry expiration matching each entry's TTL
/// - Size-bounded eviction (TinyLFU)
/// - Lock-free concurrent access
#[derive(Debug, Clone)]
pub struct MokaRemoteTier {
    inner: Cache<String, CacheEntry>,
}

impl MokaRemoteTier {
    /// Create tier with max capacity
    #[must_use]
    pub fn new(max_capacity: u64, clock: SharedClock) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(EntryExpiry { clock })
                .build(),
        }
    }

    /// Approximate entry count
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush moka's pending maintenance so counts are exact
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}

#[async_trait]
impl RemoteTier for MokaRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.inner.get(key).await)
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let entry = entry.in_region(CacheRegion::Remote);
        self.inner.insert(entry.key.clone(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.remove(key).await.is_some())
    }

    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<Vec<String>, CacheError> {
        if pattern.is_literal() {
            let removed = self.inner.remove(pattern.as_str()).await.is_some();
            return Ok(if removed {
                vec![pattern.as_str().to_string()]
            } else {
                Vec::new()
            });
        }

        let matching: Vec<String> = self
            .inner
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        let mut removed = Vec::with_capacity(matching.len());
        for key in matching {
            if self.inner.remove(&key).await.is_some() {
                removed.push(key);
            }
        }
        Ok(removed)
    }
}
