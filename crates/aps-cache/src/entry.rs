//! Cache entries

use aps_core::clock::saturating_add;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Tier an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheRegion {
    /// Shared tier, possibly across processes
    Remote,
    /// In-process fallback tier
    Local,
}

/// A cached value and when it stops being valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Opaque payload
    pub value: Value,
    /// Instant after which the entry is a miss
    pub expires_at: DateTime<Utc>,
    /// Tier holding this copy
    pub region: CacheRegion,
}

impl CacheEntry {
    /// Create entry expiring `ttl` after `now`
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value: Value,
        now: DateTime<Utc>,
        ttl: Duration,
        region: CacheRegion,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at: saturating_add(now, ttl),
            region,
        }
    }

    /// Whether the entry is past its expiry at `now`
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero if already expired
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Same entry, relabelled for another tier
    #[inline]
    #[must_use]
    pub fn in_region(mut self, region: CacheRegion) -> Self {
        self.region = region;
        self
    }
}
