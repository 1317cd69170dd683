//! In-process fallback tier

use crate::entry::{CacheEntry, CacheRegion};
use crate::pattern::GlobPattern;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

/// Local tier with lazy expiry
///
/// Expired entries are dropped when read and by [`LocalTier::sweep`].
#[derive(Debug, Default)]
pub struct LocalTier {
    entries: DashMap<String, CacheEntry>,
}

impl LocalTier {
    /// Create empty tier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value for `key`, removing it if expired
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store an entry
    pub fn set(&self, entry: CacheEntry) {
        let entry = entry.in_region(CacheRegion::Local);
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Remove one key
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key matching `pattern`
    pub fn delete_matching(&self, pattern: &GlobPattern) -> Vec<String> {
        if pattern.is_literal() {
            return if self.delete(pattern.as_str()) {
                vec![pattern.as_str().to_string()]
            } else {
                Vec::new()
            };
        }

        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|e| pattern.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();

        matching
            .into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .collect()
    }

    /// Drop expired entries, returning how many went
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Stored entries, expired or not
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
