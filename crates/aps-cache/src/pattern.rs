//! Single-wildcard glob patterns for cache invalidation
//!
//! `*` matches any run of characters (including none). Every other
//! character matches itself.

use crate::error::CacheError;
use regex::Regex;

/// Longest pattern accepted
const MAX_PATTERN_LEN: usize = 512;

/// Compiled glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a pattern
    ///
    /// # Errors
    /// Returns `CacheError::InvalidPattern` for an empty or oversized
    /// pattern.
    pub fn new(pattern: &str) -> Result<Self, CacheError> {
        let invalid = |reason: &str| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(invalid("pattern is too long"));
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("(?s)^{body}$")).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    /// Whether `key` matches
    #[inline]
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Whether the pattern contains no wildcard
    #[inline]
    #[must_use]
    pub fn is_literal(&self) -> bool {
        !self.raw.contains('*')
    }

    /// Source text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
