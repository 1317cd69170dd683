//! Prediction types

use crate::event::Action;
use aps_core::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How engaged a subject is, from mean time spent per event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engagement {
    /// Short visits
    Low,
    /// Moderate visits
    Medium,
    /// Long visits
    High,
}

impl Engagement {
    /// Classify a mean duration against the two thresholds
    #[must_use]
    pub fn classify(mean_ms: f64, medium_ms: u64, high_ms: u64) -> Self {
        if mean_ms > high_ms as f64 {
            Self::High
        } else if mean_ms > medium_ms as f64 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Cache strategy for this level
    #[must_use]
    pub fn strategy(self) -> CacheStrategy {
        match self {
            Self::High => CacheStrategy::new(Duration::from_secs(3600), Priority::High, Duration::from_secs(5)),
            Self::Medium => CacheStrategy::new(Duration::from_secs(1800), Priority::Medium, Duration::from_secs(10)),
            Self::Low => CacheStrategy::new(Duration::from_secs(900), Priority::Low, Duration::from_secs(20)),
        }
    }
}

/// How predicted content should be cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategy {
    /// TTL for preloaded entries and the prediction itself
    pub ttl_secs: u64,
    /// Warm-up priority
    pub priority: Priority,
    /// Delay before preloading starts
    pub preload_delay_ms: u64,
}

impl CacheStrategy {
    /// Create strategy
    #[must_use]
    pub fn new(ttl: Duration, priority: Priority, preload_delay: Duration) -> Self {
        Self {
            ttl_secs: ttl.as_secs(),
            priority,
            preload_delay_ms: u64::try_from(preload_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// TTL as a duration
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Preload delay as a duration
    #[inline]
    #[must_use]
    pub fn preload_delay(&self) -> Duration {
        Duration::from_millis(self.preload_delay_ms)
    }
}

/// A likely next step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    /// Expected action
    pub action: Action,
    /// Estimated probability in [0, 1]
    pub probability: f64,
    /// Page the action targets
    pub resource: String,
    /// Expected time until it happens
    pub eta_ms: u64,
}

/// Content the subject is likely to want
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedContent {
    /// Attribute the affinity came from (`style`, `tag` or `content`)
    pub kind: String,
    /// Attribute value
    pub id: String,
    /// Affinity normalized to [0, 1]
    pub relevance_score: f64,
    /// Key the content is cached under
    pub cache_key: String,
}

impl RecommendedContent {
    /// Create item with its derived cache key
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>, relevance_score: f64) -> Self {
        let kind = kind.into();
        let id = id.into();
        let cache_key = format!("content:{kind}:{id}");
        Self {
            kind,
            id,
            relevance_score,
            cache_key,
        }
    }
}

/// Everything derived from a subject's recent behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Subject predicted for
    pub subject_id: String,
    /// Most likely next steps, best first
    pub next_actions: Vec<NextAction>,
    /// Content worth warming, most relevant first
    pub recommended_content: Vec<RecommendedContent>,
    /// How to cache what is warmed
    pub cache_strategy: CacheStrategy,
    /// Engagement level the strategy came from
    pub engagement: Engagement,
    /// When this prediction was computed
    pub generated_at: DateTime<Utc>,
}
