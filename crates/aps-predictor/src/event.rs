//! Behavior events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// What a subject did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Looked at a page
    View,
    /// Interacted with an element
    Click,
    /// Asked for generated content
    Generate,
    /// Saved a result
    Save,
    /// Shared a result
    Share,
}

impl Action {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Click => "click",
            Action::Generate => "generate",
            Action::Save => "save",
            Action::Share => "share",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorEvent {
    /// Who acted
    pub subject_id: String,
    /// Browser or app session
    pub session_id: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// What was done
    pub action: Action,
    /// Where it was done
    pub page: String,
    /// Time spent, in milliseconds
    pub duration_ms: u64,
    /// Free-form attributes (`style`, `tags`, `content_id` are read)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl BehaviorEvent {
    /// Create event stamped now, with no duration or metadata
    #[must_use]
    pub fn new(
        subject_id: impl Into<String>,
        session_id: impl Into<String>,
        action: Action,
        page: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            action,
            page: page.into(),
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    /// Set the timestamp
    #[inline]
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the time spent
    #[inline]
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Add one metadata attribute
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
