//! Experiment data model

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique experiment identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(Uuid);

impl ExperimentId {
    /// Generate a fresh id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    #[inline]
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Defined, not yet serving
    Draft,
    /// Assigning subjects
    Running,
    /// Temporarily not assigning
    Paused,
    /// Finished, terminal
    Completed,
}

impl ExperimentStatus {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition submitted to create an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Name used by callers to look the experiment up
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Variant name to opaque variant payload, in declaration order
    pub variants: IndexMap<String, Value>,
    /// Variant name to percentage; equal split when absent
    #[serde(default)]
    pub allocation: Option<IndexMap<String, f64>>,
    /// Metrics to evaluate; `conversion_rate` when empty
    #[serde(default)]
    pub target_metrics: Vec<String>,
    /// Planned duration; engine default when absent
    #[serde(default)]
    pub duration_days: Option<u32>,
}

impl ExperimentConfig {
    /// Create empty definition
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            variants: IndexMap::new(),
            allocation: None,
            target_metrics: Vec::new(),
            duration_days: None,
        }
    }

    /// Set description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a variant; the first one added is the control
    #[inline]
    #[must_use]
    pub fn with_variant(mut self, name: impl Into<String>, config: Value) -> Self {
        self.variants.insert(name.into(), config);
        self
    }

    /// Set one variant's share in percent
    #[must_use]
    pub fn with_allocation(mut self, variant: impl Into<String>, percent: f64) -> Self {
        self.allocation
            .get_or_insert_with(IndexMap::new)
            .insert(variant.into(), percent);
        self
    }

    /// Add a target metric
    #[inline]
    #[must_use]
    pub fn with_target_metric(mut self, metric: impl Into<String>) -> Self {
        self.target_metrics.push(metric.into());
        self
    }

    /// Set duration
    #[inline]
    #[must_use]
    pub fn with_duration_days(mut self, days: u32) -> Self {
        self.duration_days = Some(days);
        self
    }
}

/// A stored experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Identifier
    pub id: ExperimentId,
    /// Lookup name
    pub name: String,
    /// Free text
    pub description: String,
    /// Variant payloads in declaration order; the first is the control
    pub variants: IndexMap<String, Value>,
    /// Percentage per variant, same order as `variants`
    pub allocation: IndexMap<String, f64>,
    /// Metrics evaluated in results; the first is primary
    pub target_metrics: Vec<String>,
    /// Current status
    pub status: ExperimentStatus,
    /// Planned duration
    pub duration_days: u32,
    /// When it was created
    pub created_at: DateTime<Utc>,
    /// When it first started running
    pub start_date: Option<DateTime<Utc>>,
    /// Planned or actual end
    pub end_date: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Name of the control variant
    #[must_use]
    pub fn control(&self) -> Option<&str> {
        self.variants.keys().next().map(String::as_str)
    }

    /// Whether the planned end has passed
    #[must_use]
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| now >= end)
    }
}

/// Frozen mapping of a subject to a variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Experiment
    pub experiment_id: ExperimentId,
    /// Subject
    pub subject_id: String,
    /// Chosen variant
    pub variant: String,
    /// When the choice was made
    pub assigned_at: DateTime<Utc>,
}

/// Outcome event attributed to a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentEvent {
    /// Experiment
    pub experiment_id: ExperimentId,
    /// Subject
    pub subject_id: String,
    /// Variant the subject was assigned
    pub variant: String,
    /// Event type, e.g. `conversion`
    pub event_type: String,
    /// Opaque payload
    pub event_data: Value,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

/// Result of [`crate::ExperimentEngine::track_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Event stored against the subject's variant
    Recorded,
    /// No running experiment, or the subject is not assigned
    NotEnrolled,
    /// Store failed, event lost
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_builder_keeps_declaration_order() {
        let cfg = ExperimentConfig::new("headline")
            .with_variant("control", json!({}))
            .with_variant("bold", json!({"weight": 700}))
            .with_allocation("control", 70.0)
            .with_allocation("bold", 30.0);

        let names: Vec<&str> = cfg.variants.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["control", "bold"]);
        assert_eq!(cfg.allocation.unwrap()["bold"], 30.0);
    }

    #[test]
    fn id_round_trips_through_string() {
        let id = ExperimentId::new();
        let parsed: ExperimentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExperimentStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
