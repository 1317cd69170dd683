//! Deriving predictions from a subject's history
//!
//! Everything here is pure: a slice of events in, a [`Prediction`] out.

use crate::event::{Action, BehaviorEvent};
use crate::prediction::{Engagement, NextAction, Prediction, RecommendedContent};
use aps_core::PredictorConfig;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Build a prediction from `events`, oldest first
pub(crate) fn predict(
    subject_id: &str,
    events: &VecDeque<BehaviorEvent>,
    config: &PredictorConfig,
    now: DateTime<Utc>,
) -> Prediction {
    let mean = mean_duration_ms(events);
    let engagement = Engagement::classify(mean, config.medium_engagement_ms, config.high_engagement_ms);
    let eta_ms = mean.round() as u64;

    let mut next_actions = page_transitions(events, config.transition_window, eta_ms);
    if engagement == Engagement::High {
        if let Some(current) = events.back() {
            next_actions.push(NextAction {
                action: Action::Generate,
                probability: config.generate_boost,
                resource: current.page.clone(),
                eta_ms,
            });
        }
    }
    next_actions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    next_actions.truncate(config.max_next_actions);

    let mut recommended_content = content_affinity(events);
    recommended_content.truncate(config.max_recommendations);

    Prediction {
        subject_id: subject_id.to_string(),
        next_actions,
        recommended_content,
        cache_strategy: engagement.strategy(),
        engagement,
        generated_at: now,
    }
}

/// Mean time spent per event, zero for no events
pub(crate) fn mean_duration_ms(events: &VecDeque<BehaviorEvent>) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let total: f64 = events.iter().map(|e| e.duration_ms as f64).sum();
    total / events.len() as f64
}

/// Likely next steps from page-to-page transitions in the recent window
///
/// Transitions leaving the current page win. When the current page has
/// never been left, every observed transition is used instead.
pub(crate) fn page_transitions(
    events: &VecDeque<BehaviorEvent>,
    window: usize,
    eta_ms: u64,
) -> Vec<NextAction> {
    let skip = events.len().saturating_sub(window);
    let recent: Vec<&BehaviorEvent> = events.iter().skip(skip).collect();
    let Some(current) = recent.last().map(|e| e.page.as_str()) else {
        return Vec::new();
    };

    // (from, to, action on arrival) -> count
    let mut counts: BTreeMap<(&str, &str, Action), u32> = BTreeMap::new();
    for pair in recent.windows(2) {
        *counts
            .entry((pair[0].page.as_str(), pair[1].page.as_str(), pair[1].action))
            .or_default() += 1;
    }

    let leaving_current = counts.keys().any(|(from, _, _)| *from == current);
    let mut targets: BTreeMap<(&str, Action), u32> = BTreeMap::new();
    for ((from, to, action), count) in &counts {
        if !leaving_current || *from == current {
            *targets.entry((*to, *action)).or_default() += count;
        }
    }

    let total: u32 = targets.values().sum();
    if total == 0 {
        return Vec::new();
    }

    let mut actions: Vec<NextAction> = targets
        .into_iter()
        .map(|((to, action), count)| NextAction {
            action,
            probability: f64::from(count) / f64::from(total),
            resource: to.to_string(),
            eta_ms,
        })
        .collect();
    actions.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    actions
}

/// Content attributes ranked by how often they appear, best first
pub(crate) fn content_affinity(events: &VecDeque<BehaviorEvent>) -> Vec<RecommendedContent> {
    let mut counts: BTreeMap<(&'static str, String), u32> = BTreeMap::new();

    for event in events {
        let meta = &event.metadata;
        if let Some(style) = meta.get("style").and_then(scalar_id) {
            *counts.entry(("style", style)).or_default() += 1;
        }
        if let Some(tags) = meta.get("tags").and_then(Value::as_array) {
            for tag in tags.iter().filter_map(scalar_id) {
                *counts.entry(("tag", tag)).or_default() += 1;
            }
        }
        if let Some(id) = meta.get("content_id").and_then(scalar_id) {
            *counts.entry(("content", id)).or_default() += 1;
        }
    }

    let Some(max) = counts.values().copied().max() else {
        return Vec::new();
    };

    let mut items: Vec<RecommendedContent> = counts
        .into_iter()
        .map(|((kind, id), count)| {
            RecommendedContent::new(kind, id, f64::from(count) / f64::from(max))
        })
        .collect();
    items.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    items
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
