//! Online analysis of experiment outcomes
//!
//! Rates are percentages of assigned users with at least one event of the
//! metric's type. Significance is a two-proportion z-test between the
//! control and the best challenger, reported in coarse p-value bands.

use crate::types::{Assignment, Experiment, ExperimentEvent, ExperimentId, ExperimentStatus};
use aps_core::ExperimentSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// z for a two-sided 95% interval
const Z_95: f64 = 1.96;

/// p-value at or below which a metric counts as significant
const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// A rate with its 95% confidence interval, all in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Observed rate
    pub value: f64,
    /// Interval lower bound
    pub ci_low: f64,
    /// Interval upper bound
    pub ci_high: f64,
}

/// Per-variant counts and rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    /// Variant name
    pub variant: String,
    /// Subjects assigned to it
    pub assigned_users: u64,
    /// Events by type
    pub event_counts: BTreeMap<String, u64>,
    /// Distinct subjects with at least one event, by type
    pub users_with_event: BTreeMap<String, u64>,
    /// Target metric values
    pub metrics: BTreeMap<String, MetricValue>,
}

/// Comparison of variants on one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Metric name
    pub metric: String,
    /// Control variant (first declared)
    pub control: String,
    /// Best non-control variant
    pub challenger: Option<String>,
    /// Test statistic, challenger minus control
    pub z_score: f64,
    /// Banded p-value: 0.01, 0.05, 0.1 or 1.0
    pub p_value: f64,
    /// Whether `p_value <= 0.05`
    pub significant: bool,
    /// Variant with the highest rate
    pub best_variant: Option<String>,
}

/// What to do with the experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    /// A variant won
    Winner,
    /// Not enough data yet
    Continue,
    /// Out of time without a winner
    Stop,
    /// Enough data, no difference
    Inconclusive,
}

/// Full analysis snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Experiment analysed
    pub experiment_id: ExperimentId,
    /// Its name
    pub name: String,
    /// Its status at analysis time
    pub status: ExperimentStatus,
    /// Assigned subjects across variants
    pub total_users: u64,
    /// Per-variant figures in declaration order
    pub variants: Vec<VariantStats>,
    /// Per-metric comparisons in target order
    pub metrics: Vec<MetricResult>,
    /// Every variant has reached the minimum sample
    pub statistical_significance: bool,
    /// Suggested next step
    pub recommendation: Recommendation,
    /// Winner on the primary metric, when there is one
    pub winning_variant: Option<String>,
    /// When the analysis ran
    pub computed_at: DateTime<Utc>,
}

/// Event type a metric is computed from
///
/// `conversion_rate` and any `<event>_rate` read `<event>`; other names are
/// taken as the event type itself.
#[must_use]
pub fn metric_event(metric: &str) -> &str {
    metric.strip_suffix("_rate").unwrap_or(metric)
}

/// Percentage of `n` that `x` represents, zero when `n` is zero
#[must_use]
pub fn rate(x: u64, n: u64) -> f64 {
    if n == 0 {
        0.0
    } else {
        x as f64 / n as f64 * 100.0
    }
}

/// Wald 95% interval around a percentage, clamped to [0, 100]
#[must_use]
pub fn wald_interval(value: f64, n: u64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 100.0);
    }
    let margin = Z_95 * (value * (100.0 - value) / n as f64).sqrt();
    ((value - margin).max(0.0), (value + margin).min(100.0))
}

/// Two-proportion z statistic of `x2/n2` against `x1/n1`
#[must_use]
pub fn two_proportion_z(x1: u64, n1: u64, x2: u64, n2: u64) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 0.0;
    }
    let (x1, n1, x2, n2) = (x1 as f64, n1 as f64, x2 as f64, n2 as f64);
    let pooled = (x1 + x2) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 {
        0.0
    } else {
        (x2 / n2 - x1 / n1) / se
    }
}

/// Coarse two-sided p-value for `z`
#[must_use]
pub fn p_value_band(z: f64) -> f64 {
    let z = z.abs();
    if z >= 2.576 {
        0.01
    } else if z >= 1.96 {
        0.05
    } else if z >= 1.645 {
        0.1
    } else {
        1.0
    }
}

/// Analyse an experiment from its assignments and events
pub(crate) fn analyze(
    experiment: &Experiment,
    assignments: &[Assignment],
    events: &[ExperimentEvent],
    settings: &ExperimentSettings,
    now: DateTime<Utc>,
) -> ExperimentResult {
    let mut assigned: HashMap<&str, u64> = HashMap::new();
    for a in assignments {
        *assigned.entry(a.variant.as_str()).or_default() += 1;
    }

    let mut counts: HashMap<&str, BTreeMap<String, u64>> = HashMap::new();
    let mut actors: HashMap<&str, BTreeMap<String, BTreeSet<&str>>> = HashMap::new();
    for e in events {
        *counts
            .entry(e.variant.as_str())
            .or_default()
            .entry(e.event_type.clone())
            .or_default() += 1;
        actors
            .entry(e.variant.as_str())
            .or_default()
            .entry(e.event_type.clone())
            .or_default()
            .insert(e.subject_id.as_str());
    }

    let variants: Vec<VariantStats> = experiment
        .variants
        .keys()
        .map(|name| {
            let n = assigned.get(name.as_str()).copied().unwrap_or(0);
            let users_with_event: BTreeMap<String, u64> = actors
                .get(name.as_str())
                .map(|by_type| {
                    by_type
                        .iter()
                        .map(|(t, subjects)| (t.clone(), subjects.len() as u64))
                        .collect()
                })
                .unwrap_or_default();
            let metrics = experiment
                .target_metrics
                .iter()
                .map(|metric| {
                    let x = users_with_event.get(metric_event(metric)).copied().unwrap_or(0);
                    let value = rate(x, n);
                    let (ci_low, ci_high) = wald_interval(value, n);
                    (metric.clone(), MetricValue { value, ci_low, ci_high })
                })
                .collect();
            VariantStats {
                variant: name.clone(),
                assigned_users: n,
                event_counts: counts.get(name.as_str()).cloned().unwrap_or_default(),
                users_with_event,
                metrics,
            }
        })
        .collect();

    let metrics: Vec<MetricResult> = experiment
        .target_metrics
        .iter()
        .map(|metric| compare(metric, &variants))
        .collect();

    let total_users: u64 = variants.iter().map(|v| v.assigned_users).sum();
    let statistical_significance = !variants.is_empty()
        && variants
            .iter()
            .all(|v| v.assigned_users >= settings.min_sample_per_variant);
    let any_significant = metrics.iter().any(|m| m.significant);

    let recommendation = if statistical_significance && any_significant {
        Recommendation::Winner
    } else if experiment.is_past_end(now) || experiment.status == ExperimentStatus::Completed {
        Recommendation::Stop
    } else if total_users < settings.min_total_sample {
        Recommendation::Continue
    } else {
        Recommendation::Inconclusive
    };

    let winning_variant = metrics
        .first()
        .filter(|primary| statistical_significance && primary.significant)
        .and_then(|primary| primary.best_variant.clone());

    ExperimentResult {
        experiment_id: experiment.id,
        name: experiment.name.clone(),
        status: experiment.status,
        total_users,
        variants,
        metrics,
        statistical_significance,
        recommendation,
        winning_variant,
        computed_at: now,
    }
}

fn compare(metric: &str, variants: &[VariantStats]) -> MetricResult {
    let event = metric_event(metric);
    let hits_of = |v: &VariantStats| v.users_with_event.get(event).copied().unwrap_or(0);

    let control = variants.first();
    let challenger = variants.get(1..).and_then(|rest| best_on(rest, metric));

    let z_score = match (control, challenger) {
        (Some(c), Some(t)) => {
            two_proportion_z(hits_of(c), c.assigned_users, hits_of(t), t.assigned_users)
        }
        _ => 0.0,
    };
    let p_value = p_value_band(z_score);

    MetricResult {
        metric: metric.to_string(),
        control: control.map(|c| c.variant.clone()).unwrap_or_default(),
        challenger: challenger.map(|t| t.variant.clone()),
        z_score,
        p_value,
        significant: p_value <= SIGNIFICANCE_LEVEL,
        best_variant: best_on(variants, metric).map(|v| v.variant.clone()),
    }
}

/// Highest rate on `metric`; the first declared wins ties
fn best_on<'a>(candidates: &'a [VariantStats], metric: &str) -> Option<&'a VariantStats> {
    let value_of = |v: &VariantStats| v.metrics.get(metric).map_or(0.0, |m| m.value);
    candidates.iter().fold(None, |best, v| match best {
        Some(b) if value_of(b) >= value_of(v) => Some(b),
        _ => Some(v),
    })
}
