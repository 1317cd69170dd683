//! Experiment engine
//!
//! Owns experiment lifecycles, bucketing and analysis. Reads of the
//! running-experiment set go through a snapshot that is refreshed from the
//! store when older than the configured interval; if the store fails the
//! previous snapshot keeps serving.

use crate::bucketing;
use crate::error::ExperimentError;
use crate::lifecycle::validate_transition;
use crate::results::{self, ExperimentResult};
use crate::store::ExperimentStore;
use crate::types::{
    Assignment, Experiment, ExperimentConfig, ExperimentEvent, ExperimentId, ExperimentStatus,
    TrackOutcome,
};
use aps_core::clock::to_chrono;
use aps_core::{system_clock, ExperimentSettings, SharedClock, MAX_EXPERIMENT_DAYS};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Metric used when a definition names none
pub const DEFAULT_TARGET_METRIC: &str = "conversion_rate";

/// Running experiments by name, as of `refreshed_at`
#[derive(Debug, Default)]
struct ActiveSnapshot {
    by_name: HashMap<String, Experiment>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// A/B testing engine
///
/// Lifecycle changes (start, pause, complete) run one at a time per engine,
/// so each sees the status written by the previous one.
#[derive(Debug)]
pub struct ExperimentEngine {
    store: Arc<dyn ExperimentStore>,
    settings: ExperimentSettings,
    clock: SharedClock,
    active: RwLock<ActiveSnapshot>,
    lifecycle: Mutex<()>,
}

impl ExperimentEngine {
    /// Create engine on the system clock
    #[must_use]
    pub fn new(store: Arc<dyn ExperimentStore>, settings: ExperimentSettings) -> Self {
        Self::with_clock(store, settings, system_clock())
    }

    /// Create engine on a specific clock
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn ExperimentStore>,
        settings: ExperimentSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            settings,
            clock,
            active: RwLock::new(ActiveSnapshot::default()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Validate and store a new draft experiment
    ///
    /// # Errors
    /// `InvalidConfig` when the definition is malformed, `Store` when it
    /// cannot be saved.
    pub async fn create_experiment(&self, config: ExperimentConfig) -> Result<ExperimentId, ExperimentError> {
        let experiment = self.build(config)?;
        let id = experiment.id;
        let name = experiment.name.clone();
        self.store.insert_experiment(experiment).await?;

        tracing::info!(experiment = %id, name = %name, "experiment created");
        Ok(id)
    }

    /// Start a draft experiment or resume a paused one
    ///
    /// # Errors
    /// `NotFound`, `IllegalTransition`, or `NameInUse` when another running
    /// experiment has the same name.
    pub async fn start(&self, id: ExperimentId) -> Result<(), ExperimentError> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut experiment = self.load(id).await?;
        validate_transition(experiment.status, ExperimentStatus::Running)?;

        let clash = self
            .store
            .running_experiments()
            .await?
            .into_iter()
            .any(|other| other.name == experiment.name && other.id != id);
        if clash {
            return Err(ExperimentError::NameInUse(experiment.name));
        }

        if experiment.status == ExperimentStatus::Draft {
            let now = self.clock.now();
            experiment.start_date = Some(now);
            let end = now
                .checked_add_signed(chrono::Duration::days(i64::from(experiment.duration_days)))
                .ok_or_else(|| ExperimentError::invalid("end date out of range"))?;
            experiment.end_date = Some(end);
        }
        self.transition(experiment, ExperimentStatus::Running).await
    }

    /// Pause a running experiment
    ///
    /// # Errors
    /// `NotFound` or `IllegalTransition`.
    pub async fn pause(&self, id: ExperimentId) -> Result<(), ExperimentError> {
        let _lifecycle = self.lifecycle.lock().await;
        let experiment = self.load(id).await?;
        validate_transition(experiment.status, ExperimentStatus::Paused)?;
        self.transition(experiment, ExperimentStatus::Paused).await
    }

    /// Complete a running or paused experiment
    ///
    /// # Errors
    /// `NotFound` or `IllegalTransition`.
    pub async fn complete(&self, id: ExperimentId) -> Result<(), ExperimentError> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut experiment = self.load(id).await?;
        validate_transition(experiment.status, ExperimentStatus::Completed)?;

        let now = self.clock.now();
        if experiment.end_date.map_or(true, |end| end > now) {
            experiment.end_date = Some(now);
        }
        self.transition(experiment, ExperimentStatus::Completed).await
    }

    /// Variant of `subject_id` in the running experiment called `name`
    ///
    /// The first call for a subject buckets and persists the assignment;
    /// later calls return the stored variant. `None` when no running
    /// experiment has that name.
    pub async fn get_variant(&self, subject_id: &str, name: &str) -> Option<String> {
        let experiment = self.running(name).await?;

        match self.store.assignment(experiment.id, subject_id).await {
            Ok(Some(existing)) => return Some(existing.variant),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(experiment = %experiment.id, error = %err, "assignment lookup failed");
            }
        }

        let variant = bucketing::assign(subject_id, &experiment.id, &experiment.allocation)?.to_string();
        let assignment = Assignment {
            experiment_id: experiment.id,
            subject_id: subject_id.to_string(),
            variant: variant.clone(),
            assigned_at: self.clock.now(),
        };

        match self.store.insert_assignment_if_absent(assignment).await {
            Ok(stored) => {
                if stored.variant == variant {
                    tracing::debug!(experiment = %experiment.id, subject = subject_id, variant = %variant, "subject assigned");
                }
                Some(stored.variant)
            }
            Err(err) => {
                tracing::warn!(
                    experiment = %experiment.id,
                    error = %err,
                    "assignment not persisted, serving computed variant"
                );
                Some(variant)
            }
        }
    }

    /// Record an outcome for an assigned subject
    pub async fn track_event(
        &self,
        subject_id: &str,
        name: &str,
        event_type: &str,
        event_data: Value,
    ) -> TrackOutcome {
        let Some(experiment) = self.running(name).await else {
            return TrackOutcome::NotEnrolled;
        };

        let assignment = match self.store.assignment(experiment.id, subject_id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return TrackOutcome::NotEnrolled,
            Err(err) => {
                tracing::warn!(experiment = %experiment.id, error = %err, "assignment lookup failed, event dropped");
                return TrackOutcome::Dropped;
            }
        };

        let event = ExperimentEvent {
            experiment_id: experiment.id,
            subject_id: subject_id.to_string(),
            variant: assignment.variant,
            event_type: event_type.to_string(),
            event_data,
            created_at: self.clock.now(),
        };
        match self.store.append_event(event).await {
            Ok(()) => TrackOutcome::Recorded,
            Err(err) => {
                tracing::warn!(experiment = %experiment.id, error = %err, "event not stored");
                TrackOutcome::Dropped
            }
        }
    }

    /// Analyse an experiment's outcomes so far
    ///
    /// # Errors
    /// `NotFound` or `Store`.
    pub async fn get_results(&self, id: ExperimentId) -> Result<ExperimentResult, ExperimentError> {
        let experiment = self.load(id).await?;
        let assignments = self.store.assignments(id).await?;
        let events = self.store.events(id).await?;
        Ok(results::analyze(
            &experiment,
            &assignments,
            &events,
            &self.settings,
            self.clock.now(),
        ))
    }

    /// One experiment
    ///
    /// # Errors
    /// `NotFound` or `Store`.
    pub async fn experiment(&self, id: ExperimentId) -> Result<Experiment, ExperimentError> {
        self.load(id).await
    }

    /// Every experiment, oldest first
    ///
    /// # Errors
    /// `Store`.
    pub async fn list_experiments(&self) -> Result<Vec<Experiment>, ExperimentError> {
        self.store.list_experiments().await
    }

    /// Reload the running-experiment snapshot now
    ///
    /// # Errors
    /// `Store`; the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<usize, ExperimentError> {
        let running = self.store.running_experiments().await?;
        let by_name: HashMap<String, Experiment> =
            running.into_iter().map(|e| (e.name.clone(), e)).collect();
        let count = by_name.len();

        let mut active = self.active.write();
        active.by_name = by_name;
        active.refreshed_at = Some(self.clock.now());
        Ok(count)
    }

    async fn running(&self, name: &str) -> Option<Experiment> {
        if self.snapshot_is_stale() {
            if let Err(err) = self.refresh().await {
                tracing::warn!(error = %err, "experiment refresh failed, serving previous snapshot");
            }
        }
        self.active.read().by_name.get(name).cloned()
    }

    fn snapshot_is_stale(&self) -> bool {
        let refreshed_at = self.active.read().refreshed_at;
        refreshed_at.map_or(true, |at| {
            self.clock.now() - at >= to_chrono(self.settings.refresh_interval())
        })
    }

    fn invalidate_snapshot(&self) {
        self.active.write().refreshed_at = None;
    }

    async fn load(&self, id: ExperimentId) -> Result<Experiment, ExperimentError> {
        self.store
            .experiment(id)
            .await?
            .ok_or(ExperimentError::NotFound(id))
    }

    async fn transition(&self, mut experiment: Experiment, to: ExperimentStatus) -> Result<(), ExperimentError> {
        let from = experiment.status;
        experiment.status = to;
        let id = experiment.id;
        self.store.update_experiment(experiment).await?;
        self.invalidate_snapshot();

        tracing::info!(experiment = %id, %from, %to, "experiment status changed");
        Ok(())
    }

    fn build(&self, config: ExperimentConfig) -> Result<Experiment, ExperimentError> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(ExperimentError::invalid("name is empty"));
        }
        if config.variants.len() < 2 {
            return Err(ExperimentError::invalid("at least two variants are required"));
        }

        let allocation = match config.allocation {
            None => {
                let share = 100.0 / config.variants.len() as f64;
                config.variants.keys().map(|v| (v.clone(), share)).collect()
            }
            Some(given) => self.normalize_allocation(&config.variants, given)?,
        };

        let target_metrics = if config.target_metrics.is_empty() {
            vec![DEFAULT_TARGET_METRIC.to_string()]
        } else {
            config.target_metrics
        };

        let duration_days = config.duration_days.unwrap_or(self.settings.default_duration_days);
        if duration_days == 0 {
            return Err(ExperimentError::invalid("duration must be at least one day"));
        }
        if duration_days > MAX_EXPERIMENT_DAYS {
            return Err(ExperimentError::invalid(format!(
                "duration cannot exceed {MAX_EXPERIMENT_DAYS} days"
            )));
        }

        Ok(Experiment {
            id: ExperimentId::new(),
            name,
            description: config.description,
            variants: config.variants,
            allocation,
            target_metrics,
            status: ExperimentStatus::Draft,
            duration_days,
            created_at: self.clock.now(),
            start_date: None,
            end_date: None,
        })
    }

    /// Order `given` like `variants`, filling omitted variants with zero
    fn normalize_allocation(
        &self,
        variants: &IndexMap<String, Value>,
        given: IndexMap<String, f64>,
    ) -> Result<IndexMap<String, f64>, ExperimentError> {
        if let Some(unknown) = given.keys().find(|k| !variants.contains_key(*k)) {
            return Err(ExperimentError::invalid(format!(
                "allocation names unknown variant '{unknown}'"
            )));
        }
        if let Some((variant, share)) = given.iter().find(|(_, share)| !share.is_finite() || **share < 0.0) {
            return Err(ExperimentError::invalid(format!(
                "allocation for '{variant}' is {share}, must be a non-negative number"
            )));
        }

        let total: f64 = given.values().sum();
        if (total - 100.0).abs() > self.settings.allocation_tolerance {
            return Err(ExperimentError::invalid(format!(
                "allocations sum to {total}, expected 100"
            )));
        }

        Ok(variants
            .keys()
            .map(|v| (v.clone(), given.get(v).copied().unwrap_or(0.0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::Recommendation;
    use crate::store::MemoryExperimentStore;
    use aps_core::ManualClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> (Arc<ExperimentEngine>, ManualClock) {
        let clock = ManualClock::at_epoch();
        let engine = ExperimentEngine::with_clock(
            Arc::new(MemoryExperimentStore::new()),
            ExperimentSettings::default(),
            clock.shared(),
        );
        (Arc::new(engine), clock)
    }

    fn ab(name: &str) -> ExperimentConfig {
        ExperimentConfig::new(name)
            .with_variant("A", json!({"color": "blue"}))
            .with_variant("B", json!({"color": "green"}))
    }

    async fn running(engine: &ExperimentEngine, config: ExperimentConfig) -> ExperimentId {
        let id = engine.create_experiment(config).await.unwrap();
        engine.start(id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn create_applies_defaults() {
        let (engine, _clock) = engine();
        let id = engine.create_experiment(ab("cta")).await.unwrap();
        let experiment = engine.experiment(id).await.unwrap();

        assert_eq!(experiment.status, ExperimentStatus::Draft);
        assert_eq!(experiment.allocation["A"], 50.0);
        assert_eq!(experiment.allocation["B"], 50.0);
        assert_eq!(experiment.target_metrics, vec!["conversion_rate".to_string()]);
        assert_eq!(experiment.duration_days, 14);
    }

    #[tokio::test]
    async fn create_rejects_bad_allocations() {
        let (engine, _clock) = engine();

        let short = ab("x").with_allocation("A", 50.0).with_allocation("B", 40.0);
        assert!(matches!(
            engine.create_experiment(short).await,
            Err(ExperimentError::InvalidConfig(_))
        ));

        let unknown = ab("x").with_allocation("A", 50.0).with_allocation("C", 50.0);
        assert!(engine.create_experiment(unknown).await.is_err());

        let negative = ab("x").with_allocation("A", 110.0).with_allocation("B", -10.0);
        assert!(engine.create_experiment(negative).await.is_err());

        let single = ExperimentConfig::new("x").with_variant("only", json!({}));
        assert!(engine.create_experiment(single).await.is_err());

        let within_tolerance = ab("x").with_allocation("A", 50.05).with_allocation("B", 50.0);
        assert!(engine.create_experiment(within_tolerance).await.is_ok());
    }

    #[tokio::test]
    async fn create_rejects_unbounded_duration() {
        let (engine, _clock) = engine();
        for days in [MAX_EXPERIMENT_DAYS + 1, u32::MAX] {
            assert!(matches!(
                engine.create_experiment(ab("long").with_duration_days(days)).await,
                Err(ExperimentError::InvalidConfig(_))
            ));
        }

        let id = running(&engine, ab("long").with_duration_days(MAX_EXPERIMENT_DAYS)).await;
        let experiment = engine.experiment(id).await.unwrap();
        let span = experiment.end_date.unwrap() - experiment.start_date.unwrap();
        assert_eq!(span.num_days(), i64::from(MAX_EXPERIMENT_DAYS));
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let (engine, clock) = engine();
        let id = engine.create_experiment(ab("cta")).await.unwrap();

        assert!(matches!(
            engine.complete(id).await,
            Err(ExperimentError::IllegalTransition { .. })
        ));

        engine.start(id).await.unwrap();
        let started = engine.experiment(id).await.unwrap();
        assert_eq!(started.start_date, Some(clock_now(&clock)));

        engine.pause(id).await.unwrap();
        engine.start(id).await.unwrap();
        assert_eq!(engine.experiment(id).await.unwrap().start_date, started.start_date);

        engine.complete(id).await.unwrap();
        assert_eq!(
            engine.experiment(id).await.unwrap().status,
            ExperimentStatus::Completed
        );
        assert!(engine.start(id).await.is_err());
    }

    fn clock_now(clock: &ManualClock) -> DateTime<Utc> {
        use aps_core::Clock;
        clock.now()
    }

    #[tokio::test]
    async fn duplicate_running_name_rejected() {
        let (engine, _clock) = engine();
        running(&engine, ab("cta")).await;
        let second = engine.create_experiment(ab("cta")).await.unwrap();

        assert_eq!(
            engine.start(second).await,
            Err(ExperimentError::NameInUse("cta".to_string()))
        );
    }

    #[tokio::test]
    async fn variant_only_for_running_experiments() {
        let (engine, _clock) = engine();
        let id = engine.create_experiment(ab("cta")).await.unwrap();
        assert_eq!(engine.get_variant("u1", "cta").await, None);

        engine.start(id).await.unwrap();
        let variant = engine.get_variant("u1", "cta").await.unwrap();
        assert!(variant == "A" || variant == "B");

        engine.pause(id).await.unwrap();
        assert_eq!(engine.get_variant("u1", "cta").await, None);
        assert_eq!(engine.get_variant("u1", "missing").await, None);
    }

    #[tokio::test]
    async fn assignment_is_sticky() {
        let (engine, _clock) = engine();
        running(&engine, ab("cta")).await;

        let first = engine.get_variant("u1", "cta").await;
        for _ in 0..10 {
            assert_eq!(engine.get_variant("u1", "cta").await, first);
        }
    }

    #[tokio::test]
    async fn full_allocation_always_wins() {
        let (engine, _clock) = engine();
        let config = ab("rollout").with_allocation("A", 100.0).with_allocation("B", 0.0);
        running(&engine, config).await;

        for i in 0..500 {
            assert_eq!(
                engine.get_variant(&format!("user-{i}"), "rollout").await.as_deref(),
                Some("A")
            );
        }
    }

    #[tokio::test]
    async fn track_requires_enrollment() {
        let (engine, _clock) = engine();
        let id = running(&engine, ab("cta")).await;

        assert_eq!(
            engine.track_event("u1", "cta", "conversion", json!({})).await,
            TrackOutcome::NotEnrolled
        );

        let variant = engine.get_variant("u1", "cta").await.unwrap();
        assert_eq!(
            engine.track_event("u1", "cta", "conversion", json!({"value": 3})).await,
            TrackOutcome::Recorded
        );

        let results = engine.get_results(id).await.unwrap();
        let stats = results.variants.iter().find(|v| v.variant == variant).unwrap();
        assert_eq!(stats.event_counts["conversion"], 1);
        assert_eq!(stats.metrics["conversion_rate"].value, 100.0);
    }

    #[tokio::test]
    async fn small_samples_are_not_significant() {
        let (engine, _clock) = engine();
        let id = running(&engine, ab("cta")).await;
        for i in 0..150 {
            let subject = format!("user-{i}");
            if engine.get_variant(&subject, "cta").await.as_deref() == Some("B") {
                engine.track_event(&subject, "cta", "conversion", json!({})).await;
            }
        }

        let results = engine.get_results(id).await.unwrap();
        assert_eq!(results.total_users, 150);
        assert!(!results.statistical_significance);
        assert_eq!(results.recommendation, Recommendation::Continue);
        assert_eq!(results.winning_variant, None);
    }

    #[tokio::test]
    async fn clear_difference_declares_winner() {
        let (engine, _clock) = engine();
        let id = running(&engine, ab("cta")).await;
        for i in 0..600 {
            let subject = format!("user-{i}");
            let variant = engine.get_variant(&subject, "cta").await.unwrap();
            let converts = if variant == "B" { i % 2 == 0 } else { i % 10 == 0 };
            if converts {
                engine.track_event(&subject, "cta", "conversion", json!({})).await;
            }
        }

        let results = engine.get_results(id).await.unwrap();
        assert!(results.statistical_significance);
        let metric = &results.metrics[0];
        assert_eq!(metric.control, "A");
        assert_eq!(metric.challenger.as_deref(), Some("B"));
        assert_eq!(metric.p_value, 0.01);
        assert!(metric.significant);
        assert_eq!(results.recommendation, Recommendation::Winner);
        assert_eq!(results.winning_variant.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn no_difference_is_inconclusive() {
        let (engine, _clock) = engine();
        let id = running(&engine, ab("cta")).await;
        for i in 0..600 {
            engine.get_variant(&format!("user-{i}"), "cta").await;
        }

        let results = engine.get_results(id).await.unwrap();
        assert!(results.statistical_significance);
        assert_eq!(results.metrics[0].p_value, 1.0);
        assert_eq!(results.recommendation, Recommendation::Inconclusive);
    }

    #[tokio::test]
    async fn expired_without_winner_stops() {
        let (engine, clock) = engine();
        let id = running(&engine, ab("cta").with_duration_days(7)).await;
        for i in 0..50 {
            engine.get_variant(&format!("user-{i}"), "cta").await;
        }

        clock.advance(Duration::from_secs(8 * 24 * 3600));
        let results = engine.get_results(id).await.unwrap();
        assert_eq!(results.recommendation, Recommendation::Stop);
    }

    #[tokio::test]
    async fn completed_without_winner_stops() {
        let (engine, _clock) = engine();
        let id = running(&engine, ab("cta")).await;
        engine.complete(id).await.unwrap();

        let results = engine.get_results(id).await.unwrap();
        assert_eq!(results.status, ExperimentStatus::Completed);
        assert_eq!(results.recommendation, Recommendation::Stop);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_agree() {
        let (engine, _clock) = engine();
        running(&engine, ab("cta")).await;

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.get_variant("racer", "cta").await })
            })
            .collect();

        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap());
        }
        seen.dedup();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_some());
    }

    #[tokio::test]
    async fn list_returns_all() {
        let (engine, _clock) = engine();
        engine.create_experiment(ab("one")).await.unwrap();
        engine.create_experiment(ab("two")).await.unwrap();
        assert_eq!(engine.list_experiments().await.unwrap().len(), 2);
    }
}
