//! Behavior predictor
//!
//! Tracks events per subject, recomputes a [`Prediction`] on every event
//! once enough history exists, and schedules speculative cache preloads for
//! the content the subject is most likely to want next.

use crate::analysis;
use crate::event::BehaviorEvent;
use crate::history::SubjectHistory;
use crate::loader::ContentLoader;
use crate::prediction::{Prediction, RecommendedContent};
use aps_cache::TieredCache;
use aps_core::clock::{saturating_add, saturating_sub};
use aps_core::{spawn_periodic, system_clock, PredictorConfig, SharedClock};
use dashmap::DashMap;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Upper bound on cached predictions
const PREDICTION_CAPACITY: u64 = 100_000;

/// Predictor statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictorStats {
    /// Subjects with retained history
    pub tracked_subjects: usize,
    /// Preload tasks spawned
    pub preloads_scheduled: u64,
    /// Items loaded into the cache by preloads
    pub preloads_warmed: u64,
    /// Items whose load failed
    pub preloads_failed: u64,
    /// Preload tasks dropped because the subject was swept
    pub preloads_skipped: u64,
    /// Preload tasks that panicked
    pub preloads_panicked: u64,
}

#[derive(Debug, Default)]
struct PreloadCounters {
    scheduled: AtomicU64,
    warmed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
}

impl PreloadCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Expires cached predictions after their strategy's TTL
struct PredictionExpiry;

impl Expiry<String, Arc<Prediction>> for PredictionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<Prediction>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.cache_strategy.ttl())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<Prediction>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.cache_strategy.ttl())
    }
}

/// Per-subject behavior tracking and prediction
#[derive(Debug)]
pub struct BehaviorPredictor {
    config: PredictorConfig,
    histories: Arc<DashMap<String, SubjectHistory>>,
    predictions: moka::sync::Cache<String, Arc<Prediction>>,
    cache: Arc<TieredCache>,
    loader: Arc<dyn ContentLoader>,
    clock: SharedClock,
    counters: Arc<PreloadCounters>,
}

impl BehaviorPredictor {
    /// Create predictor on the system clock
    #[must_use]
    pub fn new(config: PredictorConfig, cache: Arc<TieredCache>, loader: Arc<dyn ContentLoader>) -> Self {
        Self::with_clock(config, cache, loader, system_clock())
    }

    /// Create predictor on a specific clock
    #[must_use]
    pub fn with_clock(
        config: PredictorConfig,
        cache: Arc<TieredCache>,
        loader: Arc<dyn ContentLoader>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            histories: Arc::new(DashMap::new()),
            predictions: moka::sync::Cache::builder()
                .max_capacity(PREDICTION_CAPACITY)
                .expire_after(PredictionExpiry)
                .build(),
            cache,
            loader,
            clock,
            counters: Arc::new(PreloadCounters::default()),
        }
    }

    /// Record an event
    ///
    /// Once the subject has enough history the prediction is recomputed and
    /// a preload is scheduled. Returns immediately and never fails; preloads
    /// need a tokio runtime and are skipped without one.
    pub fn track(&self, event: BehaviorEvent) {
        let now = self.clock.now();
        let subject_id = event.subject_id.clone();

        let prediction = {
            let mut history = self
                .histories
                .entry(subject_id.clone())
                .or_insert_with(|| SubjectHistory::new(self.config.history_capacity, now));
            history.push(event, now);
            (history.len() >= self.config.min_events)
                .then(|| analysis::predict(&subject_id, history.events(), &self.config, now))
        };

        let Some(prediction) = prediction else {
            return;
        };
        tracing::debug!(
            subject = %subject_id,
            engagement = ?prediction.engagement,
            next_actions = prediction.next_actions.len(),
            recommendations = prediction.recommended_content.len(),
            "prediction updated"
        );

        self.schedule_preload(&prediction);
        self.predictions.insert(subject_id, Arc::new(prediction));
    }

    /// Latest live prediction for a subject
    pub fn prediction(&self, subject_id: &str) -> Option<Prediction> {
        let cached = self.predictions.get(subject_id)?;
        let expires_at = saturating_add(cached.generated_at, cached.cache_strategy.ttl());
        if self.clock.now() >= expires_at {
            self.predictions.invalidate(subject_id);
            return None;
        }
        Some(Prediction::clone(&cached))
    }

    /// Events retained for a subject
    #[must_use]
    pub fn history_len(&self, subject_id: &str) -> usize {
        self.histories.get(subject_id).map_or(0, |h| h.len())
    }

    /// Drop subjects with no event within the idle window
    pub fn sweep_idle(&self) -> usize {
        let cutoff = saturating_sub(self.clock.now(), self.config.idle_after());
        let mut dropped = Vec::new();
        self.histories.retain(|subject, history| {
            let keep = history.last_seen() >= cutoff;
            if !keep {
                dropped.push(subject.clone());
            }
            keep
        });

        for subject in &dropped {
            self.predictions.invalidate(subject);
        }
        if !dropped.is_empty() {
            tracing::info!(dropped = dropped.len(), "swept idle subjects");
        }
        dropped.len()
    }

    /// Run [`Self::sweep_idle`] on the configured interval
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        spawn_periodic(self, self.config.sweep_interval(), "predictor", |predictor| {
            predictor.sweep_idle();
        })
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> PredictorStats {
        PredictorStats {
            tracked_subjects: self.histories.len(),
            preloads_scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            preloads_warmed: self.counters.warmed.load(Ordering::Relaxed),
            preloads_failed: self.counters.failed.load(Ordering::Relaxed),
            preloads_skipped: self.counters.skipped.load(Ordering::Relaxed),
            preloads_panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    fn schedule_preload(&self, prediction: &Prediction) {
        if !self.config.preload_enabled {
            return;
        }
        let items: Vec<RecommendedContent> = prediction
            .recommended_content
            .iter()
            .filter(|item| item.relevance_score > self.config.preload_threshold)
            .cloned()
            .collect();
        if items.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(subject = %prediction.subject_id, "no runtime, preload skipped");
            return;
        };

        let job = PreloadJob {
            subject_id: prediction.subject_id.clone(),
            items,
            ttl: prediction.cache_strategy.ttl(),
            delay: prediction.cache_strategy.preload_delay(),
            histories: Arc::clone(&self.histories),
            cache: Arc::clone(&self.cache),
            loader: Arc::clone(&self.loader),
            counters: Arc::clone(&self.counters),
        };
        PreloadCounters::bump(&self.counters.scheduled);

        let subject_id = job.subject_id.clone();
        let counters = Arc::clone(&self.counters);
        let task = runtime.spawn(job.run());
        runtime.spawn(async move {
            if let Err(err) = task.await {
                if err.is_panic() {
                    PreloadCounters::bump(&counters.panicked);
                    tracing::error!(subject = %subject_id, "preload task panicked");
                }
            }
        });
    }
}

/// One scheduled preload, owned by its task
struct PreloadJob {
    subject_id: String,
    items: Vec<RecommendedContent>,
    ttl: Duration,
    delay: Duration,
    histories: Arc<DashMap<String, SubjectHistory>>,
    cache: Arc<TieredCache>,
    loader: Arc<dyn ContentLoader>,
    counters: Arc<PreloadCounters>,
}

impl PreloadJob {
    async fn run(self) {
        tokio::time::sleep(self.delay).await;

        if !self.histories.contains_key(&self.subject_id) {
            PreloadCounters::bump(&self.counters.skipped);
            tracing::debug!(subject = %self.subject_id, "subject swept before preload");
            return;
        }

        for item in &self.items {
            let loader = Arc::clone(&self.loader);
            let loaded = self
                .cache
                .get_or_set(&item.cache_key, || async move { loader.load(item).await }, self.ttl)
                .await;
            match loaded {
                Ok(_) => PreloadCounters::bump(&self.counters.warmed),
                Err(err) => {
                    PreloadCounters::bump(&self.counters.failed);
                    tracing::warn!(
                        subject = %self.subject_id,
                        key = %item.cache_key,
                        error = %err,
                        "preload failed"
                    );
                }
            }
        }
    }
}
