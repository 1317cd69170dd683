//! Testing utilities for APS workspace
//!
//! Fault-injecting collaborators, fixtures and builders shared by the
//! integration tests of every crate.

#![allow(missing_docs)]

use aps_cache::{CacheEntry, CacheError, GlobPattern, MokaRemoteTier, RemoteTier, TieredCache};
use aps_core::{CacheConfig, ManualClock, ServiceError};
use aps_experiment::{
    Assignment, Experiment, ExperimentConfig, ExperimentError, ExperimentEvent, ExperimentId,
    ExperimentStore, MemoryExperimentStore,
};
use aps_predictor::{Action, BehaviorEvent, ContentLoader, RecommendedContent};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn manual_clock() -> ManualClock {
    ManualClock::at_epoch()
}

/// Tiered cache over `remote`, on `clock`, with default settings
pub fn tiered_cache(remote: Arc<dyn RemoteTier>, clock: &ManualClock) -> Arc<TieredCache> {
    Arc::new(TieredCache::with_clock(remote, CacheConfig::default(), clock.shared()))
}

/// Remote tier that can be switched into failure
#[derive(Debug)]
pub struct FlakyRemoteTier {
    inner: MokaRemoteTier,
    failing: AtomicBool,
    rejected: AtomicUsize,
}

impl FlakyRemoteTier {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            inner: MokaRemoteTier::new(10_000, clock.shared()),
            failing: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Tier that fails every call until switched back
    pub fn unavailable(clock: &ManualClock) -> Self {
        let tier = Self::new(clock);
        tier.set_failing(true);
        tier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls rejected while failing
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Direct access to the stored entries, bypassing failure injection
    pub fn inner(&self) -> &MokaRemoteTier {
        &self.inner
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::RemoteUnavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteTier for FlakyRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<Vec<String>, CacheError> {
        self.check()?;
        self.inner.delete_matching(pattern).await
    }
}

/// Content loader answering from a fixed table
///
/// Unknown items load as `{"kind": .., "id": ..}`.
#[derive(Debug, Default)]
pub struct ScriptedLoader {
    payloads: Mutex<HashMap<String, Value>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(self, cache_key: impl Into<String>, payload: Value) -> Self {
        self.payloads.lock().insert(cache_key.into(), payload);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentLoader for ScriptedLoader {
    async fn load(&self, item: &RecommendedContent) -> Result<Value, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::transient("content store unavailable"));
        }
        Ok(self
            .payloads
            .lock()
            .get(&item.cache_key)
            .cloned()
            .unwrap_or_else(|| json!({ "kind": item.kind, "id": item.id })))
    }
}

/// Experiment store that can be switched into failure or slowed down
#[derive(Debug, Default)]
pub struct FlakyExperimentStore {
    inner: MemoryExperimentStore,
    failing: AtomicBool,
    read_delay: Mutex<Duration>,
}

impl FlakyExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied before experiment reads return
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    async fn slow_read(&self) {
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(&self) -> Result<(), ExperimentError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ExperimentError::store("injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExperimentStore for FlakyExperimentStore {
    async fn insert_experiment(&self, experiment: Experiment) -> Result<(), ExperimentError> {
        self.check()?;
        self.inner.insert_experiment(experiment).await
    }

    async fn update_experiment(&self, experiment: Experiment) -> Result<(), ExperimentError> {
        self.check()?;
        self.inner.update_experiment(experiment).await
    }

    async fn experiment(&self, id: ExperimentId) -> Result<Option<Experiment>, ExperimentError> {
        self.check()?;
        let found = self.inner.experiment(id).await;
        self.slow_read().await;
        found
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>, ExperimentError> {
        self.check()?;
        let listed = self.inner.list_experiments().await;
        self.slow_read().await;
        listed
    }

    async fn assignment(
        &self,
        experiment_id: ExperimentId,
        subject_id: &str,
    ) -> Result<Option<Assignment>, ExperimentError> {
        self.check()?;
        self.inner.assignment(experiment_id, subject_id).await
    }

    async fn insert_assignment_if_absent(
        &self,
        assignment: Assignment,
    ) -> Result<Assignment, ExperimentError> {
        self.check()?;
        self.inner.insert_assignment_if_absent(assignment).await
    }

    async fn assignments(&self, experiment_id: ExperimentId) -> Result<Vec<Assignment>, ExperimentError> {
        self.check()?;
        self.inner.assignments(experiment_id).await
    }

    async fn append_event(&self, event: ExperimentEvent) -> Result<(), ExperimentError> {
        self.check()?;
        self.inner.append_event(event).await
    }

    async fn events(&self, experiment_id: ExperimentId) -> Result<Vec<ExperimentEvent>, ExperimentError> {
        self.check()?;
        self.inner.events(experiment_id).await
    }
}

/// Two-variant definition, `control` first
pub fn ab_config(name: &str) -> ExperimentConfig {
    ExperimentConfig::new(name)
        .with_variant("control", json!({}))
        .with_variant("treatment", json!({ "variant": "treatment" }))
}

/// View event on `page`, stamped at `clock`'s time
pub fn view(clock: &ManualClock, subject: &str, page: &str, duration_ms: u64) -> BehaviorEvent {
    use aps_core::Clock;
    BehaviorEvent::new(subject, format!("{subject}-session"), Action::View, page)
        .at(clock.now())
        .with_duration_ms(duration_ms)
}

/// One view per page, all carrying the same `style`
pub fn styled_session(
    clock: &ManualClock,
    subject: &str,
    pages: &[&str],
    duration_ms: u64,
    style: &str,
) -> Vec<BehaviorEvent> {
    pages
        .iter()
        .map(|page| view(clock, subject, page, duration_ms).with_meta("style", json!(style)))
        .collect()
}
