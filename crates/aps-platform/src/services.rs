//! Component wiring
//!
//! [`PlatformServices`] owns one instance of every component, all reading
//! the same clock, and exposes the one composite operation callers need
//! most: a quota-guarded, cached, retried fetch.

use crate::error::{PlatformError, PlatformResult};
use aps_cache::{RemoteTier, TieredCache};
use aps_core::{system_clock, PlatformConfig, ServiceError, SharedClock, Tier};
use aps_experiment::{ExperimentEngine, ExperimentStore};
use aps_predictor::{BehaviorPredictor, ContentLoader};
use aps_quota::{QuotaDecision, QuotaGovernor};
use aps_retry::RetryExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Every platform component, built from one configuration
#[derive(Debug)]
pub struct PlatformServices {
    config: PlatformConfig,
    clock: SharedClock,
    quota: Arc<QuotaGovernor>,
    retry: RetryExecutor,
    cache: Arc<TieredCache>,
    predictor: Arc<BehaviorPredictor>,
    experiments: Arc<ExperimentEngine>,
}

impl PlatformServices {
    /// Build on the system clock
    ///
    /// # Errors
    /// `Config` when the configuration does not validate.
    pub fn from_config(
        config: PlatformConfig,
        remote: Arc<dyn RemoteTier>,
        loader: Arc<dyn ContentLoader>,
        store: Arc<dyn ExperimentStore>,
    ) -> PlatformResult<Self> {
        Self::with_clock(config, remote, loader, store, system_clock())
    }

    /// Build on a specific clock
    ///
    /// # Errors
    /// `Config` when the configuration does not validate.
    pub fn with_clock(
        config: PlatformConfig,
        remote: Arc<dyn RemoteTier>,
        loader: Arc<dyn ContentLoader>,
        store: Arc<dyn ExperimentStore>,
        clock: SharedClock,
    ) -> PlatformResult<Self> {
        config.validate()?;

        let quota = Arc::new(QuotaGovernor::with_clock(config.quota.clone(), Arc::clone(&clock)));
        let retry = RetryExecutor::new(config.retry.clone());
        let cache = Arc::new(TieredCache::with_clock(
            remote,
            config.cache.clone(),
            Arc::clone(&clock),
        ));
        let predictor = Arc::new(BehaviorPredictor::with_clock(
            config.predictor.clone(),
            Arc::clone(&cache),
            loader,
            Arc::clone(&clock),
        ));
        let experiments = Arc::new(ExperimentEngine::with_clock(
            store,
            config.experiments.clone(),
            Arc::clone(&clock),
        ));

        tracing::info!(
            cache_ttl_secs = config.cache.default_ttl_secs,
            retries = config.retry.max_retries,
            "platform services ready"
        );

        Ok(Self {
            config,
            clock,
            quota,
            retry,
            cache,
            predictor,
            experiments,
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Shared clock
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Quota governor
    #[inline]
    #[must_use]
    pub fn quota(&self) -> &Arc<QuotaGovernor> {
        &self.quota
    }

    /// Retry executor
    #[inline]
    #[must_use]
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Tiered cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Behavior predictor
    #[inline]
    #[must_use]
    pub fn predictor(&self) -> &Arc<BehaviorPredictor> {
        &self.predictor
    }

    /// Experiment engine
    #[inline]
    #[must_use]
    pub fn experiments(&self) -> &Arc<ExperimentEngine> {
        &self.experiments
    }

    /// Fetch `key` for a subject, charging its quota
    ///
    /// The quota is consumed before the cache is consulted, so hits count
    /// too. On a miss `op` runs under the retry policy and its value is
    /// cached for `ttl`.
    ///
    /// # Errors
    /// `QuotaExceeded` when the subject is out of requests, otherwise the
    /// error `op` finally failed with.
    pub async fn guarded_fetch<T, F, Fut>(
        &self,
        subject_id: &str,
        tier: Tier,
        key: &str,
        ttl: Duration,
        op: F,
    ) -> PlatformResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        if let QuotaDecision::Denied {
            window,
            reset_at,
            message,
        } = self.quota.try_consume(subject_id, tier)
        {
            return Err(PlatformError::QuotaExceeded {
                window,
                reset_at,
                message,
            });
        }

        let retry = &self.retry;
        let value = self
            .cache
            .get_or_set(key, move || retry.execute(op), ttl)
            .await?;
        Ok(value)
    }

    /// Start every periodic sweeper
    ///
    /// Each task stops on its own once its component is dropped.
    #[must_use]
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.quota.spawn_sweeper(self.config.quota.sweep_interval()),
            self.cache.spawn_sweeper(),
            self.predictor.spawn_sweeper(),
        ]
    }
}
