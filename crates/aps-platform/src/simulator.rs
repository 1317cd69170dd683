//! Seeded synthetic workload
//!
//! Drives a mix of guarded fetches, behavior events and experiment traffic
//! through [`PlatformServices`] on a manual clock, one simulated second per
//! step, and checks the cross-component guarantees as it goes:
//!
//! - no subject is ever admitted past its hourly quota
//! - a subject's variant never changes once assigned
//! - a served value is the value its key was fetched with

use crate::error::{PlatformError, PlatformResult};
use crate::services::PlatformServices;
use aps_cache::{CacheStats, MokaRemoteTier};
use aps_core::{Clock, ConfigError, ManualClock, PlatformConfig, RetryConfig, ServiceError, Tier};
use aps_experiment::{ExperimentConfig, ExperimentResult, MemoryExperimentStore, TrackOutcome};
use aps_predictor::{Action, BehaviorEvent, ContentLoader, PredictorStats, RecommendedContent};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Experiment every simulated subject is enrolled in
pub const EXPERIMENT: &str = "gallery-layout";

const DESIGNS: u32 = 40;
const PAGES: [&str; 5] = ["home", "gallery", "editor", "preview", "checkout"];
const STYLES: [&str; 4] = ["minimal", "retro", "neon", "pastel"];
const FETCH_TTL: Duration = Duration::from_secs(600);

/// Simulator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Distinct subjects
    pub subjects: u32,
    /// Steps to run, one simulated second each
    pub events: u64,
    /// Chance that a fetch meets transient upstream failures
    pub failure_rate: f64,
    /// Platform configuration under test
    pub platform: PlatformConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            subjects: 50,
            events: 2_000,
            failure_rate: 0.2,
            platform: PlatformConfig::default().with_retry(RetryConfig {
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 10,
                jitter: false,
            }),
        }
    }
}

/// Broken guarantee observed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// More requests admitted in one hour than the tier allows
    QuotaOverrun {
        /// Subject
        subject: String,
        /// Requests admitted
        admitted: u32,
        /// Hourly limit
        limit: u32,
    },
    /// Variant differed from the first one served
    AssignmentChanged {
        /// Subject
        subject: String,
        /// First variant
        first: String,
        /// Later variant
        later: String,
    },
    /// Fetch served a value belonging to another key
    CacheMismatch {
        /// Key fetched
        key: String,
    },
}

/// Counters collected by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Guarded fetches attempted
    pub fetches: u64,
    /// Fetches that returned a value
    pub fetches_served: u64,
    /// Fetches rejected by quota
    pub quota_denied: u64,
    /// Fetches that failed after retries
    pub fetches_failed: u64,
    /// Calls that reached the synthetic upstream
    pub upstream_calls: u64,
    /// Behavior events tracked
    pub behavior_events: u64,
    /// Subjects holding a live prediction at the end
    pub predictions_live: u64,
    /// Subjects enrolled in the experiment
    pub assignments: u64,
    /// Conversions stored
    pub conversions_recorded: u64,
    /// Conversions not stored
    pub conversions_dropped: u64,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Driver counters
    pub stats: SimulatorStats,
    /// Cache counters
    pub cache: CacheStats,
    /// Predictor counters
    pub predictor: PredictorStats,
    /// Experiment analysis at the end of the run
    pub experiment: ExperimentResult,
    /// Guarantees found broken
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether every guarantee held
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let stats = &self.stats;

        report.push_str("=== APS Simulation Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Subjects: {}\n", self.config.subjects));
        report.push_str(&format!("Steps: {}\n\n", self.config.events));

        report.push_str("Fetches\n");
        report.push_str(&format!("  Attempted: {}\n", stats.fetches));
        report.push_str(&format!("  Served: {}\n", stats.fetches_served));
        report.push_str(&format!("  Quota denied: {}\n", stats.quota_denied));
        report.push_str(&format!("  Failed after retries: {}\n", stats.fetches_failed));
        report.push_str(&format!("  Upstream calls: {}\n", stats.upstream_calls));
        report.push_str(&format!(
            "  Cache hit rate: {:.1}% ({} remote, {} local, {} misses)\n\n",
            self.cache.hit_rate() * 100.0,
            self.cache.remote_hits,
            self.cache.local_hits,
            self.cache.misses
        ));

        report.push_str("Prediction\n");
        report.push_str(&format!("  Events tracked: {}\n", stats.behavior_events));
        report.push_str(&format!("  Live predictions: {}\n", stats.predictions_live));
        report.push_str(&format!("  Preloads scheduled: {}\n\n", self.predictor.preloads_scheduled));

        report.push_str(&format!("Experiment `{}`\n", self.experiment.name));
        report.push_str(&format!("  Enrolled: {}\n", stats.assignments));
        report.push_str(&format!(
            "  Conversions: {} recorded, {} dropped\n",
            stats.conversions_recorded, stats.conversions_dropped
        ));
        for variant in &self.experiment.variants {
            let converted = variant.users_with_event.get("conversion").copied().unwrap_or(0);
            report.push_str(&format!(
                "  {}: {} users, {} converted\n",
                variant.variant, variant.assigned_users, converted
            ));
        }
        report.push_str(&format!("  Recommendation: {:?}\n", self.experiment.recommendation));
        if let Some(winner) = &self.experiment.winning_variant {
            report.push_str(&format!("  Winner: {winner}\n"));
        }

        report.push_str(&format!("\nViolations: {}\n", self.violations.len()));
        for (i, v) in self.violations.iter().enumerate() {
            report.push_str(&format!("{}. {:?}\n", i + 1, v));
        }
        report
    }
}

/// Content loader producing a synthetic payload per item
#[derive(Debug, Default)]
pub struct SyntheticContent;

#[async_trait]
impl ContentLoader for SyntheticContent {
    async fn load(&self, item: &RecommendedContent) -> Result<Value, ServiceError> {
        Ok(json!({ "kind": item.kind, "id": item.id, "synthetic": true }))
    }
}

/// Run the workload described by `config`
///
/// # Errors
/// `Config` for an unusable configuration; `Experiment` if the simulated
/// experiment cannot be set up or analysed.
pub async fn run_simulator(config: SimulatorConfig) -> PlatformResult<SimulatorReport> {
    if config.subjects == 0 {
        return Err(ConfigError::invalid("simulate.subjects", "must be greater than zero").into());
    }
    if !(0.0..=1.0).contains(&config.failure_rate) {
        return Err(ConfigError::invalid("simulate.failure_rate", "must be within 0..=1").into());
    }

    let clock = ManualClock::at_epoch();
    let services = PlatformServices::with_clock(
        config.platform.clone(),
        Arc::new(MokaRemoteTier::new(config.platform.cache.remote_capacity, clock.shared())),
        Arc::new(SyntheticContent),
        Arc::new(MemoryExperimentStore::new()),
        clock.shared(),
    )?;

    let experiment_id = services
        .experiments()
        .create_experiment(
            ExperimentConfig::new(EXPERIMENT)
                .with_description("grid vs masonry gallery")
                .with_variant("grid", json!({ "layout": "grid" }))
                .with_variant("masonry", json!({ "layout": "masonry" })),
        )
        .await?;
    services.experiments().start(experiment_id).await?;

    let mut driver = Driver {
        services: &services,
        clock: &clock,
        rng: StdRng::seed_from_u64(config.seed),
        failure_rate: config.failure_rate,
        max_failures: config.platform.retry.max_retries.max(1),
        stats: SimulatorStats::default(),
        admitted: HashMap::new(),
        assigned: HashMap::new(),
        violations: Vec::new(),
    };

    tracing::info!(seed = config.seed, subjects = config.subjects, steps = config.events, "simulation started");
    for _ in 0..config.events {
        clock.advance(Duration::from_secs(1));
        let subject = driver.rng.random_range(0..config.subjects);
        match driver.rng.random_range(0..4u8) {
            0 | 1 => driver.fetch(subject).await,
            2 => driver.behave(subject),
            _ => driver.experiment(subject).await,
        }
    }
    driver.check_quota();

    let mut stats = driver.stats;
    let violations = driver.violations;
    stats.predictions_live = (0..config.subjects)
        .filter(|s| services.predictor().prediction(&subject_name(*s)).is_some())
        .count() as u64;

    let experiment = services.experiments().get_results(experiment_id).await?;
    tracing::info!(violations = violations.len(), "simulation finished");

    Ok(SimulatorReport {
        cache: services.cache().stats(),
        predictor: services.predictor().stats(),
        config,
        stats,
        experiment,
        violations,
    })
}

fn subject_name(index: u32) -> String {
    format!("sim-{index}")
}

fn subject_tier(index: u32) -> Tier {
    Tier::ALL[index as usize % Tier::ALL.len()]
}

struct Driver<'a> {
    services: &'a PlatformServices,
    clock: &'a ManualClock,
    rng: StdRng,
    failure_rate: f64,
    max_failures: u32,
    stats: SimulatorStats,
    // (subject, hour) -> requests that got past the quota
    admitted: HashMap<(u32, i64), u32>,
    assigned: HashMap<u32, String>,
    violations: Vec<Violation>,
}

impl Driver<'_> {
    async fn fetch(&mut self, subject: u32) {
        let design = self.rng.random_range(0..DESIGNS);
        let failures = if self.rng.random_bool(self.failure_rate) {
            self.rng.random_range(1..=self.max_failures)
        } else {
            0
        };
        let key = format!("design:{design}");
        let expected = json!({ "design": design });
        let attempts = AtomicU32::new(0);

        self.stats.fetches += 1;
        let outcome: PlatformResult<Value> = self
            .services
            .guarded_fetch(&subject_name(subject), subject_tier(subject), &key, FETCH_TTL, || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed);
                let value = expected.clone();
                async move {
                    if attempt < failures {
                        Err(ServiceError::transient("synthetic upstream failure"))
                    } else {
                        Ok(value)
                    }
                }
            })
            .await;
        self.stats.upstream_calls += u64::from(attempts.load(Ordering::Relaxed));

        match outcome {
            Err(PlatformError::QuotaExceeded { .. }) => {
                self.stats.quota_denied += 1;
                return;
            }
            Ok(value) => {
                self.stats.fetches_served += 1;
                if value != expected {
                    self.violations.push(Violation::CacheMismatch { key });
                }
            }
            Err(err) => {
                self.stats.fetches_failed += 1;
                tracing::debug!(subject, error = %err, "fetch failed");
            }
        }

        let hour = self.clock.now().timestamp().div_euclid(3600);
        *self.admitted.entry((subject, hour)).or_default() += 1;
    }

    fn behave(&mut self, subject: u32) {
        let page = PAGES[self.rng.random_range(0..PAGES.len())];
        let duration_ms = self.rng.random_range(1_000..60_000);
        let name = subject_name(subject);
        let event = BehaviorEvent::new(name.clone(), format!("{name}-session"), Action::View, page)
            .at(self.clock.now())
            .with_duration_ms(duration_ms)
            .with_meta("style", json!(STYLES[subject as usize % STYLES.len()]));

        self.services.predictor().track(event);
        self.stats.behavior_events += 1;
    }

    async fn experiment(&mut self, subject: u32) {
        let name = subject_name(subject);
        let Some(variant) = self.services.experiments().get_variant(&name, EXPERIMENT).await else {
            return;
        };

        match self.assigned.entry(subject) {
            Entry::Vacant(vacant) => {
                self.stats.assignments += 1;
                vacant.insert(variant.clone());
            }
            Entry::Occupied(first) if *first.get() != variant => {
                self.violations.push(Violation::AssignmentChanged {
                    subject: name.clone(),
                    first: first.get().clone(),
                    later: variant.clone(),
                });
            }
            Entry::Occupied(_) => {}
        }

        let conversion_chance = if variant == "masonry" { 0.3 } else { 0.2 };
        if !self.rng.random_bool(conversion_chance) {
            return;
        }
        let outcome = self
            .services
            .experiments()
            .track_event(&name, EXPERIMENT, "conversion", json!({ "variant": variant }))
            .await;
        match outcome {
            TrackOutcome::Recorded => self.stats.conversions_recorded += 1,
            TrackOutcome::NotEnrolled | TrackOutcome::Dropped => self.stats.conversions_dropped += 1,
        }
    }

    fn check_quota(&mut self) {
        let quota = self.services.quota();
        let mut overruns: Vec<Violation> = self
            .admitted
            .iter()
            .filter_map(|(&(subject, _), &admitted)| {
                let limit = quota.limits(subject_tier(subject)).hourly;
                (admitted > limit).then(|| Violation::QuotaOverrun {
                    subject: subject_name(subject),
                    admitted,
                    limit,
                })
            })
            .collect();
        overruns.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        self.violations.extend(overruns);
    }
}
