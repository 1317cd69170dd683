//! Platform configuration
//!
//! One [`PlatformConfig`] holds a section per component. Every section has
//! serde defaults, so a TOML file only needs to mention what it overrides:
//!
//! ```toml
//! [quota.free]
//! hourly = 20
//!
//! [telemetry]
//! filter = "aps=debug,info"
//! format = "json"
//! ```

use crate::error::ConfigError;
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the log filter
pub const ENV_LOG_FILTER: &str = "APS_LOG";

/// Environment variable overriding the log format (`pretty` or `json`)
pub const ENV_LOG_FORMAT: &str = "APS_LOG_FORMAT";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Quota limits
    pub quota: QuotaConfig,
    /// Retry behavior
    pub retry: RetryConfig,
    /// Tiered cache
    pub cache: CacheConfig,
    /// Behavior predictor
    pub predictor: PredictorConfig,
    /// Experiment engine
    pub experiments: ExperimentSettings,
    /// Logging
    pub telemetry: TelemetryConfig,
}

impl PlatformConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text and validate it
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on malformed TOML and
    /// `ConfigError::InvalidValue` when a value violates a constraint.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise the
    /// same errors as [`PlatformConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `APS_LOG` / `APS_LOG_FORMAT` overrides
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var(ENV_LOG_FILTER) {
            if !filter.trim().is_empty() {
                self.telemetry.filter = filter;
            }
        }
        if let Ok(format) = std::env::var(ENV_LOG_FORMAT) {
            match format.trim().to_ascii_lowercase().as_str() {
                "json" => self.telemetry.format = LogFormat::Json,
                "pretty" => self.telemetry.format = LogFormat::Pretty,
                _ => {}
            }
        }
        self
    }

    /// With quota section
    #[inline]
    #[must_use]
    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    /// With retry section
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With cache section
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// With predictor section
    #[inline]
    #[must_use]
    pub fn with_predictor(mut self, predictor: PredictorConfig) -> Self {
        self.predictor = predictor;
        self
    }

    /// With experiment section
    #[inline]
    #[must_use]
    pub fn with_experiments(mut self, experiments: ExperimentSettings) -> Self {
        self.experiments = experiments;
        self
    }

    /// Check every section
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quota.validate()?;
        self.retry.validate()?;
        self.cache.validate()?;
        self.predictor.validate()?;
        self.experiments.validate()
    }
}

/// Hourly and daily request limits for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Requests per calendar hour
    pub hourly: u32,
    /// Requests per calendar day
    pub daily: u32,
}

impl TierLimits {
    /// Create tier limits
    #[inline]
    #[must_use]
    pub const fn new(hourly: u32, daily: u32) -> Self {
        Self { hourly, daily }
    }
}

/// Quota configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Free tier limits
    pub free: TierLimits,
    /// Premium tier limits
    pub premium: TierLimits,
    /// Ultimate tier limits
    pub ultimate: TierLimits,
    /// How often elapsed windows are reaped
    pub sweep_interval_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free: TierLimits::new(10, 50),
            premium: TierLimits::new(100, 1000),
            ultimate: TierLimits::new(500, 10_000),
            sweep_interval_secs: 3600,
        }
    }
}

impl QuotaConfig {
    /// Limits for a tier
    #[inline]
    #[must_use]
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Premium => self.premium,
            Tier::Ultimate => self.ultimate,
        }
    }

    /// Sweep interval
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for tier in Tier::ALL {
            let limits = self.limits(tier);
            if limits.hourly == 0 || limits.daily == 0 {
                return Err(ConfigError::invalid(
                    format!("quota.{tier}"),
                    "limits must be greater than zero",
                ));
            }
            if limits.hourly > limits.daily {
                return Err(ConfigError::invalid(
                    format!("quota.{tier}.hourly"),
                    "hourly limit cannot exceed daily limit",
                ));
            }
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "quota.sweep_interval_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_retries: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Randomize delays to spread out retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt count
    #[inline]
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// With base delay
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid(
                "retry.max_retries",
                "at least one attempt is required",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "cannot be smaller than base_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Tiered cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when a caller does not pick one
    pub default_ttl_secs: u64,
    /// Maximum entries held by the in-process remote tier
    pub remote_capacity: u64,
    /// How often expired local entries are reaped
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            remote_capacity: 100_000,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Default TTL
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Sweep interval
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "cache.default_ttl_secs",
                "must be greater than zero",
            ));
        }
        if self.remote_capacity == 0 {
            return Err(ConfigError::invalid(
                "cache.remote_capacity",
                "must be greater than zero",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "cache.sweep_interval_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Behavior predictor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Events retained per subject
    pub history_capacity: usize,
    /// Events required before predicting
    pub min_events: usize,
    /// Most recent events used for page transitions
    pub transition_window: usize,
    /// Next actions kept in a prediction
    pub max_next_actions: usize,
    /// Recommended items kept in a prediction
    pub max_recommendations: usize,
    /// Mean duration above which engagement is high
    pub high_engagement_ms: u64,
    /// Mean duration above which engagement is medium
    pub medium_engagement_ms: u64,
    /// Probability given to the `generate` action for engaged subjects
    pub generate_boost: f64,
    /// Relevance above which recommended content is preloaded
    pub preload_threshold: f64,
    /// Whether preloads are scheduled at all
    pub preload_enabled: bool,
    /// Subjects idle for longer than this are dropped
    pub idle_after_secs: u64,
    /// How often idle subjects are swept
    pub sweep_interval_secs: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            min_events: 3,
            transition_window: 10,
            max_next_actions: 5,
            max_recommendations: 10,
            high_engagement_ms: 30_000,
            medium_engagement_ms: 15_000,
            generate_boost: 0.7,
            preload_threshold: 0.5,
            preload_enabled: true,
            idle_after_secs: 3600,
            sweep_interval_secs: 600,
        }
    }
}

impl PredictorConfig {
    /// Idle cutoff
    #[inline]
    #[must_use]
    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }

    /// Sweep interval
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::invalid(
                "predictor.history_capacity",
                "must be greater than zero",
            ));
        }
        if self.min_events < 2 {
            return Err(ConfigError::invalid(
                "predictor.min_events",
                "at least two events are needed to observe a transition",
            ));
        }
        if self.medium_engagement_ms >= self.high_engagement_ms {
            return Err(ConfigError::invalid(
                "predictor.medium_engagement_ms",
                "must be below high_engagement_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.generate_boost)
            || !(0.0..=1.0).contains(&self.preload_threshold)
        {
            return Err(ConfigError::invalid(
                "predictor",
                "probabilities must lie in [0, 1]",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "predictor.sweep_interval_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Longest experiment the engine accepts, in days
pub const MAX_EXPERIMENT_DAYS: u32 = 3650;

/// Experiment engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Maximum age of the cached running-experiment set
    pub refresh_interval_secs: u64,
    /// Users each variant needs before results count as significant
    pub min_sample_per_variant: u64,
    /// Total users below which an underpowered test keeps running
    pub min_total_sample: u64,
    /// Duration used when an experiment does not specify one
    pub default_duration_days: u32,
    /// Allowed deviation of the allocation sum from 100
    pub allocation_tolerance: f64,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            min_sample_per_variant: 100,
            min_total_sample: 500,
            default_duration_days: 14,
            allocation_tolerance: 0.1,
        }
    }
}

impl ExperimentSettings {
    /// Refresh interval
    #[inline]
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_duration_days == 0 {
            return Err(ConfigError::invalid(
                "experiments.default_duration_days",
                "must be greater than zero",
            ));
        }
        if self.default_duration_days > MAX_EXPERIMENT_DAYS {
            return Err(ConfigError::invalid(
                "experiments.default_duration_days",
                format!("cannot exceed {MAX_EXPERIMENT_DAYS}"),
            ));
        }
        if self.allocation_tolerance < 0.0 {
            return Err(ConfigError::invalid(
                "experiments.allocation_tolerance",
                "cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive string
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_tier_table() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.limits(Tier::Free), TierLimits::new(10, 50));
        assert_eq!(quota.limits(Tier::Premium), TierLimits::new(100, 1000));
        assert_eq!(quota.limits(Tier::Ultimate), TierLimits::new(500, 10_000));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PlatformConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PlatformConfig::from_toml_str(
            r#"
            [quota.free]
            hourly = 20
            daily = 100

            [retry]
            max_retries = 5

            [telemetry]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.quota.free, TierLimits::new(20, 100));
        assert_eq!(config.quota.premium, TierLimits::new(100, 1000));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.telemetry.format, LogFormat::Json);
        assert_eq!(config.predictor, PredictorConfig::default());
    }

    #[test]
    fn zero_limit_rejected() {
        let err = PlatformConfig::from_toml_str(
            r#"
            [quota.premium]
            hourly = 0
            daily = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn hourly_above_daily_rejected() {
        let quota = QuotaConfig {
            free: TierLimits::new(60, 50),
            ..Default::default()
        };
        assert!(PlatformConfig::default().with_quota(quota).validate().is_err());
    }

    #[test]
    fn inverted_engagement_thresholds_rejected() {
        let predictor = PredictorConfig {
            medium_engagement_ms: 40_000,
            ..Default::default()
        };
        assert!(PlatformConfig::default()
            .with_predictor(predictor)
            .validate()
            .is_err());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = PlatformConfig::from_toml_str("[quota\nfree = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn experiment_duration_is_bounded() {
        let err = PlatformConfig::from_toml_str("[experiments]\ndefault_duration_days = 4000000000")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(PlatformConfig::from_toml_str("[experiments]\ndefault_duration_days = 3650").is_ok());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aps.toml");
        std::fs::write(&path, "[cache]\ndefault_ttl_secs = 60\n").unwrap();

        let config = PlatformConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PlatformConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn retry_builder() {
        let retry = RetryConfig::with_retries(4)
            .with_base_delay(Duration::from_millis(10))
            .with_jitter(true);
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.base_delay(), Duration::from_millis(10));
        assert!(retry.jitter);
    }
}
