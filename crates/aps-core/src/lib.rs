//! APS Core - shared kernel for the adaptive platform services
//!
//! Provides the pieces every component depends on:
//! - Error taxonomy (client vs transient) and the [`Classify`] trait
//! - [`Clock`] abstraction with system and manual implementations
//! - [`PlatformConfig`] with per-component sections, loaded from TOML
//! - Tracing subscriber setup
//!
//! # Example
//!
//! ```rust
//! use aps_core::{PlatformConfig, Tier};
//!
//! let config = PlatformConfig::new();
//! assert_eq!(config.quota.limits(Tier::Free).hourly, 10);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod telemetry;
pub mod types;

// Re-exports for convenience
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    CacheConfig, ExperimentSettings, LogFormat, PlatformConfig, PredictorConfig, QuotaConfig,
    RetryConfig, TelemetryConfig, TierLimits, MAX_EXPERIMENT_DAYS,
};
pub use error::{Classify, ConfigError, ErrorClass, ServiceError, ServiceResult};
pub use maintenance::spawn_periodic;
pub use telemetry::init_tracing;
pub use types::{Priority, Tier};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for APS components
    pub use crate::{
        Classify, Clock, ErrorClass, PlatformConfig, Priority, ServiceError, ServiceResult,
        SharedClock, Tier,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
