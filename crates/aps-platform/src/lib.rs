//! APS Platform - component facade
//!
//! Wires the quota governor, retry executor, tiered cache, behavior
//! predictor and experiment engine together on one clock, and provides a
//! seeded workload simulator used by the `aps-sim` binary.
//!
//! # Example
//!
//! ```rust
//! use aps_cache::MokaRemoteTier;
//! use aps_core::{system_clock, PlatformConfig, Tier};
//! use aps_experiment::MemoryExperimentStore;
//! use aps_platform::{PlatformServices, SyntheticContent};
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! rt.block_on(async {
//!     let services = PlatformServices::from_config(
//!         PlatformConfig::default(),
//!         Arc::new(MokaRemoteTier::new(1_000, system_clock())),
//!         Arc::new(SyntheticContent),
//!         Arc::new(MemoryExperimentStore::new()),
//!     )
//!     .unwrap();
//!
//!     let design: Value = services
//!         .guarded_fetch("user-1", Tier::Free, "design:1", Duration::from_secs(60), || async {
//!             Ok(json!({ "title": "poster" }))
//!         })
//!         .await
//!         .unwrap();
//!     assert_eq!(design["title"], "poster");
//! });
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod services;
pub mod simulator;

pub use error::{PlatformError, PlatformResult};
pub use services::PlatformServices;
pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, SyntheticContent, Violation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
