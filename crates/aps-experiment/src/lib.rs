//! APS Experiment - A/B testing engine
//!
//! Provides:
//! - Experiment lifecycle (`draft -> running <-> paused -> completed`)
//! - Deterministic, sticky bucketing of subjects into variants
//! - Outcome tracking and online significance analysis
//!
//! # Example
//!
//! ```rust
//! use aps_core::ExperimentSettings;
//! use aps_experiment::{ExperimentConfig, ExperimentEngine, MemoryExperimentStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let engine = ExperimentEngine::new(
//!         Arc::new(MemoryExperimentStore::new()),
//!         ExperimentSettings::default(),
//!     );
//!     let id = engine
//!         .create_experiment(
//!             ExperimentConfig::new("cta")
//!                 .with_variant("control", json!({}))
//!                 .with_variant("green", json!({"color": "green"})),
//!         )
//!         .await
//!         .unwrap();
//!     engine.start(id).await.unwrap();
//!
//!     let variant = engine.get_variant("user-1", "cta").await;
//!     assert!(variant.is_some());
//!     assert_eq!(engine.get_variant("user-1", "cta").await, variant);
//! });
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bucketing;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod results;
pub mod store;
pub mod types;

pub use engine::{ExperimentEngine, DEFAULT_TARGET_METRIC};
pub use error::ExperimentError;
pub use results::{ExperimentResult, MetricResult, MetricValue, Recommendation, VariantStats};
pub use store::{ExperimentStore, MemoryExperimentStore};
pub use types::{
    Assignment, Experiment, ExperimentConfig, ExperimentEvent, ExperimentId, ExperimentStatus,
    TrackOutcome,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
