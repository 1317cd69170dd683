//! APS Predictor - behavior-driven predictions and cache preloads
//!
//! [`BehaviorPredictor`] keeps a bounded history per subject and derives:
//! - likely next actions from recent page transitions
//! - an engagement level from time spent
//! - content affinity from event metadata
//!
//! Content the subject is likely to want is warmed into the
//! [`aps_cache::TieredCache`] by a detached task after a delay that depends
//! on engagement.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod analysis;
pub mod event;
mod history;
pub mod loader;
pub mod prediction;
pub mod predictor;

pub use event::{Action, BehaviorEvent};
pub use loader::ContentLoader;
pub use prediction::{CacheStrategy, Engagement, NextAction, Prediction, RecommendedContent};
pub use predictor::{BehaviorPredictor, PredictorStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
