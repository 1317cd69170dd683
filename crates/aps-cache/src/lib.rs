//! APS Cache - two-level cache with graceful degradation
//!
//! [`TieredCache`] reads a shared remote tier first and falls back to an
//! in-process local tier. Remote failures downgrade the cache to local-only
//! operation instead of surfacing as errors; the only error a caller sees is
//! an invalid invalidation pattern.
//!
//! # Example
//!
//! ```rust
//! use aps_cache::TieredCache;
//! use aps_core::{system_clock, CacheConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! rt.block_on(async {
//!     let cache = TieredCache::in_process(CacheConfig::default(), system_clock());
//!     cache.set("design:1", json!({"title": "draft"}), Duration::from_secs(60)).await;
//!     assert!(cache.get("design:1").await.is_some());
//!     assert_eq!(cache.invalidate("design:*").await.unwrap(), 1);
//! });
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod entry;
pub mod error;
pub mod local;
pub mod pattern;
pub mod remote;
pub mod tiered;

pub use entry::{CacheEntry, CacheRegion};
pub use error::CacheError;
pub use local::LocalTier;
pub use pattern::GlobPattern;
pub use remote::{MokaRemoteTier, RemoteTier};
pub use tiered::{CacheStats, TieredCache};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
