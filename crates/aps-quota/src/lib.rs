//! APS Quota - request quotas per subject and tier
//!
//! Each subject has an hourly and a daily counter. A request is admitted
//! only when both have room; the check and the increment happen under one
//! lock acquisition, and a rejected request consumes nothing.
//!
//! # Example
//!
//! ```rust
//! use aps_core::{QuotaConfig, Tier};
//! use aps_quota::QuotaGovernor;
//!
//! let governor = QuotaGovernor::new(QuotaConfig::default());
//! assert!(governor.check_and_consume("user-1", Tier::Free));
//! assert_eq!(governor.status("user-1", Tier::Free).hourly.used, 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod governor;
pub mod window;

pub use governor::{QuotaDecision, QuotaGovernor, QuotaStatus, WindowUsage};
pub use window::{QuotaWindow, WindowSpan};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
