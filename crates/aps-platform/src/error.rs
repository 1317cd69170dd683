//! Facade errors

use aps_core::{ConfigError, ServiceError};
use aps_experiment::ExperimentError;
use aps_quota::WindowSpan;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias for facade operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors surfaced by [`crate::PlatformServices`]
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Subject spent its quota; nothing was fetched
    #[error("{message}")]
    QuotaExceeded {
        /// Exhausted window
        window: WindowSpan,
        /// When that window resets
        reset_at: DateTime<Utc>,
        /// Remediation text for the caller
        message: String,
    },

    /// Fetch failed after retries, or with a client error
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Experiment engine rejected the call
    #[error(transparent)]
    Experiment(#[from] ExperimentError),

    /// Configuration did not validate
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PlatformError {
    /// Whether this is a quota rejection
    #[inline]
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

impl From<PlatformError> for ServiceError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::QuotaExceeded { message, .. } => ServiceError::Client(message),
            PlatformError::Service(inner) => inner,
            PlatformError::Experiment(inner) => inner.into(),
            PlatformError::Config(inner) => ServiceError::Config(inner),
        }
    }
}
