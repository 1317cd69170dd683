//! Experiment errors

use crate::types::{ExperimentId, ExperimentStatus};
use aps_core::ServiceError;

/// Experiment engine errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExperimentError {
    /// No experiment with this id
    #[error("experiment {0} not found")]
    NotFound(ExperimentId),

    /// Definition rejected at creation
    #[error("invalid experiment: {0}")]
    InvalidConfig(String),

    /// Lifecycle step not allowed from the current status
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: ExperimentStatus,
        /// Requested status
        to: ExperimentStatus,
    },

    /// Another running experiment already uses the name
    #[error("an experiment named '{0}' is already running")]
    NameInUse(String),

    /// Store failed
    #[error("experiment store error: {0}")]
    Store(String),
}

impl ExperimentError {
    /// Create config error
    #[inline]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Create store error
    #[inline]
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store(reason.into())
    }
}

impl From<ExperimentError> for ServiceError {
    fn from(err: ExperimentError) -> Self {
        match err {
            ExperimentError::InvalidConfig(reason) => ServiceError::InvalidInput {
                field: "experiment".to_string(),
                reason,
            },
            ExperimentError::Store(msg) => ServiceError::Unavailable(msg),
            other => ServiceError::Client(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::{Classify, ErrorClass};

    #[test]
    fn store_errors_are_transient() {
        let err: ServiceError = ExperimentError::store("down").into();
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn lifecycle_errors_are_client_errors() {
        let err: ServiceError = ExperimentError::IllegalTransition {
            from: ExperimentStatus::Draft,
            to: ExperimentStatus::Completed,
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Client);
        assert!(err.to_string().contains("draft -> completed"));
    }
}
