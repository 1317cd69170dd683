//! Error types for the tiered cache

use aps_core::ServiceError;

/// Cache errors
///
/// Only `InvalidPattern` ever reaches a caller of [`crate::TieredCache`];
/// the others come from a [`crate::RemoteTier`] and are absorbed by the
/// local fallback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Glob pattern could not be compiled
    #[error("invalid cache pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Remote tier is unreachable or failed
    #[error("remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// Value could not be encoded or decoded
    #[error("cache serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidPattern { pattern, reason } => ServiceError::InvalidInput {
                field: "pattern".to_string(),
                reason: format!("'{pattern}': {reason}"),
            },
            CacheError::RemoteUnavailable(msg) => ServiceError::Unavailable(msg),
            CacheError::Serialization(msg) => ServiceError::Serialization(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::{Classify, ErrorClass};

    #[test]
    fn invalid_pattern_maps_to_client_error() {
        let err: ServiceError = CacheError::InvalidPattern {
            pattern: String::new(),
            reason: "empty".into(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Client);
    }

    #[test]
    fn remote_failure_maps_to_transient() {
        let err: ServiceError = CacheError::RemoteUnavailable("timeout".into()).into();
        assert!(err.is_retryable());
    }
}
