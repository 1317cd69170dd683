//! Error types shared across APS
//!
//! Every failure a component can surface falls into one of two classes:
//! - **Client**: malformed input or an explicit 4xx-equivalent. Never retried.
//! - **Transient**: network, 5xx, timeouts. Retried up to a configured limit.
//!
//! Degradation (remote cache down, stale experiment snapshot) and quota
//! denial are not errors at all; components report them through typed
//! outcomes and `tracing::warn!`.

use std::path::PathBuf;

/// Classification used by the retry executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Caller's fault, surfaced immediately
    Client,
    /// Worth another attempt
    Transient,
}

/// Errors that know whether they are worth retrying
pub trait Classify {
    /// Classification of this error
    fn class(&self) -> ErrorClass;

    /// Check if error is retryable
    #[inline]
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Main service error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed request or explicit rejection by the remote side
    #[error("client error: {0}")]
    Client(String),

    /// A single invalid input field
    #[error("invalid input `{field}`: {reason}")]
    InvalidInput { field: String, reason: String },

    /// Remote service answered with an HTTP-like status code
    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Network failure or other transient condition
    #[error("transient failure: {0}")]
    Transient(String),

    /// Timeout
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Remote dependency is not reachable
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Value could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Build an error from an HTTP-like status code
    #[inline]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Shorthand for a transient failure
    #[inline]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Shorthand for a client failure
    #[inline]
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client(message.into())
    }
}

impl Classify for ServiceError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Client(_) | Self::InvalidInput { .. } | Self::Config(_) => ErrorClass::Client,
            // 408 and 429 are the only 4xx codes that clear up on their own
            Self::Upstream { status, .. } if (400..500).contains(status) => {
                if matches!(status, 408 | 429) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Client
                }
            }
            Self::Serialization(_) => ErrorClass::Client,
            Self::Upstream { .. }
            | Self::Transient(_)
            | Self::Timeout { .. }
            | Self::Unavailable(_) => ErrorClass::Transient,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading a configuration file
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but violates a constraint
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Tracing subscriber could not be installed
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl ConfigError {
    /// Create invalid value error
    #[inline]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_display() {
        let err = ServiceError::client("bad prompt");
        assert!(err.to_string().contains("client error"));

        let err = ServiceError::from_status(503, "overloaded");
        assert_eq!(err.to_string(), "upstream returned status 503: overloaded");
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert_eq!(ServiceError::client("x").class(), ErrorClass::Client);
        assert!(!ServiceError::from_status(400, "bad request").is_retryable());
        assert!(!ServiceError::from_status(404, "missing").is_retryable());
        assert!(!ServiceError::InvalidInput {
            field: "name".into(),
            reason: "empty".into()
        }
        .is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ServiceError::transient("connection reset").is_retryable());
        assert!(ServiceError::Timeout { duration_ms: 500 }.is_retryable());
        assert!(ServiceError::from_status(502, "bad gateway").is_retryable());
        assert!(ServiceError::from_status(429, "slow down").is_retryable());
        assert!(ServiceError::Unavailable("redis".into()).is_retryable());
    }

    #[test]
    fn serde_json_errors_convert() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: ServiceError = err.into();
        assert!(matches!(err, ServiceError::Serialization(_)));
    }

    #[test]
    fn config_error_invalid_value() {
        let err = ConfigError::invalid("quota.free.hourly", "must be greater than zero");
        assert!(err.to_string().contains("quota.free.hourly"));
    }
}
