//! Error types for the reconciliation engine.
//!
//! All errors are strongly typed using thiserror. Only configuration errors
//! are fatal; query failures, topic mismatches, validation warnings and data
//! gaps are recorded and surfaced through the run report instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors for malformed inputs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Weight {value} is out of range [0.0, 1.0]")]
    WeightOutOfRange {
        value: f64,
    },

    #[error("Host cannot be empty")]
    EmptyHost,

    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    #[error("Invalid range: low ({low}) must not exceed high ({high})")]
    InvertedRange {
        low: f64,
        high: f64,
    },

    #[error("Value {value} is not a finite number")]
    NonFiniteValue {
        value: f64,
    },

    #[error("Unknown geographic level '{level}'")]
    UnknownLevel {
        level: String,
    },

    #[error("Unknown geographic entity '{name}'")]
    UnknownEntity {
        name: String,
    },

    #[error("'{parent}' cannot be the parent of '{child}': parents must be broader")]
    InvalidParent {
        child: String,
        parent: String,
    },
}

/// Errors that make the engine unable to compute weights at all.
///
/// These are raised at startup only.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid trust configuration: {reason}")]
    InvalidTrust {
        reason: String,
    },

    #[error("Invalid freshness policy for '{metric}': {reason}")]
    InvalidFreshnessPolicy {
        metric: String,
        reason: String,
    },

    #[error("Invalid validation rule '{rule}': {reason}")]
    InvalidRule {
        rule: String,
        reason: String,
    },

    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting {
        field: String,
        reason: String,
    },

    #[error("Failed to read configuration from {path}: {message}")]
    Unreadable {
        path: String,
        message: String,
    },

    #[error("Failed to parse configuration: {message}")]
    Malformed {
        message: String,
    },

    #[error("Trust store could not be loaded: {0}")]
    TrustStore(#[from] StorageError),
}

impl ConfigurationError {
    /// Shorthand for an invalid scalar setting.
    #[must_use]
    pub fn setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A single search/extraction call that produced no finding.
///
/// Query failures are absorbed by the collector and counted; they never abort a run.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryFailure {
    #[error("Query timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Query cancelled by the run deadline")]
    Cancelled,

    #[error("Search transport failed: {message}")]
    Transport {
        message: String,
    },

    #[error("Search response could not be parsed: {message}")]
    Malformed {
        message: String,
    },
}

impl QueryFailure {
    /// Returns true if the failure was caused by the run-level deadline.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if retrying the same query could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}

/// Failure of the external planner oracle for one entity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlannerError {
    #[error("Planner unavailable: {message}")]
    Unavailable {
        message: String,
    },

    #[error("Planner returned an invalid plan: {message}")]
    InvalidPlan {
        message: String,
    },

    #[error("Planner did not answer before the run deadline")]
    DeadlineExceeded,
}

/// Top-level error type for the engine.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ConsensusError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Configuration(_) | Self::Internal { .. } => false,
            Self::Storage(e) => matches!(e, StorageError::Io(_)),
        }
    }
}

/// Result type alias for engine operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_weight() {
        let err = ValidationError::WeightOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_validation_error_inverted_range() {
        let err = ValidationError::InvertedRange { low: 10.0, high: 2.0 };
        assert!(format!("{err}").contains("must not exceed"));
    }

    #[test]
    fn test_configuration_error_setting() {
        let err = ConfigurationError::setting("collector.fan_out", "must be at least 1");
        let msg = format!("{err}");
        assert!(msg.contains("collector.fan_out"));
        assert!(msg.contains("at least 1"));
    }

    #[test]
    fn test_query_failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(QueryFailure::Timeout { duration_ms: 250 }).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["duration_ms"], 250);

        let cancelled: QueryFailure = serde_json::from_str(r#"{"kind":"cancelled"}"#).unwrap();
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_query_failure_classification() {
        assert!(QueryFailure::Cancelled.is_cancelled());
        assert!(!QueryFailure::Cancelled.is_retryable());
        assert!(QueryFailure::Timeout { duration_ms: 10 }.is_retryable());
        assert!(!QueryFailure::Malformed { message: "x".into() }.is_retryable());
    }

    #[test]
    fn test_query_failure_timeout_message() {
        let err = QueryFailure::Timeout { duration_ms: 5000 };
        assert!(format!("{err}").contains("5000ms"));
    }

    #[test]
    fn test_consensus_error_from_configuration() {
        let err: ConsensusError = ConfigurationError::Malformed {
            message: "eof".to_string(),
        }
        .into();
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_consensus_error_from_validation() {
        let err: ConsensusError = ValidationError::EmptyHost.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_consensus_error_internal() {
        let err = ConsensusError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
