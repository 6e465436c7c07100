//! Error types for the fallback chain
//!
//! Provides error handling for:
//! - Primary detector failures (timeout, network, overload, internal)
//! - Heuristic tier failures
//! - Configuration validation and loading
//! - Circuit breaker transition violations

use crate::types::{Category, CircuitState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main error type (construction only; detection never fails)
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Heuristic rule table could not be built
    #[error("heuristic error: {0}")]
    Heuristic(#[from] HeuristicError),
}

/// Failures raised by the primary detector
///
/// All variants count identically against the circuit breaker; the
/// distinction is kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    /// Call exceeded the per-invocation timeout
    #[error("detector timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Network or connection failure
    #[error("detector unavailable: {0}")]
    Unavailable(String),

    /// Memory or overload failure
    #[error("detector resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Anything else
    #[error("detector internal error: {0}")]
    Internal(String),
}

impl DetectorError {
    /// Classification of this error
    #[inline]
    #[must_use]
    pub fn kind(&self) -> DetectorErrorKind {
        match self {
            Self::Timeout { .. } => DetectorErrorKind::Timeout,
            Self::Unavailable(_) => DetectorErrorKind::Unavailable,
            Self::ResourceExhausted(_) => DetectorErrorKind::ResourceExhausted,
            Self::Internal(_) => DetectorErrorKind::Internal,
        }
    }
}

/// Detector error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorErrorKind {
    /// `DetectorTimeout`
    Timeout,
    /// `DetectorUnavailable`
    Unavailable,
    /// `DetectorResourceExhausted`
    ResourceExhausted,
    /// `DetectorInternalError`
    Internal,
}

impl DetectorErrorKind {
    /// All kinds
    pub const ALL: [DetectorErrorKind; 4] = [
        DetectorErrorKind::Timeout,
        DetectorErrorKind::Unavailable,
        DetectorErrorKind::ResourceExhausted,
        DetectorErrorKind::Internal,
    ];

    /// Label used in reasons, logs and metrics
    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Internal => "internal",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Timeout => 0,
            Self::Unavailable => 1,
            Self::ResourceExhausted => 2,
            Self::Internal => 3,
        }
    }
}

impl std::fmt::Display for DetectorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Heuristic tier errors
#[derive(Debug, thiserror::Error)]
pub enum HeuristicError {
    /// Query exceeds what the matcher accepts
    #[error("query too long for heuristic matching: {len} chars (max: {max})")]
    QueryTooLong { len: usize, max: usize },

    /// Rule pattern failed to compile
    #[error("invalid rule for category {category}: {source}")]
    InvalidRule {
        category: Category,
        #[source]
        source: regex::Error,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Field holds an unusable value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Safe category set must contain `core`
    #[error("safe_categories must include core")]
    MissingCoreCategory,

    /// Category name not in the registry
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// Unknown preset or mode name
    #[error("unknown {kind}: {value}")]
    UnknownName { kind: &'static str, value: String },

    /// Config file unreadable
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file malformed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Circuit breaker state machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// Transition not in the allowed table
    #[error("illegal circuit transition: {from} -> {to}")]
    IllegalTransition { from: CircuitState, to: CircuitState },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_error_display() {
        let err = DetectorError::Timeout { timeout_ms: 150 };
        assert_eq!(err.to_string(), "detector timed out after 150ms");
        assert_eq!(err.kind(), DetectorErrorKind::Timeout);
    }

    #[test]
    fn detector_error_kinds_are_distinct() {
        let errors = [
            DetectorError::Timeout { timeout_ms: 1 },
            DetectorError::Unavailable("refused".into()),
            DetectorError::ResourceExhausted("oom".into()),
            DetectorError::Internal("boom".into()),
        ];
        let kinds: Vec<_> = errors.iter().map(DetectorError::kind).collect();
        assert_eq!(kinds, DetectorErrorKind::ALL.to_vec());
        for (i, kind) in DetectorErrorKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid("failure_threshold", "must be at least 1");
        assert!(err.to_string().contains("failure_threshold"));
        assert_eq!(
            ConfigError::MissingCoreCategory.to_string(),
            "safe_categories must include core"
        );
    }

    #[test]
    fn fallback_error_wraps_config() {
        let err: FallbackError = ConfigError::MissingCoreCategory.into();
        assert!(err.to_string().starts_with("configuration error"));
    }
}
