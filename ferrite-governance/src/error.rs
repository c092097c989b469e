//! Error types for the governance manager.

use thiserror::Error;

/// How bad a governance processing failure is, and what it means for the
/// peer that sent the offending message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recoverable, e.g. an orphaned vote waiting for its parent.
    Warning,
    /// Structurally invalid or previously rejected data; cached so
    /// repeats are cheap to refuse.
    PermanentError,
    /// Manager-local inconsistency; logged, never surfaced to peers.
    InternalError,
}

/// A governance processing failure with the ban score to apply to the
/// submitting peer. Message handlers never propagate these across the
/// peer boundary; they log, optionally penalize, and return.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GovernanceError {
    pub message: String,
    pub severity: Severity,
    /// Misbehavior score for the peer; zero for warnings and internal
    /// errors.
    pub penalty: i32,
}

impl GovernanceError {
    pub fn warning(message: impl Into<String>) -> Self {
        GovernanceError {
            message: message.into(),
            severity: Severity::Warning,
            penalty: 0,
        }
    }

    pub fn permanent(message: impl Into<String>, penalty: i32) -> Self {
        GovernanceError {
            message: message.into(),
            severity: Severity::PermanentError,
            penalty,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GovernanceError {
            message: message.into(),
            severity: Severity::InternalError,
            penalty: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_penalties() {
        assert_eq!(GovernanceError::warning("w").penalty, 0);
        assert_eq!(GovernanceError::permanent("p", 20).penalty, 20);
        assert_eq!(
            GovernanceError::internal("i").severity,
            Severity::InternalError
        );
    }
}
