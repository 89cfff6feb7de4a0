//! Error types for the resilience layer

use crate::classify::ErrorCategory;
use thiserror::Error;

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResilienceError {
    /// Circuit breaker for the category is open, recovery is short-circuited
    #[error("Circuit breaker is open for {category}, failing fast")]
    CircuitOpen { category: ErrorCategory },

    /// A wait was aborted by emergency shutdown
    #[error("Operation cancelled by emergency shutdown")]
    Cancelled,

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Persisting state for crash recovery failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A collaborator hook used by a recovery strategy failed
    #[error("Recovery hook failed: {0}")]
    Hook(String),

    /// The handling pipeline itself panicked
    #[error("Error handler failed: {0}")]
    HandlerPanicked(String),
}

impl ResilienceError {
    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_) | ResilienceError::Hook(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_)
                | ResilienceError::CircuitOpen { .. }
                | ResilienceError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = ResilienceError::Transient("network error".to_string());
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());

        let permanent = ResilienceError::Permanent("auth failed".to_string());
        assert!(!permanent.is_transient());
        assert!(permanent.is_permanent());

        let open = ResilienceError::CircuitOpen {
            category: ErrorCategory::Api,
        };
        assert!(open.is_permanent());
        assert!(ResilienceError::Cancelled.is_permanent());
    }

    #[test]
    fn test_circuit_open_display_names_category() {
        let err = ResilienceError::CircuitOpen {
            category: ErrorCategory::Network,
        };
        assert_eq!(
            err.to_string(),
            "Circuit breaker is open for network_error, failing fast"
        );
    }
}
