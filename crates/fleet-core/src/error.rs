//! # Error Types
//!
//! Domain-specific error types for fleet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fleet-core errors (this file)                                         │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  fleet-sync errors (separate crate)                                    │
//! │  └── SyncError        - Transport, reconciler, config failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → log line              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::lifecycle::LifecycleState;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A workload id is not known.
    #[error("Workload not found: {0}")]
    WorkloadNotFound(String),

    /// Attempt to clear `spec.deleted` once it has been set.
    ///
    /// ## When This Occurs
    /// - A desired snapshot lists a workload as not deleted after an earlier
    ///   snapshot marked it deleted
    /// - A local update would overwrite a deleted spec with a live one
    #[error("Workload {id} is marked for deletion; the flag cannot be cleared")]
    DeletionReversal { id: String },

    /// The deletion lifecycle cannot move from `from` to `to`.
    #[error("Invalid lifecycle transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::DeletionReversal { id: "7".to_string() };
        assert_eq!(
            err.to_string(),
            "Workload 7 is marked for deletion; the flag cannot be cleared"
        );

        let err = CoreError::InvalidTransition {
            id: "3".to_string(),
            from: LifecycleState::Removed,
            to: LifecycleState::Active,
        };
        assert!(err.to_string().contains("removed -> active"));
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: id is required");
    }
}
