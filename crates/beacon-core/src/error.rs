//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// A shutdown phase transition that would move backwards
    #[error("Illegal shutdown transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
