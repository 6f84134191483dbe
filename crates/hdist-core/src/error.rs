//! Errors produced while interpreting job-spec documents.

use thiserror::Error;

/// Structural or substitution failure in a job spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// The document violates a structural rule of the spec format.
    #[error("invalid job spec: {0}")]
    InvalidJobSpec(String),

    /// A variable reference names an unbound environment variable.
    #[error("no such environment variable: {0}")]
    UnknownVariable(String),
}

/// Convenience alias for spec-level operations.
pub type Result<T> = std::result::Result<T, SpecError>;
