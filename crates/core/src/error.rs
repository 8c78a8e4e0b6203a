//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic domain failures (validation,
/// invariants, unrecognized enum text). Infrastructure concerns belong
/// elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. empty recipient).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Kind text did not match any known task kind.
    ///
    /// The kind set is closed at compile time; encountering unknown text
    /// means the stored row is corrupt, not that a new kind appeared.
    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    /// Status text did not match any known task status.
    #[error("unknown task status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
