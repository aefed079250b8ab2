//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, conflicts,
/// tenancy). Infrastructure concerns carry their own error types and fold
/// into `Internal` at the surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed envelope).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An append re-used an idempotency tuple; the first stored event is
    /// authoritative.
    #[error("idempotency conflict: {0}")]
    IdempotencyConflict(String),

    /// A recomputed payload hash did not match the supplied one.
    #[error("payload hash mismatch: {0}")]
    HashMismatch(String),

    /// A read or write crossed the world boundary.
    #[error("tenancy violation: {0}")]
    TenancyViolation(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// Anything else; the request aborts with no partial writes.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::IdempotencyConflict(msg.into())
    }

    pub fn hash_mismatch(msg: impl Into<String>) -> Self {
        Self::HashMismatch(msg.into())
    }

    pub fn tenancy(msg: impl Into<String>) -> Self {
        Self::TenancyViolation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::IdempotencyConflict(_) => "idempotency_conflict",
            Self::HashMismatch(_) => "hash_mismatch",
            Self::TenancyViolation(_) => "tenancy_violation",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal_error",
        }
    }
}
