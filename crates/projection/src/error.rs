//! Projection error model.

use thiserror::Error;

use nexus_store::EventStoreError;

/// Errors raised while receiving or applying events.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The delivery itself is bad (hash mismatch, schema too new).
    /// Retrying cannot help; the publisher dead-letters these directly.
    #[error("structural rejection: {0}")]
    Structural(String),

    /// The apply step failed; the publisher retries with backoff.
    #[error("apply failed: {0}")]
    Apply(String),

    /// The backing store failed; retryable.
    #[error(transparent)]
    Store(#[from] EventStoreError),
}

impl ProjectionError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }

    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Structural failures must not be retried.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}
