//! Store error model and SQLx error mapping.

use thiserror::Error;

use nexus_events::RecordedEvent;

/// Errors raised by the event log, outbox, and watermark stores.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The `(world_id, branch, idempotency_key)` tuple already exists.
    /// Carries the first stored event, which is authoritative; nothing was
    /// written.
    #[error("idempotency conflict on key {key:?}")]
    IdempotencyConflict {
        key: String,
        existing: Box<RecordedEvent>,
    },

    /// A read or write crossed the session world boundary.
    #[error("tenancy violation: {0}")]
    TenancyViolation(String),

    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything the database refused or the driver failed on. The enclosing
    /// transaction has been rolled back.
    #[error("storage error in {operation}: {message}")]
    Storage { operation: String, message: String },
}

impl EventStoreError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Map SQLx errors to `EventStoreError`.
///
/// Unique violations (`23505`) are handled at call sites where they signal
/// an idempotency race; everything else folds into `Storage`.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => EventStoreError::storage(
            operation,
            format!("database error: {}", db_err.message()),
        ),
        sqlx::Error::PoolClosed => {
            EventStoreError::storage(operation, "connection pool closed")
        }
        sqlx::Error::RowNotFound => {
            EventStoreError::storage(operation, "unexpected row not found")
        }
        other => EventStoreError::storage(operation, other.to_string()),
    }
}

/// Check if an error is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
