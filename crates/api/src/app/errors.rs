//! Consistent error responses: `{code, message, correlation_id}`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use nexus_core::CorrelationId;
use nexus_store::EventStoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    correlation_id: CorrelationId,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "code": code,
            "message": message.into(),
            "correlation_id": correlation_id,
        })),
    )
        .into_response()
}

pub fn validation_error(
    message: impl Into<String>,
    correlation_id: CorrelationId,
) -> axum::response::Response {
    json_error(
        StatusCode::BAD_REQUEST,
        "validation_error",
        message,
        correlation_id,
    )
}

pub fn internal_error(
    message: impl Into<String>,
    correlation_id: CorrelationId,
) -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        message,
        correlation_id,
    )
}

/// Map store failures on the read path. Tenancy violations indicate a
/// missing or wrong session context; they surface as internal.
pub fn store_error_to_response(
    err: EventStoreError,
    correlation_id: CorrelationId,
) -> axum::response::Response {
    match err {
        EventStoreError::IdempotencyConflict { key, .. } => json_error(
            StatusCode::CONFLICT,
            "idempotency_conflict",
            format!("duplicate idempotency key: {key}"),
            correlation_id,
        ),
        EventStoreError::NotFound(what) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            what,
            correlation_id,
        ),
        EventStoreError::TenancyViolation(msg) => internal_error(msg, correlation_id),
        EventStoreError::Storage { .. } => internal_error(err.to_string(), correlation_id),
    }
}
