//! Event append, listing, and fetch.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{info, instrument};

use nexus_core::{CorrelationId, DomainError, EventId, WorldId};
use nexus_events::{Envelope, EventKind};
use nexus_store::{EventFilter, EventStoreError, MAX_LIST_LIMIT, WorldContext};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(append_event).get(list_events))
        .route("/:event_id", get(get_event))
}

/// Validated headers of an append request.
struct AppendHeaders {
    idempotency_key: Option<String>,
    correlation_id: CorrelationId,
}

/// An empty idempotency key is a client bug (absent is fine); a present
/// correlation id must be a UUID, otherwise the server assigns one.
fn validate_headers(headers: &HeaderMap) -> Result<AppendHeaders, DomainError> {
    let idempotency_key = match headers.get("idempotency-key") {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| DomainError::validation("Idempotency-Key must be visible ASCII"))?;
            if value.trim().is_empty() {
                return Err(DomainError::validation(
                    "Idempotency-Key cannot be an empty string",
                ));
            }
            Some(value.trim().to_string())
        }
        None => None,
    };

    let correlation_id = match headers.get("x-correlation-id") {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.parse::<CorrelationId>().ok())
            .ok_or_else(|| DomainError::validation("X-Correlation-Id must be a valid UUID"))?,
        None => CorrelationId::new(),
    };

    Ok(AppendHeaders {
        idempotency_key,
        correlation_id,
    })
}

/// POST /v1/events
#[instrument(skip_all)]
async fn append_event(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let parsed = match validate_headers(&headers) {
        Ok(parsed) => parsed,
        Err(e) => {
            services.metrics().record_validation_failure();
            return errors::validation_error(e.to_string(), CorrelationId::new());
        }
    };
    let correlation_id = parsed.correlation_id;

    let envelope: Envelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            services.metrics().record_validation_failure();
            return errors::validation_error(
                format!("envelope validation failed: {e}"),
                correlation_id,
            );
        }
    };
    if let Err(e) = envelope.validate() {
        services.metrics().record_validation_failure();
        return errors::validation_error(e.to_string(), correlation_id);
    }

    let ctx = WorldContext::for_world(envelope.world_id);
    let enriched = envelope.enrich(parsed.idempotency_key);

    match services.store().append_event(&ctx, enriched).await {
        Ok(recorded) => {
            services.metrics().record_appended();
            info!(
                event_id = %recorded.event_id,
                global_seq = recorded.global_seq,
                correlation_id = %correlation_id,
                "event accepted"
            );
            (
                StatusCode::CREATED,
                Json(dto::EventAccepted {
                    event_id: recorded.event_id,
                    global_seq: recorded.global_seq,
                    received_at: recorded.received_at,
                    correlation_id,
                }),
            )
                .into_response()
        }
        Err(e @ EventStoreError::IdempotencyConflict { .. }) => {
            services.metrics().record_conflict();
            errors::store_error_to_response(e, correlation_id)
        }
        Err(e) => {
            services.metrics().record_internal_error();
            errors::store_error_to_response(e, correlation_id)
        }
    }
}

/// GET /v1/events?world_id=…&branch=…[&kind=…][&after_global_seq=…][&limit=…]
async fn list_events(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::EventListQuery>,
) -> axum::response::Response {
    let correlation_id = CorrelationId::new();

    let Ok(world_id) = query.world_id.parse::<WorldId>() else {
        return errors::validation_error("world_id must be a valid UUID", correlation_id);
    };
    if let Some(limit) = query.limit {
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return errors::validation_error(
                format!("limit must be between 1 and {MAX_LIST_LIMIT}"),
                correlation_id,
            );
        }
    }

    let ctx = WorldContext::for_world(world_id);
    let filter = EventFilter {
        kind: query.kind.map(EventKind::new),
        after_global_seq: query.after_global_seq,
        limit: query.limit,
    };

    match services.store().list_events(&ctx, &query.branch, filter).await {
        Ok(page) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": page.items.iter().map(dto::event_to_json).collect::<Vec<_>>(),
                "next_after_global_seq": page.next_after_global_seq,
                "has_more": page.has_more,
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e, correlation_id),
    }
}

/// GET /v1/events/:event_id?world_id=…
async fn get_event(
    Extension(services): Extension<Arc<AppServices>>,
    Path(event_id): Path<String>,
    Query(query): Query<dto::EventGetQuery>,
) -> axum::response::Response {
    let correlation_id = CorrelationId::new();

    let Ok(event_id) = event_id.parse::<EventId>() else {
        return errors::validation_error("event_id must be a valid UUID", correlation_id);
    };
    let Ok(world_id) = query.world_id.parse::<WorldId>() else {
        return errors::validation_error("world_id must be a valid UUID", correlation_id);
    };

    let ctx = WorldContext::for_world(world_id);
    match services.store().get_event(&ctx, event_id).await {
        Ok(Some(event)) => (StatusCode::OK, Json(dto::event_to_json(&event))).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "event not found",
            correlation_id,
        ),
        Err(e) => errors::store_error_to_response(e, correlation_id),
    }
}
