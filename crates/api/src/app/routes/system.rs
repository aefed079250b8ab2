//! Health and metrics.

use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::app::services::AppServices;

/// GET /health
///
/// Aggregates store liveness, outbox backlog, and per-stream projector
/// lag. Degrades (but stays 200) while components are catching up; 503
/// only when the store is unreachable.
pub async fn health(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let latest = match services.store().latest_global_seq().await {
        Ok(latest) => latest,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unhealthy", "error": e.to_string()})),
            )
                .into_response();
        }
    };

    let lag = services.store().lag().await.unwrap_or_default();
    let projectors = projector_lag(&services, latest).await;

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "components": {
                "store": {"status": "up", "latest_global_seq": latest},
                "outbox": {
                    "lag_events": lag.unpublished_events,
                    "lag_seconds": lag.oldest_unpublished_age_seconds,
                },
            },
            "projectors": projectors,
        })),
    )
        .into_response()
}

/// GET /metrics
pub async fn metrics(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let lag = services.store().lag().await.unwrap_or_default();
    let mut body = services.metrics().snapshot();
    if let Some(map) = body.as_object_mut() {
        map.insert(
            "outbox_lag_events".to_string(),
            json!(lag.unpublished_events),
        );
        map.insert(
            "outbox_lag_seconds".to_string(),
            json!(lag.oldest_unpublished_age_seconds),
        );
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// Watermarks with lag against the head of the log, grouped per stream.
pub(crate) async fn projector_lag(
    services: &AppServices,
    latest_global_seq: u64,
) -> Vec<serde_json::Value> {
    let watermarks = services.watermarks().list().await.unwrap_or_default();
    watermarks
        .into_iter()
        .map(|w| {
            json!({
                "projector_name": w.projector_name,
                "world_id": w.world_id.to_string(),
                "branch": w.branch,
                "last_processed_seq": w.last_processed_seq,
                "lag": latest_global_seq.saturating_sub(w.last_processed_seq),
                "updated_at": w.updated_at.to_rfc3339(),
            })
        })
        .collect()
}
