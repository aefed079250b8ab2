//! Shared HTTP surface for a projector process.
//!
//! `POST /events` is the publisher-facing reception endpoint; `GET /health`
//! reports the projector's identity and tracked watermarks.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::warn;

use nexus_events::EventDelivery;

use crate::receiver::{Ack, EventReceiver};

/// Build the router for one projector.
pub fn router(receiver: Arc<EventReceiver>) -> Router {
    Router::new()
        .route("/events", post(receive_event))
        .route("/health", get(health))
        .layer(Extension(receiver))
}

/// POST /events: publisher delivery.
///
/// Replies 200 on apply/skip, 400 on structural rejection (the publisher
/// dead-letters directly), anything else is retryable.
async fn receive_event(
    Extension(receiver): Extension<Arc<EventReceiver>>,
    Json(delivery): Json<EventDelivery>,
) -> axum::response::Response {
    let global_seq = delivery.global_seq;
    match receiver.handle(&delivery).await {
        Ok(ack) => {
            let status = match ack {
                Ack::Applied => "processed",
                Ack::Skipped => "skipped",
            };
            (
                StatusCode::OK,
                Json(json!({"status": status, "global_seq": global_seq})),
            )
                .into_response()
        }
        Err(err) if err.is_structural() => (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": "structural_rejection", "message": err.to_string()})),
        )
            .into_response(),
        Err(err) => {
            warn!(global_seq, error = %err, "event apply failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"code": "apply_failed", "message": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// GET /health
async fn health(
    Extension(receiver): Extension<Arc<EventReceiver>>,
) -> axum::response::Response {
    let projector = receiver.projector();
    let watermark_count = match receiver.watermarks().list().await {
        Ok(all) => all
            .iter()
            .filter(|w| w.projector_name == projector.name())
            .count(),
        Err(_) => 0,
    };
    (
        StatusCode::OK,
        Json(json!({
            "service": format!("projector-{}", projector.lens()),
            "status": "healthy",
            "projector_name": projector.name(),
            "lens": projector.lens(),
            "watermark_count": watermark_count,
        })),
    )
        .into_response()
}
