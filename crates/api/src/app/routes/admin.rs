//! Admin & operational surface: projector rebuilds, derived-view refresh,
//! tenancy self-test, projector lag, DLQ inspection.
//!
//! All routes gate on the admin token header when one is configured; the
//! rebuild path is the one place the administrative tenancy bypass is
//! exercised.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use nexus_core::{CorrelationId, WorldId};
use nexus_projection::rebuild_projector;
use nexus_store::isolation_check;

use crate::app::routes::system::projector_lag;
use crate::app::services::{AppServices, NexusStore, RebuildJob};
use crate::app::{dto, errors};

/// Header carrying the admin role token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub fn router() -> Router {
    Router::new()
        .route("/projectors", get(list_projectors))
        .route("/projectors/:lens/rebuild", post(rebuild))
        .route("/rebuilds/:job_id", get(rebuild_status))
        .route("/views/refresh", post(refresh_views))
        .route("/tenancy/check", post(tenancy_check))
        .route("/dlq", get(list_dlq))
}

fn authorize(
    services: &AppServices,
    headers: &HeaderMap,
) -> Result<(), axum::response::Response> {
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if services.admin_allowed(presented) {
        Ok(())
    } else {
        Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "admin token missing or invalid",
            CorrelationId::new(),
        ))
    }
}

/// POST /v1/admin/projectors/:lens/rebuild
async fn rebuild(
    Extension(services): Extension<Arc<AppServices>>,
    Path(lens): Path<String>,
    headers: HeaderMap,
    Json(request): Json<dto::RebuildRequest>,
) -> axum::response::Response {
    if let Err(denied) = authorize(&services, &headers) {
        return denied;
    }
    let correlation_id = CorrelationId::new();

    let Some(projector) = services.projector_for_lens(&lens) else {
        let known: Vec<&str> = services.projectors().iter().map(|p| p.lens.as_str()).collect();
        return errors::validation_error(
            format!("unknown lens {lens:?}; known: {known:?}"),
            correlation_id,
        );
    };

    let world_id = WorldId::from_uuid(request.world_id);
    let ctx = nexus_store::WorldContext::for_world(world_id);
    let estimated = match services
        .store()
        .count_events_from(&ctx, &request.branch, request.from_global_seq)
        .await
    {
        Ok(estimated) => estimated,
        Err(e) => return errors::store_error_to_response(e, correlation_id),
    };

    let job_id = Uuid::new_v4();
    let log: Arc<dyn NexusStore> = services.store().clone();
    let handle = rebuild_projector(
        log,
        projector.receiver.clone(),
        world_id,
        request.branch.clone(),
        request.from_global_seq,
        request.clear_existing,
    );

    let projector_name = projector.receiver.projector().name().to_string();
    services.rebuilds().insert(RebuildJob {
        job_id,
        lens: lens.clone(),
        world_id,
        branch: request.branch.clone(),
        estimated_events: estimated,
        handle,
    });

    info!(%job_id, lens, world_id = %world_id, branch = %request.branch, "rebuild accepted");
    (
        StatusCode::ACCEPTED,
        Json(dto::RebuildAccepted {
            rebuild_job_id: job_id,
            estimated_events: estimated,
            status: "accepted".to_string(),
            projector: projector_name,
            world_id: world_id.to_string(),
            branch: request.branch,
        }),
    )
        .into_response()
}

/// GET /v1/admin/rebuilds/:job_id
async fn rebuild_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(denied) = authorize(&services, &headers) {
        return denied;
    }
    let correlation_id = CorrelationId::new();

    let Some(job) = services.rebuilds().get(job_id) else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "unknown rebuild job",
            correlation_id,
        );
    };

    let progress = job.handle.progress().await;
    (
        StatusCode::OK,
        Json(json!({
            "rebuild_job_id": job.job_id,
            "lens": job.lens,
            "world_id": job.world_id.to_string(),
            "branch": job.branch,
            "estimated_events": job.estimated_events,
            "progress": progress,
        })),
    )
        .into_response()
}

/// POST /v1/admin/views/refresh
///
/// `emo_active` is a plain view over `emo_current`, so the refresh is an
/// acknowledgement; materialized lenses hook their refresh here.
async fn refresh_views(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(denied) = authorize(&services, &headers) {
        return denied;
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "refreshed",
            "views": ["emo_active"],
        })),
    )
        .into_response()
}

/// POST /v1/admin/tenancy/check
async fn tenancy_check(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(request): Json<dto::TenancyCheckRequest>,
) -> axum::response::Response {
    if let Err(denied) = authorize(&services, &headers) {
        return denied;
    }
    let correlation_id = CorrelationId::new();

    let store = services.store().clone();
    match isolation_check(
        store.as_ref(),
        WorldId::from_uuid(request.world_a),
        WorldId::from_uuid(request.world_b),
    )
    .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "isolation_status": if report.isolation_working { "pass" } else { "fail" },
                "report": report,
            })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e, correlation_id),
    }
}

#[derive(Debug, serde::Deserialize)]
struct DlqQuery {
    limit: Option<u32>,
}

/// GET /v1/admin/projectors
async fn list_projectors(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(denied) = authorize(&services, &headers) {
        return denied;
    }
    let correlation_id = CorrelationId::new();

    let latest = match services.store().latest_global_seq().await {
        Ok(latest) => latest,
        Err(e) => return errors::store_error_to_response(e, correlation_id),
    };

    let registered: Vec<_> = services
        .projectors()
        .iter()
        .map(|p| {
            json!({
                "name": p.receiver.projector().name(),
                "lens": p.lens,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "latest_global_seq": latest,
            "registered": registered,
            "watermarks": projector_lag(&services, latest).await,
        })),
    )
        .into_response()
}

/// GET /v1/admin/dlq
async fn list_dlq(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<DlqQuery>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(denied) = authorize(&services, &headers) {
        return denied;
    }
    let correlation_id = CorrelationId::new();

    match services.store().list_dlq(query.limit.unwrap_or(50)).await {
        Ok(entries) => (StatusCode::OK, Json(json!({"entries": entries}))).into_response(),
        Err(e) => errors::store_error_to_response(e, correlation_id),
    }
}
