//! HTTP application wiring (axum router + service wiring).
//!
//! Layout:
//! - `services.rs`: store/projector wiring shared by the handlers
//! - `routes/`: one file per surface area (events, admin, system)
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: the shared `{code, message, correlation_id}` error shape

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics))
        .nest("/v1/events", routes::events::router())
        .nest("/v1/admin", routes::admin::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
