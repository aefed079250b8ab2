use std::sync::Arc;

use axum::{Json, Router, extract::Extension, routing::get};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use nexus_publisher::{CdcPublisher, HttpSubscriber, PublisherConfig, RetryPolicy, Subscriber};
use nexus_store::{Outbox, PostgresEventStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nexus_observability::init();

    let config = PublisherConfig::from_env();

    let pool = PgPoolOptions::new()
        .min_connections(2)
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PostgresEventStore::new(pool));

    let mut subscribers: Vec<Arc<dyn Subscriber>> = Vec::new();
    for endpoint in &config.projector_endpoints {
        subscribers.push(Arc::new(HttpSubscriber::new(
            endpoint.clone(),
            endpoint.clone(),
            config.publisher_id.clone(),
            config.delivery_timeout,
        )?));
    }
    if subscribers.is_empty() {
        tracing::warn!("no projector endpoints configured; outbox will only accumulate");
    }

    let retry = RetryPolicy {
        max_attempts: config.max_attempts,
        ..RetryPolicy::default()
    };
    let publisher = CdcPublisher::new(store.clone(), subscribers, retry, config.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested; finishing current batch");
        let _ = shutdown_tx.send(true);
    });

    // Health endpoint: publisher identity plus outbox lag.
    let health_app = Router::new()
        .route("/health", get(health))
        .layer(Extension(store.clone()))
        .layer(Extension(config.publisher_id.clone()));
    let addr = format!("0.0.0.0:{}", config.health_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "publisher health endpoint listening");
    tokio::spawn(async move {
        let _ = axum::serve(listener, health_app).await;
    });

    publisher.run(shutdown_rx).await;
    Ok(())
}

async fn health(
    Extension(store): Extension<Arc<PostgresEventStore>>,
    Extension(publisher_id): Extension<String>,
) -> Json<serde_json::Value> {
    let lag = store.lag().await.unwrap_or_default();
    Json(serde_json::json!({
        "service": "cdc-publisher",
        "status": "ok",
        "publisher_id": publisher_id,
        "lag_events": lag.unpublished_events,
        "lag_seconds": lag.oldest_unpublished_age_seconds,
    }))
}
