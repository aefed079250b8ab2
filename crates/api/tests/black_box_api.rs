//! Black-box tests over real HTTP: the gateway router and a projector
//! reception endpoint, each bound to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use nexus_api::app::{self, AppServices};
use nexus_core::WorldId;
use nexus_events::EventDelivery;
use nexus_projection::http as projector_http;
use nexus_publisher::{DeliveryOutcome, HttpSubscriber, Subscriber};
use nexus_store::{EventLog, InMemoryEventStore, WorldContext};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(app: axum::Router) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn envelope_body(world: WorldId) -> serde_json::Value {
    json!({
        "world_id": world.to_string(),
        "branch": "main",
        "kind": "note.created",
        "payload": {"id": "n1", "title": "T"},
        "by": {"agent": "t"},
    })
}

#[tokio::test]
async fn append_and_duplicate_over_http() {
    let (services, _, _) = AppServices::in_memory();
    let server = TestServer::spawn(app::build_app(services)).await;
    let client = reqwest::Client::new();
    let world = WorldId::new();

    let first = client
        .post(format!("{}/v1/events", server.base_url))
        .header("idempotency-key", "k1")
        .json(&envelope_body(world))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["global_seq"], 1);

    let second = client
        .post(format!("{}/v1/events", server.base_url))
        .header("idempotency-key", "k1")
        .json(&envelope_body(world))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["code"], "idempotency_conflict");
}

#[tokio::test]
async fn health_over_http() {
    let (services, _, _) = AppServices::in_memory();
    let server = TestServer::spawn(app::build_app(services)).await;

    let response = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

async fn recorded_delivery(store: &InMemoryEventStore, world: WorldId) -> EventDelivery {
    let envelope: nexus_events::Envelope =
        serde_json::from_value(envelope_body(world)).unwrap();
    let ctx = WorldContext::for_world(world);
    let recorded = store
        .append_event(&ctx, envelope.enrich(None))
        .await
        .unwrap();
    EventDelivery::from(&recorded)
}

#[tokio::test]
async fn http_subscriber_against_a_real_projector_endpoint() {
    // A projector process: the EMO projector behind the shared reception
    // router.
    let (_, store, emo_lens) = AppServices::in_memory();
    let watermarks: Arc<dyn nexus_store::WatermarkStore> =
        nexus_store::InMemoryWatermarkStore::arc();
    let projector = Arc::new(nexus_emo::EmoProjector::new(emo_lens));
    let receiver = Arc::new(nexus_projection::EventReceiver::new(projector, watermarks));
    let server = TestServer::spawn(projector_http::router(receiver)).await;

    let subscriber = HttpSubscriber::new(
        "emo-rel",
        server.base_url.clone(),
        "test-publisher",
        Duration::from_secs(5),
    )
    .unwrap();

    let world = WorldId::new();
    let delivery = recorded_delivery(&store, world).await;

    // First delivery applies; redelivery acks as a no-op.
    assert_eq!(subscriber.deliver(&delivery).await, DeliveryOutcome::Acked);
    assert_eq!(subscriber.deliver(&delivery).await, DeliveryOutcome::Acked);

    // A tampered payload is rejected structurally (HTTP 400).
    let mut tampered = delivery.clone();
    tampered.envelope.envelope.payload = json!({"id": "evil"});
    match subscriber.deliver(&tampered).await {
        DeliveryOutcome::StructuralReject(reason) => {
            assert!(reason.contains("400"), "unexpected reason: {reason}");
        }
        other => panic!("expected structural rejection, got {other:?}"),
    }

    // Unreachable endpoints are retryable, not fatal.
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let outcome = subscriber.deliver(&delivery).await;
    assert!(matches!(outcome, DeliveryOutcome::Retryable(_)));
}
