//! Subscriber contract and the HTTP delivery client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use nexus_events::{EventDelivery, delivery::PUBLISHER_ID_HEADER};

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Subscriber acknowledged. Includes `409 already-applied`, since an
    /// idempotent projector can only 409 after the work was done.
    Acked,
    /// `400`: hash mismatch or schema too new. Retrying cannot help; the
    /// event goes straight to the DLQ.
    StructuralReject(String),
    /// Everything else, timeouts included. Retried with backoff.
    Retryable(String),
}

/// A projector endpoint the publisher fans out to. Subscribers must be
/// idempotent on `(projector, global_seq)`.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, delivery: &EventDelivery) -> DeliveryOutcome;
}

/// HTTP subscriber posting deliveries to a projector's `/events` endpoint.
pub struct HttpSubscriber {
    name: String,
    endpoint: String,
    publisher_id: String,
    client: reqwest::Client,
}

impl HttpSubscriber {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        publisher_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            publisher_id: publisher_id.into(),
            client,
        })
    }
}

#[async_trait]
impl Subscriber for HttpSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, delivery: &EventDelivery) -> DeliveryOutcome {
        let url = format!("{}/events", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header(PUBLISHER_ID_HEADER, &self.publisher_id)
            .json(delivery)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status == StatusCode::CONFLICT {
                    debug!(subscriber = %self.name, %status, seq = delivery.global_seq, "delivered");
                    return DeliveryOutcome::Acked;
                }
                let body = resp.text().await.unwrap_or_default();
                if status == StatusCode::BAD_REQUEST {
                    DeliveryOutcome::StructuralReject(format!(
                        "{} rejected: {status} {body}",
                        self.name
                    ))
                } else {
                    DeliveryOutcome::Retryable(format!("{} returned {status}: {body}", self.name))
                }
            }
            Err(e) => DeliveryOutcome::Retryable(format!("{} unreachable: {e}", self.name)),
        }
    }
}
