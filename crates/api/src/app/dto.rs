//! Request/response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nexus_core::{CorrelationId, EventId};
use nexus_events::RecordedEvent;

/// 201 body for a successful append.
#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub event_id: EventId,
    pub global_seq: u64,
    pub received_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

/// Query parameters for event listing.
#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    pub world_id: String,
    pub branch: String,
    pub kind: Option<String>,
    pub after_global_seq: Option<u64>,
    pub limit: Option<u32>,
}

/// Query parameters for fetching one event.
#[derive(Debug, Deserialize)]
pub struct EventGetQuery {
    pub world_id: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Body of a projector rebuild request.
#[derive(Debug, Deserialize)]
pub struct RebuildRequest {
    pub world_id: Uuid,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub from_global_seq: u64,
    #[serde(default)]
    pub clear_existing: bool,
}

/// Accepted rebuild job.
#[derive(Debug, Serialize)]
pub struct RebuildAccepted {
    pub rebuild_job_id: Uuid,
    pub estimated_events: u64,
    pub status: String,
    pub projector: String,
    pub world_id: String,
    pub branch: String,
}

/// Body of the tenancy isolation self-test.
#[derive(Debug, Deserialize)]
pub struct TenancyCheckRequest {
    pub world_a: Uuid,
    pub world_b: Uuid,
}

/// Serialize a recorded event for API responses (flattened enriched
/// envelope).
pub fn event_to_json(event: &RecordedEvent) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or_else(|_| serde_json::json!({}))
}
