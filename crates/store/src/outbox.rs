//! Transactional outbox: fan-out bookkeeping for the CDC publisher.
//!
//! One outbox row is co-written with each appended event. Rows transition
//! `unpublished → published` or `unpublished → retry-scheduled → dlq`; the
//! publisher owns these transitions, the store just executes them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use nexus_core::{EventId, WorldId};
use nexus_events::{EnrichedEnvelope, Envelope, EventDelivery, EventKind, StreamKey};

use crate::error::EventStoreError;

/// One claimable outbox row: the enriched envelope plus delivery state.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub global_seq: u64,
    pub envelope: EnrichedEnvelope,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn event_id(&self) -> EventId {
        self.envelope.event_id
    }

    pub fn world_id(&self) -> WorldId {
        self.envelope.envelope.world_id
    }

    pub fn branch(&self) -> &str {
        &self.envelope.envelope.branch
    }

    pub fn kind(&self) -> &EventKind {
        &self.envelope.envelope.kind
    }

    pub fn stream(&self) -> StreamKey {
        self.envelope.envelope.stream()
    }

    /// The delivery body sent to each subscriber.
    pub fn delivery(&self) -> EventDelivery {
        EventDelivery {
            global_seq: self.global_seq,
            event_id: self.envelope.event_id,
            payload_hash: self.envelope.payload_hash.clone(),
            envelope: self.envelope.clone(),
        }
    }
}

/// A dead-lettered event: terminal parking for deliveries that kept failing
/// or were structurally rejected.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DlqEntry {
    pub global_seq: u64,
    pub event_id: EventId,
    pub world_id: WorldId,
    pub branch: String,
    pub kind: EventKind,
    pub envelope: Envelope,
    pub error: String,
    pub publisher_id: String,
    pub moved_at: DateTime<Utc>,
}

/// Publisher backlog signal.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct OutboxLag {
    /// Events not yet published.
    pub unpublished_events: u64,
    /// Age of the oldest unpublished event, seconds.
    pub oldest_unpublished_age_seconds: i64,
}

/// Outbox operations. All transitions are keyed by `global_seq`.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Claim up to `batch_size` due rows in `global_seq` order.
    ///
    /// A claimed row is invisible to concurrent claimers for a short lease
    /// so two publishers cannot double-deliver; committing an outcome
    /// (`mark_published` / `mark_retry` / `move_to_dlq`) releases it.
    async fn fetch_unpublished(
        &self,
        batch_size: u32,
    ) -> Result<Vec<OutboxEntry>, EventStoreError>;

    /// All subscribers acknowledged; the row is done.
    async fn mark_published(&self, global_seq: u64) -> Result<(), EventStoreError>;

    /// Release a claim without recording an outcome (a later event in a
    /// paused stream, or a shutdown with deliveries not attempted). The
    /// row becomes immediately claimable again.
    async fn release_claim(&self, global_seq: u64) -> Result<(), EventStoreError>;

    /// Delivery failed; record the error, bump `attempts`, and schedule the
    /// next try after `delay`. Returns the new attempt count.
    async fn mark_retry(
        &self,
        global_seq: u64,
        error: &str,
        delay: Duration,
    ) -> Result<u32, EventStoreError>;

    /// Park the event in the DLQ and stamp `published_at` so it is never
    /// fetched again.
    async fn move_to_dlq(
        &self,
        global_seq: u64,
        error: &str,
        publisher_id: &str,
    ) -> Result<(), EventStoreError>;

    /// Backlog size and staleness, for health reporting.
    async fn lag(&self) -> Result<OutboxLag, EventStoreError>;

    /// Most recent DLQ entries.
    async fn list_dlq(&self, limit: u32) -> Result<Vec<DlqEntry>, EventStoreError>;
}
