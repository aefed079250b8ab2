//! Event log contract.

use async_trait::async_trait;

use nexus_core::EventId;
use nexus_events::{EnrichedEnvelope, EventKind, RecordedEvent};

use crate::error::EventStoreError;
use crate::tenancy::WorldContext;

/// Hard cap on page size for event listing.
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Page size used when the caller does not specify one.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// Filters for event listing; cursor pagination on `global_seq`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub after_global_seq: Option<u64>,
    pub limit: Option<u32>,
}

impl EventFilter {
    /// The limit actually applied: defaulted and clamped to the hard cap.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }
}

/// One page of events plus the cursor for the next.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub items: Vec<RecordedEvent>,
    pub next_after_global_seq: Option<u64>,
    pub has_more: bool,
}

/// The single source of truth: durable append-only log with a globally
/// monotonic sequence, co-written with the outbox in one transaction.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one enriched envelope.
    ///
    /// In a single transaction: assigns `global_seq` from the monotonic
    /// generator, inserts the log row, inserts the outbox row. When the
    /// idempotency tuple `(world_id, branch, idempotency_key)` already
    /// exists, returns `IdempotencyConflict` carrying the first stored
    /// event and writes nothing. The context must cover the envelope's
    /// world or the append is rejected.
    async fn append_event(
        &self,
        ctx: &WorldContext,
        enriched: EnrichedEnvelope,
    ) -> Result<RecordedEvent, EventStoreError>;

    /// List events for the context's world and `branch`, ascending
    /// `global_seq`. A missing or mismatched world context yields an empty
    /// page.
    async fn list_events(
        &self,
        ctx: &WorldContext,
        branch: &str,
        filter: EventFilter,
    ) -> Result<EventPage, EventStoreError>;

    /// Fetch one event by id, gated by the context.
    async fn get_event(
        &self,
        ctx: &WorldContext,
        event_id: EventId,
    ) -> Result<Option<RecordedEvent>, EventStoreError>;

    /// Highest assigned `global_seq`, 0 for an empty log.
    async fn latest_global_seq(&self) -> Result<u64, EventStoreError>;

    /// Number of events at or past `from_seq` for a stream (rebuild
    /// estimation).
    async fn count_events_from(
        &self,
        ctx: &WorldContext,
        branch: &str,
        from_seq: u64,
    ) -> Result<u64, EventStoreError>;
}
