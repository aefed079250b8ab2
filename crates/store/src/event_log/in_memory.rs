//! In-memory event store for tests/dev.
//!
//! Implements the same log + outbox contract as the Postgres store. All
//! state lives under one lock, so the append transaction is trivially
//! atomic and `global_seq` is gap-free by construction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use nexus_core::EventId;
use nexus_events::{EnrichedEnvelope, RecordedEvent};

use super::r#trait::{EventFilter, EventLog, EventPage};
use crate::error::EventStoreError;
use crate::outbox::{DlqEntry, Outbox, OutboxEntry, OutboxLag};
use crate::tenancy::WorldContext;

#[derive(Debug, Clone)]
struct OutboxState {
    attempts: u32,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    in_flight: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    log: BTreeMap<u64, RecordedEvent>,
    by_event_id: HashMap<EventId, u64>,
    idempotency: HashMap<(nexus_core::WorldId, String, String), u64>,
    outbox: BTreeMap<u64, OutboxState>,
    dlq: Vec<DlqEntry>,
}

/// In-memory log + outbox.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self, operation: &str) -> Result<std::sync::MutexGuard<'_, Inner>, EventStoreError> {
        self.inner
            .lock()
            .map_err(|_| EventStoreError::storage(operation, "lock poisoned"))
    }
}

#[async_trait]
impl EventLog for InMemoryEventStore {
    async fn append_event(
        &self,
        ctx: &WorldContext,
        enriched: EnrichedEnvelope,
    ) -> Result<RecordedEvent, EventStoreError> {
        let world_id = enriched.envelope.world_id;
        if !ctx.allows_write(world_id) {
            return Err(EventStoreError::TenancyViolation(format!(
                "append under context {:?} targets world {world_id}",
                ctx.world_id()
            )));
        }

        let mut inner = self.lock("append_event")?;

        if let Some(key) = &enriched.idempotency_key {
            let tuple = (world_id, enriched.envelope.branch.clone(), key.clone());
            if let Some(seq) = inner.idempotency.get(&tuple) {
                // First stored event is authoritative; nothing is written.
                let existing = inner
                    .log
                    .get(seq)
                    .cloned()
                    .ok_or_else(|| EventStoreError::storage("append_event", "dangling idempotency entry"))?;
                return Err(EventStoreError::IdempotencyConflict {
                    key: key.clone(),
                    existing: Box::new(existing),
                });
            }
        }

        inner.next_seq += 1;
        let global_seq = inner.next_seq;
        let recorded = RecordedEvent::from_enriched(enriched, global_seq);

        if let Some(key) = &recorded.idempotency_key {
            inner.idempotency.insert(
                (world_id, recorded.envelope.branch.clone(), key.clone()),
                global_seq,
            );
        }
        inner.by_event_id.insert(recorded.event_id, global_seq);
        inner.outbox.insert(
            global_seq,
            OutboxState {
                attempts: 0,
                last_error: None,
                next_retry_at: None,
                published_at: None,
                in_flight: false,
            },
        );
        inner.log.insert(global_seq, recorded.clone());

        Ok(recorded)
    }

    async fn list_events(
        &self,
        ctx: &WorldContext,
        branch: &str,
        filter: EventFilter,
    ) -> Result<EventPage, EventStoreError> {
        let inner = self.lock("list_events")?;
        let limit = filter.effective_limit() as usize;
        let after = filter.after_global_seq.unwrap_or(0);

        let mut items: Vec<RecordedEvent> = Vec::new();
        let mut has_more = false;
        for event in inner.log.values() {
            if event.global_seq <= after {
                continue;
            }
            if !ctx.allows_read(event.envelope.world_id) {
                continue;
            }
            if event.envelope.branch != branch {
                continue;
            }
            if let Some(kind) = &filter.kind {
                if &event.envelope.kind != kind {
                    continue;
                }
            }
            if items.len() == limit {
                has_more = true;
                break;
            }
            items.push(event.clone());
        }

        let next_after_global_seq = items.last().map(|e| e.global_seq);
        Ok(EventPage {
            items,
            next_after_global_seq,
            has_more,
        })
    }

    async fn get_event(
        &self,
        ctx: &WorldContext,
        event_id: EventId,
    ) -> Result<Option<RecordedEvent>, EventStoreError> {
        let inner = self.lock("get_event")?;
        let found = inner
            .by_event_id
            .get(&event_id)
            .and_then(|seq| inner.log.get(seq))
            .filter(|e| ctx.allows_read(e.envelope.world_id))
            .cloned();
        Ok(found)
    }

    async fn latest_global_seq(&self) -> Result<u64, EventStoreError> {
        Ok(self.lock("latest_global_seq")?.next_seq)
    }

    async fn count_events_from(
        &self,
        ctx: &WorldContext,
        branch: &str,
        from_seq: u64,
    ) -> Result<u64, EventStoreError> {
        let inner = self.lock("count_events_from")?;
        let count = inner
            .log
            .values()
            .filter(|e| {
                e.global_seq >= from_seq
                    && ctx.allows_read(e.envelope.world_id)
                    && e.envelope.branch == branch
            })
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl Outbox for InMemoryEventStore {
    async fn fetch_unpublished(
        &self,
        batch_size: u32,
    ) -> Result<Vec<OutboxEntry>, EventStoreError> {
        let mut inner = self.lock("fetch_unpublished")?;
        let now = Utc::now();

        let due: Vec<u64> = inner
            .outbox
            .iter()
            .filter(|(_, s)| {
                s.published_at.is_none()
                    && !s.in_flight
                    && s.next_retry_at.map(|at| at <= now).unwrap_or(true)
            })
            .map(|(seq, _)| *seq)
            .take(batch_size as usize)
            .collect();

        let mut batch = Vec::with_capacity(due.len());
        for seq in due {
            let event = inner
                .log
                .get(&seq)
                .cloned()
                .ok_or_else(|| EventStoreError::storage("fetch_unpublished", "outbox row without log row"))?;
            let state = inner
                .outbox
                .get_mut(&seq)
                .ok_or_else(|| EventStoreError::storage("fetch_unpublished", "missing outbox state"))?;
            state.in_flight = true;
            batch.push(OutboxEntry {
                global_seq: seq,
                envelope: nexus_events::EventDelivery::from(&event).envelope,
                attempts: state.attempts,
                last_error: state.last_error.clone(),
                next_retry_at: state.next_retry_at,
            });
        }
        Ok(batch)
    }

    async fn mark_published(&self, global_seq: u64) -> Result<(), EventStoreError> {
        let mut inner = self.lock("mark_published")?;
        let state = inner
            .outbox
            .get_mut(&global_seq)
            .ok_or_else(|| EventStoreError::NotFound(format!("outbox row {global_seq}")))?;
        state.published_at = Some(Utc::now());
        state.in_flight = false;
        Ok(())
    }

    async fn release_claim(&self, global_seq: u64) -> Result<(), EventStoreError> {
        let mut inner = self.lock("release_claim")?;
        let state = inner
            .outbox
            .get_mut(&global_seq)
            .ok_or_else(|| EventStoreError::NotFound(format!("outbox row {global_seq}")))?;
        state.in_flight = false;
        Ok(())
    }

    async fn mark_retry(
        &self,
        global_seq: u64,
        error: &str,
        delay: Duration,
    ) -> Result<u32, EventStoreError> {
        let mut inner = self.lock("mark_retry")?;
        let state = inner
            .outbox
            .get_mut(&global_seq)
            .ok_or_else(|| EventStoreError::NotFound(format!("outbox row {global_seq}")))?;
        state.attempts += 1;
        state.last_error = Some(error.to_string());
        state.next_retry_at = Some(Utc::now() + delay);
        state.in_flight = false;
        Ok(state.attempts)
    }

    async fn move_to_dlq(
        &self,
        global_seq: u64,
        error: &str,
        publisher_id: &str,
    ) -> Result<(), EventStoreError> {
        let mut inner = self.lock("move_to_dlq")?;
        let event = inner
            .log
            .get(&global_seq)
            .cloned()
            .ok_or_else(|| EventStoreError::NotFound(format!("event {global_seq}")))?;
        let state = inner
            .outbox
            .get_mut(&global_seq)
            .ok_or_else(|| EventStoreError::NotFound(format!("outbox row {global_seq}")))?;
        // Stamp published_at so the row is never fetched again.
        state.published_at = Some(Utc::now());
        state.last_error = Some(error.to_string());
        state.in_flight = false;
        inner.dlq.push(DlqEntry {
            global_seq,
            event_id: event.event_id,
            world_id: event.envelope.world_id,
            branch: event.envelope.branch.clone(),
            kind: event.envelope.kind.clone(),
            envelope: event.envelope,
            error: error.to_string(),
            publisher_id: publisher_id.to_string(),
            moved_at: Utc::now(),
        });
        Ok(())
    }

    async fn lag(&self) -> Result<OutboxLag, EventStoreError> {
        let inner = self.lock("lag")?;
        let now = Utc::now();
        let mut unpublished = 0u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        for (seq, state) in &inner.outbox {
            if state.published_at.is_some() {
                continue;
            }
            unpublished += 1;
            if let Some(event) = inner.log.get(seq) {
                let received = event.received_at;
                if oldest.map(|o| received < o).unwrap_or(true) {
                    oldest = Some(received);
                }
            }
        }
        Ok(OutboxLag {
            unpublished_events: unpublished,
            oldest_unpublished_age_seconds: oldest
                .map(|o| (now - o).num_seconds().max(0))
                .unwrap_or(0),
        })
    }

    async fn list_dlq(&self, limit: u32) -> Result<Vec<DlqEntry>, EventStoreError> {
        let inner = self.lock("list_dlq")?;
        Ok(inner
            .dlq
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
