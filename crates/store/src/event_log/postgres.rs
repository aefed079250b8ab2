//! Postgres-backed event log + outbox.
//!
//! Append-only semantics and tenant isolation are enforced at the database
//! level: every query carries `world_id` in its WHERE clause, and each
//! connection additionally sets `app.world_id` so row-level security
//! policies apply as a second layer. `global_seq` comes from the table's
//! sequence inside the append transaction, making the store the sole
//! assigner.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL code | Mapped to | Scenario |
//! |------------|-----------------|-----------|----------|
//! | Database (unique violation) | `23505` | `IdempotencyConflict` | Concurrent append with the same idempotency tuple |
//! | Database (other) | any | `Storage` | Constraint/driver failures |
//! | PoolClosed / RowNotFound / other | n/a | `Storage` | Pool shutdown, network errors |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use nexus_core::{EventId, WorldId};
use nexus_events::{EnrichedEnvelope, Envelope, EventKind, RecordedEvent};

use super::r#trait::{EventFilter, EventLog, EventPage};
use crate::error::{EventStoreError, is_unique_violation, map_sqlx_error};
use crate::outbox::{DlqEntry, Outbox, OutboxEntry, OutboxLag};
use crate::tenancy::{WorldContext, set_world_context};

/// How long a fetched outbox row stays invisible to other claimers.
const CLAIM_LEASE_SECONDS: i64 = 60;

/// Postgres-backed log + outbox store.
///
/// Uses the SQLx connection pool; `Clone` is cheap and all operations are
/// safe to share across tasks.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_by_idempotency_key(
        tx: &mut Transaction<'_, Postgres>,
        world_id: WorldId,
        branch: &str,
        key: &str,
    ) -> Result<Option<RecordedEvent>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT global_seq, event_id, received_at, payload_hash, idempotency_key, envelope
            FROM event_log
            WHERE world_id = $1 AND branch = $2 AND idempotency_key = $3
            "#,
        )
        .bind(world_id.as_uuid())
        .bind(branch)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("idempotency_lookup", e))?;

        row.map(recorded_from_row).transpose()
    }
}

fn recorded_from_row(row: sqlx::postgres::PgRow) -> Result<RecordedEvent, EventStoreError> {
    let global_seq: i64 = row
        .try_get("global_seq")
        .map_err(|e| map_sqlx_error("decode_event_row", e))?;
    let event_id: uuid::Uuid = row
        .try_get("event_id")
        .map_err(|e| map_sqlx_error("decode_event_row", e))?;
    let received_at: DateTime<Utc> = row
        .try_get("received_at")
        .map_err(|e| map_sqlx_error("decode_event_row", e))?;
    let payload_hash: String = row
        .try_get("payload_hash")
        .map_err(|e| map_sqlx_error("decode_event_row", e))?;
    let idempotency_key: Option<String> = row
        .try_get("idempotency_key")
        .map_err(|e| map_sqlx_error("decode_event_row", e))?;
    let envelope_json: serde_json::Value = row
        .try_get("envelope")
        .map_err(|e| map_sqlx_error("decode_event_row", e))?;
    let envelope: Envelope = serde_json::from_value(envelope_json).map_err(|e| {
        EventStoreError::storage("decode_event_row", format!("envelope decode failed: {e}"))
    })?;

    Ok(RecordedEvent {
        global_seq: global_seq as u64,
        event_id: EventId::from_uuid(event_id),
        received_at,
        payload_hash,
        idempotency_key,
        envelope,
    })
}

#[async_trait]
impl EventLog for PostgresEventStore {
    /// Append log row + outbox row in one transaction.
    #[instrument(
        skip(self, ctx, enriched),
        fields(
            world_id = %enriched.envelope.world_id,
            branch = %enriched.envelope.branch,
            kind = %enriched.envelope.kind,
        ),
        err
    )]
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

        let span = Span::current();
        span.record("operation", "append_event");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        set_world_context(&mut tx, ctx)
            .await
            .map_err(|e| map_sqlx_error("set_world_context", e))?;

        if let Some(key) = &enriched.idempotency_key {
            if let Some(existing) =
                Self::find_by_idempotency_key(&mut tx, world_id, &enriched.envelope.branch, key)
                    .await?
            {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(EventStoreError::IdempotencyConflict {
                    key: key.clone(),
                    existing: Box::new(existing),
                });
            }
        }

        let envelope_json = serde_json::to_value(&enriched.envelope).map_err(|e| {
            EventStoreError::storage("append_event", format!("envelope encode failed: {e}"))
        })?;

        let insert = sqlx::query(
            r#"
            INSERT INTO event_log (
                event_id, world_id, branch, kind, envelope,
                occurred_at, received_at, payload_hash, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING global_seq
            "#,
        )
        .bind(enriched.event_id.as_uuid())
        .bind(world_id.as_uuid())
        .bind(&enriched.envelope.branch)
        .bind(enriched.envelope.kind.as_str())
        .bind(&envelope_json)
        .bind(enriched.envelope.occurred_at)
        .bind(enriched.received_at)
        .bind(&enriched.payload_hash)
        .bind(&enriched.idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let global_seq: i64 = match insert {
            Ok(row) => row
                .try_get("global_seq")
                .map_err(|e| map_sqlx_error("append_event", e))?,
            Err(e) if is_unique_violation(&e) => {
                // Lost an idempotency race; the winner's row is authoritative.
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                if let Some(key) = &enriched.idempotency_key {
                    let mut retry_tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|e| map_sqlx_error("begin_transaction", e))?;
                    if let Some(existing) = Self::find_by_idempotency_key(
                        &mut retry_tx,
                        world_id,
                        &enriched.envelope.branch,
                        key,
                    )
                    .await?
                    {
                        return Err(EventStoreError::IdempotencyConflict {
                            key: key.clone(),
                            existing: Box::new(existing),
                        });
                    }
                }
                return Err(map_sqlx_error("append_event", e));
            }
            Err(e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(map_sqlx_error("append_event", e));
            }
        };

        let enriched_json = serde_json::to_value(&enriched).map_err(|e| {
            EventStoreError::storage("append_event", format!("outbox encode failed: {e}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO event_outbox (
                global_seq, world_id, branch, kind, envelope, payload_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(global_seq)
        .bind(world_id.as_uuid())
        .bind(&enriched.envelope.branch)
        .bind(enriched.envelope.kind.as_str())
        .bind(&enriched_json)
        .bind(&enriched.payload_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_outbox", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        span.record("global_seq", global_seq);
        Ok(RecordedEvent::from_enriched(enriched, global_seq as u64))
    }

    #[instrument(skip(self, ctx, filter), fields(branch = %branch), err)]
    async fn list_events(
        &self,
        ctx: &WorldContext,
        branch: &str,
        filter: EventFilter,
    ) -> Result<EventPage, EventStoreError> {
        let Some(world_id) = ctx.world_id() else {
            // Missing world context reads the empty set.
            return Ok(EventPage {
                items: vec![],
                next_after_global_seq: None,
                has_more: false,
            });
        };

        let limit = filter.effective_limit();
        let kind = filter.kind.as_ref().map(|k| k.as_str().to_string());
        let after = filter.after_global_seq.unwrap_or(0) as i64;

        // Fetch one extra row to detect whether more pages exist.
        let rows = sqlx::query(
            r#"
            SELECT global_seq, event_id, received_at, payload_hash, idempotency_key, envelope
            FROM event_log
            WHERE world_id = $1
                AND branch = $2
                AND global_seq > $3
                AND ($4::text IS NULL OR kind = $4)
            ORDER BY global_seq ASC
            LIMIT $5
            "#,
        )
        .bind(world_id.as_uuid())
        .bind(branch)
        .bind(after)
        .bind(kind)
        .bind((limit + 1) as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_events", e))?;

        let has_more = rows.len() > limit as usize;
        let mut items = Vec::with_capacity(rows.len().min(limit as usize));
        for row in rows.into_iter().take(limit as usize) {
            items.push(recorded_from_row(row)?);
        }

        Ok(EventPage {
            next_after_global_seq: items.last().map(|e| e.global_seq),
            items,
            has_more,
        })
    }

    #[instrument(skip(self, ctx), fields(event_id = %event_id), err)]
    async fn get_event(
        &self,
        ctx: &WorldContext,
        event_id: EventId,
    ) -> Result<Option<RecordedEvent>, EventStoreError> {
        let Some(world_id) = ctx.world_id() else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT global_seq, event_id, received_at, payload_hash, idempotency_key, envelope
            FROM event_log
            WHERE world_id = $1 AND event_id = $2
            LIMIT 1
            "#,
        )
        .bind(world_id.as_uuid())
        .bind(event_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_event", e))?;

        row.map(recorded_from_row).transpose()
    }

    async fn latest_global_seq(&self) -> Result<u64, EventStoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(global_seq), 0) AS latest FROM event_log")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_global_seq", e))?;
        let latest: i64 = row
            .try_get("latest")
            .map_err(|e| map_sqlx_error("latest_global_seq", e))?;
        Ok(latest as u64)
    }

    async fn count_events_from(
        &self,
        ctx: &WorldContext,
        branch: &str,
        from_seq: u64,
    ) -> Result<u64, EventStoreError> {
        let Some(world_id) = ctx.world_id() else {
            return Ok(0);
        };
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM event_log
            WHERE world_id = $1 AND branch = $2 AND global_seq >= $3
            "#,
        )
        .bind(world_id.as_uuid())
        .bind(branch)
        .bind(from_seq as i64)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_events_from", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_events_from", e))?;
        Ok(total as u64)
    }
}

fn outbox_entry_from_row(row: sqlx::postgres::PgRow) -> Result<OutboxEntry, EventStoreError> {
    let global_seq: i64 = row
        .try_get("global_seq")
        .map_err(|e| map_sqlx_error("decode_outbox_row", e))?;
    let attempts: i32 = row
        .try_get("attempts")
        .map_err(|e| map_sqlx_error("decode_outbox_row", e))?;
    let last_error: Option<String> = row
        .try_get("last_error")
        .map_err(|e| map_sqlx_error("decode_outbox_row", e))?;
    let next_retry_at: Option<DateTime<Utc>> = row
        .try_get("next_retry_at")
        .map_err(|e| map_sqlx_error("decode_outbox_row", e))?;
    let enriched_json: serde_json::Value = row
        .try_get("envelope")
        .map_err(|e| map_sqlx_error("decode_outbox_row", e))?;
    let enriched: EnrichedEnvelope = serde_json::from_value(enriched_json).map_err(|e| {
        EventStoreError::storage("decode_outbox_row", format!("envelope decode failed: {e}"))
    })?;

    Ok(OutboxEntry {
        global_seq: global_seq as u64,
        envelope: enriched,
        attempts: attempts as u32,
        last_error,
        next_retry_at,
    })
}

#[async_trait]
impl Outbox for PostgresEventStore {
    /// Claim due rows with skip-locked semantics; the lease keeps a second
    /// publisher from double-claiming while deliveries are in flight.
    #[instrument(skip(self), err)]
    async fn fetch_unpublished(
        &self,
        batch_size: u32,
    ) -> Result<Vec<OutboxEntry>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT global_seq
                FROM event_outbox
                WHERE published_at IS NULL
                    AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                    AND (claimed_until IS NULL OR claimed_until < NOW())
                ORDER BY global_seq ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE event_outbox o
            SET claimed_until = NOW() + make_interval(secs => $2)
            FROM due
            WHERE o.global_seq = due.global_seq
            RETURNING o.global_seq, o.envelope, o.attempts, o.last_error, o.next_retry_at
            "#,
        )
        .bind(batch_size as i64)
        .bind(CLAIM_LEASE_SECONDS as f64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_unpublished", e))?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            batch.push(outbox_entry_from_row(row)?);
        }
        // The UPDATE … RETURNING order is unspecified; restore seq order.
        batch.sort_by_key(|e| e.global_seq);
        Ok(batch)
    }

    async fn mark_published(&self, global_seq: u64) -> Result<(), EventStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE event_outbox
            SET published_at = NOW(), claimed_until = NULL
            WHERE global_seq = $1
            "#,
        )
        .bind(global_seq as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_published", e))?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::NotFound(format!("outbox row {global_seq}")));
        }
        Ok(())
    }

    async fn release_claim(&self, global_seq: u64) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            UPDATE event_outbox
            SET claimed_until = NULL
            WHERE global_seq = $1 AND published_at IS NULL
            "#,
        )
        .bind(global_seq as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_claim", e))?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        global_seq: u64,
        error: &str,
        delay: Duration,
    ) -> Result<u32, EventStoreError> {
        let next_retry_at = Utc::now() + delay;
        let row = sqlx::query(
            r#"
            UPDATE event_outbox
            SET attempts = attempts + 1,
                last_error = $2,
                next_retry_at = $3,
                claimed_until = NULL
            WHERE global_seq = $1
            RETURNING attempts
            "#,
        )
        .bind(global_seq as i64)
        .bind(error)
        .bind(next_retry_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_retry", e))?;

        let row =
            row.ok_or_else(|| EventStoreError::NotFound(format!("outbox row {global_seq}")))?;
        let attempts: i32 = row
            .try_get("attempts")
            .map_err(|e| map_sqlx_error("mark_retry", e))?;
        Ok(attempts as u32)
    }

    #[instrument(skip(self), fields(publisher_id = %publisher_id), err)]
    async fn move_to_dlq(
        &self,
        global_seq: u64,
        error: &str,
        publisher_id: &str,
    ) -> Result<(), EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO event_dlq (
                global_seq, world_id, branch, kind, envelope, error, publisher_id
            )
            SELECT global_seq, world_id, branch, kind, envelope, $2, $3
            FROM event_outbox
            WHERE global_seq = $1
            ON CONFLICT (global_seq) DO NOTHING
            "#,
        )
        .bind(global_seq as i64)
        .bind(error)
        .bind(publisher_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_dlq", e))?;

        // published_at stamps the row out of the fetch predicate for good.
        let result = sqlx::query(
            r#"
            UPDATE event_outbox
            SET published_at = NOW(), last_error = $2, claimed_until = NULL
            WHERE global_seq = $1
            "#,
        )
        .bind(global_seq as i64)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("move_to_dlq", e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::NotFound(format!("outbox row {global_seq}")));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn lag(&self) -> Result<OutboxLag, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS unpublished,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::bigint, 0) AS oldest_age
            FROM event_outbox
            WHERE published_at IS NULL
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("outbox_lag", e))?;

        let unpublished: i64 = row
            .try_get("unpublished")
            .map_err(|e| map_sqlx_error("outbox_lag", e))?;
        let oldest_age: i64 = row
            .try_get("oldest_age")
            .map_err(|e| map_sqlx_error("outbox_lag", e))?;

        Ok(OutboxLag {
            unpublished_events: unpublished as u64,
            oldest_unpublished_age_seconds: oldest_age.max(0),
        })
    }

    async fn list_dlq(&self, limit: u32) -> Result<Vec<DlqEntry>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT global_seq, world_id, branch, kind, envelope, error, publisher_id, moved_at
            FROM event_dlq
            ORDER BY moved_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dlq", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let global_seq: i64 = row
                .try_get("global_seq")
                .map_err(|e| map_sqlx_error("list_dlq", e))?;
            let enriched_json: serde_json::Value = row
                .try_get("envelope")
                .map_err(|e| map_sqlx_error("list_dlq", e))?;
            let enriched: EnrichedEnvelope =
                serde_json::from_value(enriched_json).map_err(|e| {
                    EventStoreError::storage("list_dlq", format!("envelope decode failed: {e}"))
                })?;
            let kind: String = row
                .try_get("kind")
                .map_err(|e| map_sqlx_error("list_dlq", e))?;
            let world: uuid::Uuid = row
                .try_get("world_id")
                .map_err(|e| map_sqlx_error("list_dlq", e))?;
            entries.push(DlqEntry {
                global_seq: global_seq as u64,
                event_id: enriched.event_id,
                world_id: WorldId::from_uuid(world),
                branch: row
                    .try_get("branch")
                    .map_err(|e| map_sqlx_error("list_dlq", e))?,
                kind: EventKind::new(kind),
                envelope: enriched.envelope,
                error: row
                    .try_get("error")
                    .map_err(|e| map_sqlx_error("list_dlq", e))?,
                publisher_id: row
                    .try_get("publisher_id")
                    .map_err(|e| map_sqlx_error("list_dlq", e))?,
                moved_at: row
                    .try_get("moved_at")
                    .map_err(|e| map_sqlx_error("list_dlq", e))?,
            });
        }
        Ok(entries)
    }
}
