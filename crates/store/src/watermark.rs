//! Projector watermark persistence.
//!
//! `(projector_name, world_id, branch) → last_processed_seq`, strictly
//! non-decreasing. The watermark is the projector's committed progress
//! marker: it enables idempotent at-least-once reception, resume after a
//! crash, and deterministic rebuilds (clear and replay).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use nexus_core::WorldId;
use nexus_events::StreamKey;

use crate::error::{EventStoreError, map_sqlx_error};

/// One watermark row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Watermark {
    pub projector_name: String,
    pub world_id: WorldId,
    pub branch: String,
    pub last_processed_seq: u64,
    pub updated_at: DateTime<Utc>,
}

/// Watermark store: committed progress per `(projector, world, branch)`.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Last processed sequence, 0 when the stream is unseen.
    async fn get(&self, projector: &str, stream: &StreamKey) -> Result<u64, EventStoreError>;

    /// Advance to `MAX(current, global_seq)`. Never moves backwards.
    async fn advance(
        &self,
        projector: &str,
        stream: &StreamKey,
        global_seq: u64,
    ) -> Result<(), EventStoreError>;

    /// Remove the watermark for a stream (rebuilds only, admin bypass).
    async fn clear(&self, projector: &str, stream: &StreamKey) -> Result<(), EventStoreError>;

    /// Every tracked watermark, ordered by projector, world, branch.
    async fn list(&self) -> Result<Vec<Watermark>, EventStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WatermarkKey {
    projector: String,
    world_id: WorldId,
    branch: String,
}

/// In-memory watermark store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    marks: RwLock<HashMap<WatermarkKey, (u64, DateTime<Utc>)>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, projector: &str, stream: &StreamKey) -> Result<u64, EventStoreError> {
        let key = WatermarkKey {
            projector: projector.to_string(),
            world_id: stream.world_id,
            branch: stream.branch.clone(),
        };
        let marks = self
            .marks
            .read()
            .map_err(|_| EventStoreError::storage("watermark_get", "lock poisoned"))?;
        Ok(marks.get(&key).map(|(seq, _)| *seq).unwrap_or(0))
    }

    async fn advance(
        &self,
        projector: &str,
        stream: &StreamKey,
        global_seq: u64,
    ) -> Result<(), EventStoreError> {
        let key = WatermarkKey {
            projector: projector.to_string(),
            world_id: stream.world_id,
            branch: stream.branch.clone(),
        };
        let mut marks = self
            .marks
            .write()
            .map_err(|_| EventStoreError::storage("watermark_advance", "lock poisoned"))?;
        let entry = marks.entry(key).or_insert((0, Utc::now()));
        if global_seq > entry.0 {
            *entry = (global_seq, Utc::now());
        }
        Ok(())
    }

    async fn clear(&self, projector: &str, stream: &StreamKey) -> Result<(), EventStoreError> {
        let key = WatermarkKey {
            projector: projector.to_string(),
            world_id: stream.world_id,
            branch: stream.branch.clone(),
        };
        let mut marks = self
            .marks
            .write()
            .map_err(|_| EventStoreError::storage("watermark_clear", "lock poisoned"))?;
        marks.remove(&key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Watermark>, EventStoreError> {
        let marks = self
            .marks
            .read()
            .map_err(|_| EventStoreError::storage("watermark_list", "lock poisoned"))?;
        let mut all: Vec<Watermark> = marks
            .iter()
            .map(|(k, (seq, at))| Watermark {
                projector_name: k.projector.clone(),
                world_id: k.world_id,
                branch: k.branch.clone(),
                last_processed_seq: *seq,
                updated_at: *at,
            })
            .collect();
        all.sort_by(|a, b| {
            (&a.projector_name, a.world_id, &a.branch)
                .cmp(&(&b.projector_name, b.world_id, &b.branch))
        });
        Ok(all)
    }
}

/// Postgres-backed watermark store.
#[derive(Debug, Clone)]
pub struct PostgresWatermarkStore {
    pool: Arc<PgPool>,
}

impl PostgresWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl WatermarkStore for PostgresWatermarkStore {
    async fn get(&self, projector: &str, stream: &StreamKey) -> Result<u64, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT last_processed_seq
            FROM projector_watermarks
            WHERE projector_name = $1 AND world_id = $2 AND branch = $3
            "#,
        )
        .bind(projector)
        .bind(stream.world_id.as_uuid())
        .bind(&stream.branch)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("watermark_get", e))?;

        match row {
            Some(row) => {
                let seq: i64 = row
                    .try_get("last_processed_seq")
                    .map_err(|e| map_sqlx_error("watermark_get", e))?;
                Ok(seq as u64)
            }
            None => Ok(0),
        }
    }

    async fn advance(
        &self,
        projector: &str,
        stream: &StreamKey,
        global_seq: u64,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO projector_watermarks (
                projector_name, world_id, branch, last_processed_seq
            )
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (projector_name, world_id, branch)
            DO UPDATE SET
                last_processed_seq = GREATEST(
                    projector_watermarks.last_processed_seq,
                    EXCLUDED.last_processed_seq
                ),
                updated_at = NOW()
            "#,
        )
        .bind(projector)
        .bind(stream.world_id.as_uuid())
        .bind(&stream.branch)
        .bind(global_seq as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("watermark_advance", e))?;
        Ok(())
    }

    async fn clear(&self, projector: &str, stream: &StreamKey) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            DELETE FROM projector_watermarks
            WHERE projector_name = $1 AND world_id = $2 AND branch = $3
            "#,
        )
        .bind(projector)
        .bind(stream.world_id.as_uuid())
        .bind(&stream.branch)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("watermark_clear", e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Watermark>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT projector_name, world_id, branch, last_processed_seq, updated_at
            FROM projector_watermarks
            ORDER BY projector_name, world_id, branch
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("watermark_list", e))?;

        let mut all = Vec::with_capacity(rows.len());
        for row in rows {
            let world: uuid::Uuid = row
                .try_get("world_id")
                .map_err(|e| map_sqlx_error("watermark_list", e))?;
            let seq: i64 = row
                .try_get("last_processed_seq")
                .map_err(|e| map_sqlx_error("watermark_list", e))?;
            all.push(Watermark {
                projector_name: row
                    .try_get("projector_name")
                    .map_err(|e| map_sqlx_error("watermark_list", e))?,
                world_id: WorldId::from_uuid(world),
                branch: row
                    .try_get("branch")
                    .map_err(|e| map_sqlx_error("watermark_list", e))?,
                last_processed_seq: seq as u64,
                updated_at: row
                    .try_get("updated_at")
                    .map_err(|e| map_sqlx_error("watermark_list", e))?,
            });
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamKey {
        StreamKey {
            world_id: WorldId::new(),
            branch: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn watermark_starts_at_zero() {
        let store = InMemoryWatermarkStore::new();
        assert_eq!(store.get("p", &stream()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn advance_is_monotonic() {
        let store = InMemoryWatermarkStore::new();
        let s = stream();
        store.advance("p", &s, 5).await.unwrap();
        store.advance("p", &s, 3).await.unwrap();
        assert_eq!(store.get("p", &s).await.unwrap(), 5);
        store.advance("p", &s, 9).await.unwrap();
        assert_eq!(store.get("p", &s).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let store = InMemoryWatermarkStore::new();
        let a = stream();
        let b = StreamKey {
            world_id: a.world_id,
            branch: "other".to_string(),
        };
        store.advance("p", &a, 4).await.unwrap();
        assert_eq!(store.get("p", &b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_resets_stream() {
        let store = InMemoryWatermarkStore::new();
        let s = stream();
        store.advance("p", &s, 4).await.unwrap();
        store.clear("p", &s).await.unwrap();
        assert_eq!(store.get("p", &s).await.unwrap(), 0);
    }
}
