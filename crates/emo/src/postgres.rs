//! Postgres-backed EMO lens.
//!
//! Same contract as the in-memory store; idempotency comes from the
//! table keys (`ON CONFLICT DO NOTHING` on history and edges, keyed
//! upserts on current rows).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use nexus_core::WorldId;
use nexus_events::StreamKey;

use crate::model::{
    EmoCurrentRow, EmoHistoryRow, EmoId, EmoLinkRow, EmoOperation, EmoSource, EmoType, LinkKind,
    SourceKind,
};
use crate::store::{EmoStore, EmoStoreError};

/// Postgres EMO lens store.
#[derive(Debug, Clone)]
pub struct PostgresEmoStore {
    pool: Arc<PgPool>,
}

impl PostgresEmoStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_err(operation: &str, err: sqlx::Error) -> EmoStoreError {
    EmoStoreError::storage(operation, err.to_string())
}

fn emo_type_from_str(s: &str) -> EmoType {
    match s {
        "fact" => EmoType::Fact,
        "doc" => EmoType::Doc,
        "profile" => EmoType::Profile,
        _ => EmoType::Note,
    }
}

fn source_kind_from_str(s: &str) -> SourceKind {
    match s {
        "user" => SourceKind::User,
        "ingest" => SourceKind::Ingest,
        _ => SourceKind::Agent,
    }
}

fn operation_from_str(s: &str) -> EmoOperation {
    match s {
        "created" => EmoOperation::Created,
        "updated" => EmoOperation::Updated,
        "linked" => EmoOperation::Linked,
        _ => EmoOperation::Deleted,
    }
}

fn link_kind_from_str(s: &str) -> LinkKind {
    match s {
        "uri" => LinkKind::Uri,
        _ => LinkKind::Emo,
    }
}

fn current_from_row(row: &sqlx::postgres::PgRow) -> Result<EmoCurrentRow, EmoStoreError> {
    let get = |e: sqlx::Error| map_err("decode_emo_current", e);
    let emo_id: Uuid = row.try_get("emo_id").map_err(get)?;
    let world_id: Uuid = row.try_get("world_id").map_err(get)?;
    let emo_type: String = row.try_get("emo_type").map_err(get)?;
    let source_kind: String = row.try_get("source_kind").map_err(get)?;
    let version: i32 = row.try_get("emo_version").map_err(get)?;
    Ok(EmoCurrentRow {
        emo_id: EmoId::from_uuid(emo_id),
        world_id: WorldId::from_uuid(world_id),
        branch: row.try_get("branch").map_err(get)?,
        emo_type: emo_type_from_str(&emo_type),
        emo_version: version as u32,
        tenant_id: row.try_get("tenant_id").map_err(get)?,
        content: row.try_get("content").map_err(get)?,
        tags: row.try_get("tags").map_err(get)?,
        mime_type: row.try_get("mime_type").map_err(get)?,
        source: EmoSource {
            kind: source_kind_from_str(&source_kind),
            uri: row.try_get("source_uri").map_err(get)?,
        },
        deleted: row.try_get("deleted").map_err(get)?,
        deleted_at: row.try_get("deleted_at").map_err(get)?,
        deletion_reason: row.try_get("deletion_reason").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn history_from_row(row: &sqlx::postgres::PgRow) -> Result<EmoHistoryRow, EmoStoreError> {
    let get = |e: sqlx::Error| map_err("decode_emo_history", e);
    let emo_id: Uuid = row.try_get("emo_id").map_err(get)?;
    let world_id: Uuid = row.try_get("world_id").map_err(get)?;
    let operation: String = row.try_get("operation").map_err(get)?;
    let version: i32 = row.try_get("emo_version").map_err(get)?;
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(get)?;
    Ok(EmoHistoryRow {
        emo_id: EmoId::from_uuid(emo_id),
        world_id: WorldId::from_uuid(world_id),
        branch: row.try_get("branch").map_err(get)?,
        emo_version: version as u32,
        operation: operation_from_str(&operation),
        content_hash: row.try_get("content_hash").map_err(get)?,
        idempotency_key: row.try_get("idempotency_key").map_err(get)?,
        recorded_at,
    })
}

fn link_from_row(row: &sqlx::postgres::PgRow) -> Result<EmoLinkRow, EmoStoreError> {
    let get = |e: sqlx::Error| map_err("decode_emo_link", e);
    let emo_id: Uuid = row.try_get("emo_id").map_err(get)?;
    let world_id: Uuid = row.try_get("world_id").map_err(get)?;
    let kind: String = row.try_get("kind").map_err(get)?;
    Ok(EmoLinkRow {
        emo_id: EmoId::from_uuid(emo_id),
        world_id: WorldId::from_uuid(world_id),
        branch: row.try_get("branch").map_err(get)?,
        rel: row.try_get("rel").map_err(get)?,
        kind: link_kind_from_str(&kind),
        target: row.try_get("ref").map_err(get)?,
    })
}

#[async_trait]
impl EmoStore for PostgresEmoStore {
    async fn get_current(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
    ) -> Result<Option<EmoCurrentRow>, EmoStoreError> {
        let row = sqlx::query(
            r#"
            SELECT emo_id, world_id, branch, emo_type, emo_version, tenant_id,
                   content, tags, mime_type, source_kind, source_uri,
                   deleted, deleted_at, deletion_reason, updated_at
            FROM emo_current
            WHERE emo_id = $1 AND world_id = $2 AND branch = $3
            "#,
        )
        .bind(emo_id.as_uuid())
        .bind(world_id.as_uuid())
        .bind(branch)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_err("get_current", e))?;

        row.as_ref().map(current_from_row).transpose()
    }

    async fn put_current(&self, row: EmoCurrentRow) -> Result<(), EmoStoreError> {
        sqlx::query(
            r#"
            INSERT INTO emo_current (
                emo_id, world_id, branch, emo_type, emo_version, tenant_id,
                content, tags, mime_type, source_kind, source_uri,
                deleted, deleted_at, deletion_reason, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (emo_id, world_id, branch)
            DO UPDATE SET
                emo_type = EXCLUDED.emo_type,
                emo_version = EXCLUDED.emo_version,
                tenant_id = EXCLUDED.tenant_id,
                content = EXCLUDED.content,
                tags = EXCLUDED.tags,
                mime_type = EXCLUDED.mime_type,
                source_kind = EXCLUDED.source_kind,
                source_uri = EXCLUDED.source_uri,
                deleted = EXCLUDED.deleted,
                deleted_at = EXCLUDED.deleted_at,
                deletion_reason = EXCLUDED.deletion_reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(row.emo_id.as_uuid())
        .bind(row.world_id.as_uuid())
        .bind(&row.branch)
        .bind(row.emo_type.as_str())
        .bind(row.emo_version as i32)
        .bind(row.tenant_id)
        .bind(&row.content)
        .bind(&row.tags)
        .bind(&row.mime_type)
        .bind(row.source.kind.as_str())
        .bind(&row.source.uri)
        .bind(row.deleted)
        .bind(row.deleted_at)
        .bind(&row.deletion_reason)
        .bind(row.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_err("put_current", e))?;
        Ok(())
    }

    async fn insert_history(&self, row: EmoHistoryRow) -> Result<bool, EmoStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO emo_history (
                emo_id, world_id, branch, emo_version, operation,
                content_hash, idempotency_key, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(row.emo_id.as_uuid())
        .bind(row.world_id.as_uuid())
        .bind(&row.branch)
        .bind(row.emo_version as i32)
        .bind(row.operation.as_str())
        .bind(&row.content_hash)
        .bind(&row.idempotency_key)
        .bind(row.recorded_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_err("insert_history", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_links(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
        rows: Vec<EmoLinkRow>,
    ) -> Result<(), EmoStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_err("replace_links", e))?;

        sqlx::query(
            "DELETE FROM emo_links WHERE emo_id = $1 AND world_id = $2 AND branch = $3",
        )
        .bind(emo_id.as_uuid())
        .bind(world_id.as_uuid())
        .bind(branch)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_err("replace_links", e))?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO emo_links (emo_id, world_id, branch, rel, kind, ref)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.emo_id.as_uuid())
            .bind(row.world_id.as_uuid())
            .bind(&row.branch)
            .bind(&row.rel)
            .bind(row.kind.as_str())
            .bind(&row.target)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("replace_links", e))?;
        }

        tx.commit().await.map_err(|e| map_err("replace_links", e))
    }

    async fn merge_links(
        &self,
        _world_id: WorldId,
        _branch: &str,
        _emo_id: EmoId,
        rows: Vec<EmoLinkRow>,
    ) -> Result<(), EmoStoreError> {
        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO emo_links (emo_id, world_id, branch, rel, kind, ref)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(row.emo_id.as_uuid())
            .bind(row.world_id.as_uuid())
            .bind(&row.branch)
            .bind(&row.rel)
            .bind(row.kind.as_str())
            .bind(&row.target)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_err("merge_links", e))?;
        }
        Ok(())
    }

    async fn links_for(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
    ) -> Result<Vec<EmoLinkRow>, EmoStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT emo_id, world_id, branch, rel, kind, ref
            FROM emo_links
            WHERE emo_id = $1 AND world_id = $2 AND branch = $3
            ORDER BY rel, kind, ref
            "#,
        )
        .bind(emo_id.as_uuid())
        .bind(world_id.as_uuid())
        .bind(branch)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_err("links_for", e))?;

        rows.iter().map(link_from_row).collect()
    }

    async fn current_rows(&self, stream: &StreamKey) -> Result<Vec<EmoCurrentRow>, EmoStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT emo_id, world_id, branch, emo_type, emo_version, tenant_id,
                   content, tags, mime_type, source_kind, source_uri,
                   deleted, deleted_at, deletion_reason, updated_at
            FROM emo_current
            WHERE world_id = $1 AND branch = $2
            ORDER BY emo_id
            "#,
        )
        .bind(stream.world_id.as_uuid())
        .bind(&stream.branch)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_err("current_rows", e))?;

        rows.iter().map(current_from_row).collect()
    }

    async fn history_rows(&self, stream: &StreamKey) -> Result<Vec<EmoHistoryRow>, EmoStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT emo_id, world_id, branch, emo_version, operation,
                   content_hash, idempotency_key, recorded_at
            FROM emo_history
            WHERE world_id = $1 AND branch = $2
            ORDER BY emo_id, emo_version, operation
            "#,
        )
        .bind(stream.world_id.as_uuid())
        .bind(&stream.branch)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_err("history_rows", e))?;

        rows.iter().map(history_from_row).collect()
    }

    async fn link_rows(&self, stream: &StreamKey) -> Result<Vec<EmoLinkRow>, EmoStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT emo_id, world_id, branch, rel, kind, ref
            FROM emo_links
            WHERE world_id = $1 AND branch = $2
            ORDER BY emo_id, rel, kind, ref
            "#,
        )
        .bind(stream.world_id.as_uuid())
        .bind(&stream.branch)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_err("link_rows", e))?;

        rows.iter().map(link_from_row).collect()
    }

    async fn clear_stream(&self, stream: &StreamKey) -> Result<(), EmoStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_err("clear_stream", e))?;

        for table in ["emo_links", "emo_history", "emo_current"] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE world_id = $1 AND branch = $2"
            ))
            .bind(stream.world_id.as_uuid())
            .bind(&stream.branch)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_err("clear_stream", e))?;
        }

        tx.commit().await.map_err(|e| map_err("clear_stream", e))
    }
}
