//! EMO lens storage: trait plus the in-memory implementation.
//!
//! The lens owns three tables: `emo_current` (one row per identity),
//! `emo_history` (append-only per version), `emo_links` (edges).
//! `emo_active` is derived: current rows with `deleted = false`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use nexus_core::WorldId;
use nexus_events::StreamKey;

use crate::model::{EmoCurrentRow, EmoHistoryRow, EmoId, EmoLinkRow};

/// EMO lens storage error.
#[derive(Debug, Error)]
pub enum EmoStoreError {
    #[error("storage error in {operation}: {message}")]
    Storage { operation: String, message: String },
}

impl EmoStoreError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Storage contract for the EMO relational lens.
#[async_trait]
pub trait EmoStore: Send + Sync {
    /// Latest state for one identity, deleted rows included.
    async fn get_current(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
    ) -> Result<Option<EmoCurrentRow>, EmoStoreError>;

    /// Upsert the current row for its identity.
    async fn put_current(&self, row: EmoCurrentRow) -> Result<(), EmoStoreError>;

    /// Append one history row; returns `false` when a row with the same
    /// idempotency key already exists (replay no-op).
    async fn insert_history(&self, row: EmoHistoryRow) -> Result<bool, EmoStoreError>;

    /// Replace all edges of an identity with the given set.
    async fn replace_links(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
        rows: Vec<EmoLinkRow>,
    ) -> Result<(), EmoStoreError>;

    /// Merge new edges into an identity's set (duplicates ignored).
    async fn merge_links(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
        rows: Vec<EmoLinkRow>,
    ) -> Result<(), EmoStoreError>;

    /// All edges of one identity.
    async fn links_for(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
    ) -> Result<Vec<EmoLinkRow>, EmoStoreError>;

    /// All current rows of a stream, ordered by `emo_id`.
    async fn current_rows(&self, stream: &StreamKey) -> Result<Vec<EmoCurrentRow>, EmoStoreError>;

    /// All history rows of a stream, ordered by `(emo_id, version, op)`.
    async fn history_rows(&self, stream: &StreamKey) -> Result<Vec<EmoHistoryRow>, EmoStoreError>;

    /// All edges of a stream, ordered by `(emo_id, rel, kind, target)`.
    async fn link_rows(&self, stream: &StreamKey) -> Result<Vec<EmoLinkRow>, EmoStoreError>;

    /// Live rows only: `emo_current WHERE NOT deleted`.
    async fn active_rows(&self, stream: &StreamKey) -> Result<Vec<EmoCurrentRow>, EmoStoreError> {
        let mut rows = self.current_rows(stream).await?;
        rows.retain(|r| !r.deleted);
        Ok(rows)
    }

    /// Drop all lens rows for a stream (rebuilds only).
    async fn clear_stream(&self, stream: &StreamKey) -> Result<(), EmoStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct IdentityKey {
    world_id: WorldId,
    branch: String,
    emo_id: EmoId,
}

impl IdentityKey {
    fn new(world_id: WorldId, branch: &str, emo_id: EmoId) -> Self {
        Self {
            world_id,
            branch: branch.to_string(),
            emo_id,
        }
    }

    fn in_stream(&self, stream: &StreamKey) -> bool {
        self.world_id == stream.world_id && self.branch == stream.branch
    }
}

#[derive(Debug, Default)]
struct Inner {
    current: BTreeMap<IdentityKey, EmoCurrentRow>,
    history: BTreeMap<IdentityKey, Vec<EmoHistoryRow>>,
    history_keys: HashMap<(WorldId, String), BTreeSet<String>>,
    links: BTreeMap<IdentityKey, Vec<EmoLinkRow>>,
}

/// In-memory EMO lens for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEmoStore {
    inner: RwLock<Inner>,
}

impl InMemoryEmoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self, op: &str) -> Result<std::sync::RwLockReadGuard<'_, Inner>, EmoStoreError> {
        self.inner
            .read()
            .map_err(|_| EmoStoreError::storage(op, "lock poisoned"))
    }

    fn write(&self, op: &str) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, EmoStoreError> {
        self.inner
            .write()
            .map_err(|_| EmoStoreError::storage(op, "lock poisoned"))
    }
}

fn sort_links(rows: &mut [EmoLinkRow]) {
    rows.sort_by(|a, b| {
        (&a.rel, a.kind.as_str(), &a.target).cmp(&(&b.rel, b.kind.as_str(), &b.target))
    });
}

#[async_trait]
impl EmoStore for InMemoryEmoStore {
    async fn get_current(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
    ) -> Result<Option<EmoCurrentRow>, EmoStoreError> {
        let inner = self.read("get_current")?;
        Ok(inner
            .current
            .get(&IdentityKey::new(world_id, branch, emo_id))
            .cloned())
    }

    async fn put_current(&self, row: EmoCurrentRow) -> Result<(), EmoStoreError> {
        let mut inner = self.write("put_current")?;
        let key = IdentityKey::new(row.world_id, &row.branch, row.emo_id);
        inner.current.insert(key, row);
        Ok(())
    }

    async fn insert_history(&self, row: EmoHistoryRow) -> Result<bool, EmoStoreError> {
        let mut inner = self.write("insert_history")?;
        let key = IdentityKey::new(row.world_id, &row.branch, row.emo_id);

        // Same uniqueness as the table keys: one row per idempotency key,
        // one row per (identity, version, operation).
        let version_taken = inner
            .history
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .any(|r| r.emo_version == row.emo_version && r.operation == row.operation)
            })
            .unwrap_or(false);
        if version_taken {
            return Ok(false);
        }

        let scope = (row.world_id, row.branch.clone());
        let keys = inner.history_keys.entry(scope).or_default();
        if !keys.insert(row.idempotency_key.clone()) {
            return Ok(false);
        }
        inner.history.entry(key).or_default().push(row);
        Ok(true)
    }

    async fn replace_links(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
        mut rows: Vec<EmoLinkRow>,
    ) -> Result<(), EmoStoreError> {
        let mut inner = self.write("replace_links")?;
        let key = IdentityKey::new(world_id, branch, emo_id);
        sort_links(&mut rows);
        rows.dedup();
        inner.links.insert(key, rows);
        Ok(())
    }

    async fn merge_links(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
        rows: Vec<EmoLinkRow>,
    ) -> Result<(), EmoStoreError> {
        let mut inner = self.write("merge_links")?;
        let key = IdentityKey::new(world_id, branch, emo_id);
        let existing = inner.links.entry(key).or_default();
        for row in rows {
            if !existing.contains(&row) {
                existing.push(row);
            }
        }
        sort_links(existing);
        Ok(())
    }

    async fn links_for(
        &self,
        world_id: WorldId,
        branch: &str,
        emo_id: EmoId,
    ) -> Result<Vec<EmoLinkRow>, EmoStoreError> {
        let inner = self.read("links_for")?;
        Ok(inner
            .links
            .get(&IdentityKey::new(world_id, branch, emo_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn current_rows(&self, stream: &StreamKey) -> Result<Vec<EmoCurrentRow>, EmoStoreError> {
        let inner = self.read("current_rows")?;
        Ok(inner
            .current
            .iter()
            .filter(|(k, _)| k.in_stream(stream))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn history_rows(&self, stream: &StreamKey) -> Result<Vec<EmoHistoryRow>, EmoStoreError> {
        let inner = self.read("history_rows")?;
        let mut rows: Vec<EmoHistoryRow> = inner
            .history
            .iter()
            .filter(|(k, _)| k.in_stream(stream))
            .flat_map(|(_, v)| v.iter().cloned())
            .collect();
        rows.sort_by(|a, b| {
            (a.emo_id, a.emo_version, a.operation.as_str())
                .cmp(&(b.emo_id, b.emo_version, b.operation.as_str()))
        });
        Ok(rows)
    }

    async fn link_rows(&self, stream: &StreamKey) -> Result<Vec<EmoLinkRow>, EmoStoreError> {
        let inner = self.read("link_rows")?;
        let mut rows: Vec<EmoLinkRow> = inner
            .links
            .iter()
            .filter(|(k, _)| k.in_stream(stream))
            .flat_map(|(_, v)| v.iter().cloned())
            .collect();
        rows.sort_by(|a, b| {
            (a.emo_id, &a.rel, a.kind.as_str(), &a.target)
                .cmp(&(b.emo_id, &b.rel, b.kind.as_str(), &b.target))
        });
        Ok(rows)
    }

    async fn clear_stream(&self, stream: &StreamKey) -> Result<(), EmoStoreError> {
        let mut inner = self.write("clear_stream")?;
        inner.current.retain(|k, _| !k.in_stream(stream));
        inner.history.retain(|k, _| !k.in_stream(stream));
        inner
            .history_keys
            .remove(&(stream.world_id, stream.branch.clone()));
        inner.links.retain(|k, _| !k.in_stream(stream));
        Ok(())
    }
}
