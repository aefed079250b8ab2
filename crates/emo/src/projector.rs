//! The EMO relational projector: event handlers for the `emo.*` family.
//!
//! Handler contract:
//!
//! | event | `emo_current` | `emo_history` | `emo_links` |
//! |---|---|---|---|
//! | `emo.created` | insert v1 if absent, else no-op | insert if absent | insert parents + links |
//! | `emo.updated` | apply content/tags/mime when the payload version is greater | insert if absent | replace the set |
//! | `emo.linked`  | bump version, content untouched | insert if absent | merge |
//! | `emo.deleted` | soft-delete marks | insert keyed by idempotency key | left alone |
//!
//! Concurrent updates: the largest observed `emo_version` wins; a payload
//! whose version does not exceed the stored one leaves current state
//! untouched, so on a version tie the earlier `global_seq` holds the
//! last-writer position.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use nexus_events::{EventDelivery, StreamKey};
use nexus_projection::{ProjectionError, Projector};

use crate::model::{
    EmoCurrentRow, EmoEventPayload, EmoLinkRow, EmoOperation, EmoSource, EmoType, SourceKind,
    content_hash, emo_idempotency_key,
};
use crate::store::{EmoStore, EmoStoreError};

/// Watermark identity of the relational EMO projector.
pub const EMO_PROJECTOR_NAME: &str = "projector_emo_rel";

/// Relational lens over the EMO tables.
pub struct EmoProjector<S> {
    store: Arc<S>,
}

impl<S> EmoProjector<S>
where
    S: EmoStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Determinism hash of one EMO in its current state, or `None` when
    /// the identity is unknown.
    pub async fn determinism_hash(
        &self,
        stream: &StreamKey,
        emo_id: crate::model::EmoId,
    ) -> Result<Option<String>, EmoStoreError> {
        let Some(row) = self
            .store
            .get_current(stream.world_id, &stream.branch, emo_id)
            .await?
        else {
            return Ok(None);
        };
        let links = self
            .store
            .links_for(stream.world_id, &stream.branch, emo_id)
            .await?;
        Ok(Some(crate::model::determinism_hash(&row, &links)))
    }

    fn row_from_payload(
        &self,
        delivery: &EventDelivery,
        payload: &EmoEventPayload,
    ) -> EmoCurrentRow {
        let world_id = delivery.world_id();
        EmoCurrentRow {
            emo_id: payload.emo_id,
            world_id,
            branch: delivery.branch().to_string(),
            emo_type: payload.emo_type.unwrap_or(EmoType::Note),
            emo_version: payload.emo_version.max(1),
            tenant_id: payload.tenant_id.unwrap_or(*world_id.as_uuid()),
            content: payload.content.clone().unwrap_or_default(),
            tags: payload.tags.clone(),
            mime_type: payload
                .mime_type
                .clone()
                .unwrap_or_else(|| "text/markdown".to_string()),
            source: payload
                .source
                .clone()
                .unwrap_or_else(|| EmoSource::of_kind(SourceKind::Agent)),
            deleted: false,
            deleted_at: None,
            deletion_reason: None,
            updated_at: delivery.event_time(),
        }
    }

    fn edge_rows(&self, delivery: &EventDelivery, payload: &EmoEventPayload) -> Vec<EmoLinkRow> {
        let world_id = delivery.world_id();
        let branch = delivery.branch();
        payload
            .parents
            .iter()
            .map(|p| EmoLinkRow::from_parent(payload.emo_id, world_id, branch, p))
            .chain(
                payload
                    .links
                    .iter()
                    .map(|l| EmoLinkRow::from_link(payload.emo_id, world_id, branch, l)),
            )
            .collect()
    }

    async fn record_history(
        &self,
        delivery: &EventDelivery,
        payload: &EmoEventPayload,
        op: EmoOperation,
        hash: String,
    ) -> Result<bool, EmoStoreError> {
        let key = payload
            .idempotency_key
            .clone()
            .unwrap_or_else(|| emo_idempotency_key(payload.emo_id, payload.emo_version, op));
        self.store
            .insert_history(crate::model::EmoHistoryRow {
                emo_id: payload.emo_id,
                world_id: delivery.world_id(),
                branch: delivery.branch().to_string(),
                emo_version: payload.emo_version,
                operation: op,
                content_hash: hash,
                idempotency_key: key,
                recorded_at: delivery.event_time(),
            })
            .await
    }

    async fn handle_created(
        &self,
        delivery: &EventDelivery,
        payload: &EmoEventPayload,
    ) -> Result<(), EmoStoreError> {
        let world_id = delivery.world_id();
        let branch = delivery.branch();

        let existing = self
            .store
            .get_current(world_id, branch, payload.emo_id)
            .await?;
        if existing.is_none() {
            self.store
                .put_current(self.row_from_payload(delivery, payload))
                .await?;
        } else {
            debug!(emo_id = %payload.emo_id, "create on existing identity is a no-op");
        }

        let hash = content_hash(payload.content.as_deref().unwrap_or(""));
        self.record_history(delivery, payload, EmoOperation::Created, hash)
            .await?;

        self.store
            .merge_links(
                world_id,
                branch,
                payload.emo_id,
                self.edge_rows(delivery, payload),
            )
            .await
    }

    async fn handle_updated(
        &self,
        delivery: &EventDelivery,
        payload: &EmoEventPayload,
    ) -> Result<(), EmoStoreError> {
        let world_id = delivery.world_id();
        let branch = delivery.branch();

        let existing = self
            .store
            .get_current(world_id, branch, payload.emo_id)
            .await?;

        let wins = match existing {
            None => {
                // Update before create can arrive under at-least-once
                // delivery across streams; accept it as the first state.
                self.store
                    .put_current(self.row_from_payload(delivery, payload))
                    .await?;
                true
            }
            Some(current) if payload.emo_version > current.emo_version => {
                let mut row = current;
                if let Some(content) = &payload.content {
                    row.content = content.clone();
                }
                row.tags = payload.tags.clone();
                if let Some(mime) = &payload.mime_type {
                    row.mime_type = mime.clone();
                }
                row.emo_version = payload.emo_version;
                row.updated_at = delivery.event_time();
                self.store.put_current(row).await?;
                true
            }
            Some(current) => {
                debug!(
                    emo_id = %payload.emo_id,
                    stored = current.emo_version,
                    received = payload.emo_version,
                    "stale update ignored"
                );
                false
            }
        };

        let hash = content_hash(payload.content.as_deref().unwrap_or(""));
        self.record_history(delivery, payload, EmoOperation::Updated, hash)
            .await?;

        if wins {
            // Updates carry the full edge set; replace.
            self.store
                .replace_links(
                    world_id,
                    branch,
                    payload.emo_id,
                    self.edge_rows(delivery, payload),
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_linked(
        &self,
        delivery: &EventDelivery,
        payload: &EmoEventPayload,
    ) -> Result<(), EmoStoreError> {
        let world_id = delivery.world_id();
        let branch = delivery.branch();

        let existing = self
            .store
            .get_current(world_id, branch, payload.emo_id)
            .await?;
        match existing {
            None => {
                self.store
                    .put_current(self.row_from_payload(delivery, payload))
                    .await?;
            }
            Some(current) if payload.emo_version > current.emo_version => {
                let mut row = current;
                // Version bump only; content stays.
                row.emo_version = payload.emo_version;
                row.updated_at = delivery.event_time();
                self.store.put_current(row).await?;
            }
            Some(_) => {}
        }

        self.record_history(delivery, payload, EmoOperation::Linked, String::new())
            .await?;

        self.store
            .merge_links(
                world_id,
                branch,
                payload.emo_id,
                self.edge_rows(delivery, payload),
            )
            .await
    }

    async fn handle_deleted(
        &self,
        delivery: &EventDelivery,
        payload: &EmoEventPayload,
    ) -> Result<(), EmoStoreError> {
        let world_id = delivery.world_id();
        let branch = delivery.branch();

        let Some(current) = self
            .store
            .get_current(world_id, branch, payload.emo_id)
            .await?
        else {
            warn!(emo_id = %payload.emo_id, "delete of unknown identity ignored");
            return Ok(());
        };

        let mut row = current;
        row.deleted = true;
        row.deleted_at = Some(delivery.event_time());
        row.deletion_reason = payload.reason.clone();
        if payload.emo_version > row.emo_version {
            row.emo_version = payload.emo_version;
        }
        row.updated_at = delivery.event_time();
        self.store.put_current(row).await?;

        // Delete rows hash the empty content; edges are left in place so
        // lineage survives the soft delete.
        self.record_history(delivery, payload, EmoOperation::Deleted, String::new())
            .await?;
        Ok(())
    }
}

impl From<EmoStoreError> for ProjectionError {
    fn from(err: EmoStoreError) -> Self {
        ProjectionError::apply(err.to_string())
    }
}

#[async_trait]
impl<S> Projector for EmoProjector<S>
where
    S: EmoStore,
{
    fn name(&self) -> &str {
        EMO_PROJECTOR_NAME
    }

    fn lens(&self) -> &str {
        "rel"
    }

    #[instrument(skip(self, event), fields(global_seq = event.global_seq, kind = %event.kind()))]
    async fn apply(&self, event: &EventDelivery) -> Result<(), ProjectionError> {
        let kind = event.kind().as_str();
        if !kind.starts_with("emo.") {
            debug!("non-EMO event ignored by this lens");
            return Ok(());
        }

        let payload: EmoEventPayload =
            serde_json::from_value(event.payload().clone()).map_err(|e| {
                ProjectionError::structural(format!("malformed EMO payload: {e}"))
            })?;

        match kind {
            "emo.created" => self.handle_created(event, &payload).await?,
            "emo.updated" => self.handle_updated(event, &payload).await?,
            "emo.linked" => self.handle_linked(event, &payload).await?,
            "emo.deleted" => self.handle_deleted(event, &payload).await?,
            other => warn!(kind = other, "unknown EMO event kind ignored"),
        }
        Ok(())
    }

    async fn snapshot(&self, stream: &StreamKey) -> Result<Value, ProjectionError> {
        let current = self.store.current_rows(stream).await?;
        let history = self.store.history_rows(stream).await?;
        let links = self.store.link_rows(stream).await?;
        Ok(json!({
            "lens": "rel",
            "world_id": stream.world_id.to_string(),
            "branch": stream.branch,
            "emo_current": current,
            "emo_history": history,
            "emo_links": links,
        }))
    }

    async fn clear(&self, stream: &StreamKey) -> Result<(), ProjectionError> {
        Ok(self.store.clear_stream(stream).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmoId, EmoLink, EmoParent, LinkKind, ParentRel};
    use crate::store::InMemoryEmoStore;
    use chrono::{TimeZone, Utc};
    use nexus_core::WorldId;
    use nexus_events::{Audit, Envelope, EventKind};
    use nexus_projection::snapshot_hash;

    fn stream(world_id: WorldId) -> StreamKey {
        StreamKey {
            world_id,
            branch: "main".to_string(),
        }
    }

    fn delivery(world_id: WorldId, global_seq: u64, kind: &str, payload: EmoEventPayload) -> EventDelivery {
        let envelope = Envelope {
            world_id,
            branch: "main".to_string(),
            kind: EventKind::new(kind),
            payload: serde_json::to_value(&payload).unwrap(),
            by: Audit::agent("t"),
            version: 1,
            occurred_at: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, global_seq as u32).unwrap()),
            causation_id: None,
        };
        let enriched = envelope.enrich(payload.idempotency_key.clone());
        EventDelivery {
            global_seq,
            event_id: enriched.event_id,
            payload_hash: enriched.payload_hash.clone(),
            envelope: enriched,
        }
    }

    fn created(emo_id: EmoId, content: &str) -> EmoEventPayload {
        let mut p = EmoEventPayload::new(emo_id, 1);
        p.emo_type = Some(EmoType::Note);
        p.content = Some(content.to_string());
        p.tags = vec!["t1".to_string()];
        p.idempotency_key = Some(emo_idempotency_key(emo_id, 1, EmoOperation::Created));
        p
    }

    fn updated(emo_id: EmoId, version: u32, content: &str) -> EmoEventPayload {
        let mut p = EmoEventPayload::new(emo_id, version);
        p.content = Some(content.to_string());
        p.idempotency_key = Some(emo_idempotency_key(emo_id, version, EmoOperation::Updated));
        p
    }

    fn deleted(emo_id: EmoId, version: u32, reason: &str) -> EmoEventPayload {
        let mut p = EmoEventPayload::new(emo_id, version);
        p.reason = Some(reason.to_string());
        p.idempotency_key = Some(emo_idempotency_key(emo_id, version, EmoOperation::Deleted));
        p
    }

    fn projector() -> EmoProjector<InMemoryEmoStore> {
        EmoProjector::new(InMemoryEmoStore::arc())
    }

    #[tokio::test]
    async fn create_update_delete_lifecycle() {
        let projector = projector();
        let world = WorldId::new();
        let emo = EmoId::new();

        projector
            .apply(&delivery(world, 1, "emo.created", created(emo, "A")))
            .await
            .unwrap();
        projector
            .apply(&delivery(world, 2, "emo.updated", updated(emo, 2, "B")))
            .await
            .unwrap();
        projector
            .apply(&delivery(world, 3, "emo.deleted", deleted(emo, 3, "r")))
            .await
            .unwrap();

        let s = stream(world);
        let current = projector
            .store()
            .get_current(world, "main", emo)
            .await
            .unwrap()
            .unwrap();
        assert!(current.deleted);
        assert_eq!(current.emo_version, 3);
        assert_eq!(current.content, "B");
        assert_eq!(current.deletion_reason.as_deref(), Some("r"));

        let history = projector.store().history_rows(&s).await.unwrap();
        assert_eq!(history.len(), 3);
        let ops: Vec<&str> = history.iter().map(|h| h.operation.as_str()).collect();
        assert_eq!(ops, vec!["created", "updated", "deleted"]);
        assert_eq!(history[2].content_hash, "");

        assert!(projector.store().active_rows(&s).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_events_are_idempotent() {
        let projector = projector();
        let world = WorldId::new();
        let emo = EmoId::new();

        let create = delivery(world, 1, "emo.created", created(emo, "A"));
        projector.apply(&create).await.unwrap();
        projector.apply(&create).await.unwrap();

        let s = stream(world);
        assert_eq!(projector.store().current_rows(&s).await.unwrap().len(), 1);
        assert_eq!(projector.store().history_rows(&s).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn largest_version_wins_ties_go_to_earlier_seq() {
        let projector = projector();
        let world = WorldId::new();
        let emo = EmoId::new();

        projector
            .apply(&delivery(world, 1, "emo.created", created(emo, "A")))
            .await
            .unwrap();

        // Two concurrent updates both claiming version 2: the first one
        // applied holds the last-writer position.
        let mut second = updated(emo, 2, "from-later-writer");
        second.idempotency_key = Some("other:2:updated".to_string());
        projector
            .apply(&delivery(world, 2, "emo.updated", updated(emo, 2, "winner")))
            .await
            .unwrap();
        projector
            .apply(&delivery(world, 3, "emo.updated", second))
            .await
            .unwrap();

        let current = projector
            .store()
            .get_current(world, "main", emo)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.emo_version, 2);
        assert_eq!(current.content, "winner");
    }

    #[tokio::test]
    async fn updated_replaces_links_linked_merges() {
        let projector = projector();
        let world = WorldId::new();
        let emo = EmoId::new();
        let parent_a = EmoId::new();
        let parent_b = EmoId::new();

        let mut create = created(emo, "A");
        create.parents = vec![EmoParent {
            emo_id: parent_a,
            rel: ParentRel::Derived,
        }];
        projector
            .apply(&delivery(world, 1, "emo.created", create))
            .await
            .unwrap();

        // Update replaces the edge set wholesale.
        let mut update = updated(emo, 2, "B");
        update.links = vec![EmoLink {
            kind: LinkKind::Uri,
            target: "https://example.com".to_string(),
        }];
        projector
            .apply(&delivery(world, 2, "emo.updated", update))
            .await
            .unwrap();

        let links = projector.store().links_for(world, "main", emo).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, LinkKind::Uri);

        // Linked merges on top.
        let mut linked = EmoEventPayload::new(emo, 3);
        linked.parents = vec![EmoParent {
            emo_id: parent_b,
            rel: ParentRel::Supersedes,
        }];
        linked.idempotency_key = Some(emo_idempotency_key(emo, 3, EmoOperation::Linked));
        projector
            .apply(&delivery(world, 3, "emo.linked", linked))
            .await
            .unwrap();

        let links = projector.store().links_for(world, "main", emo).await.unwrap();
        assert_eq!(links.len(), 2);
        let current = projector
            .store()
            .get_current(world, "main", emo)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.emo_version, 3);
        assert_eq!(current.content, "B");
    }

    #[tokio::test]
    async fn delete_preserves_edges() {
        let projector = projector();
        let world = WorldId::new();
        let emo = EmoId::new();
        let parent = EmoId::new();

        let mut create = created(emo, "A");
        create.parents = vec![EmoParent {
            emo_id: parent,
            rel: ParentRel::Derived,
        }];
        projector
            .apply(&delivery(world, 1, "emo.created", create))
            .await
            .unwrap();
        projector
            .apply(&delivery(world, 2, "emo.deleted", deleted(emo, 2, "r")))
            .await
            .unwrap();

        let links = projector.store().links_for(world, "main", emo).await.unwrap();
        assert_eq!(links.len(), 1, "soft delete must keep lineage edges");
    }

    #[tokio::test]
    async fn malformed_payload_is_structural() {
        let projector = projector();
        let world = WorldId::new();
        let envelope = Envelope {
            world_id: world,
            branch: "main".to_string(),
            kind: EventKind::new("emo.created"),
            payload: serde_json::json!({"nonsense": true}),
            by: Audit::agent("t"),
            version: 1,
            occurred_at: None,
            causation_id: None,
        };
        let enriched = envelope.enrich(None);
        let bad = EventDelivery {
            global_seq: 1,
            event_id: enriched.event_id,
            payload_hash: enriched.payload_hash.clone(),
            envelope: enriched,
        };
        let err = projector.apply(&bad).await.unwrap_err();
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn two_runs_over_the_same_sequence_hash_identically() {
        let world = WorldId::new();
        let emo = EmoId::new();
        let events = |w: WorldId| {
            vec![
                delivery(w, 1, "emo.created", created(emo, "A")),
                delivery(w, 2, "emo.updated", updated(emo, 2, "B")),
                delivery(w, 3, "emo.deleted", deleted(emo, 3, "r")),
            ]
        };

        let s = stream(world);
        let first = projector();
        for e in events(world) {
            first.apply(&e).await.unwrap();
        }
        let h1 = snapshot_hash(&first.snapshot(&s).await.unwrap());

        let second = projector();
        for e in events(world) {
            second.apply(&e).await.unwrap();
        }
        let h2 = snapshot_hash(&second.snapshot(&s).await.unwrap());

        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn determinism_hash_exposed_per_emo() {
        let projector = projector();
        let world = WorldId::new();
        let emo = EmoId::new();
        projector
            .apply(&delivery(world, 1, "emo.created", created(emo, "A")))
            .await
            .unwrap();

        let s = stream(world);
        let hash = projector.determinism_hash(&s, emo).await.unwrap().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(
            projector
                .determinism_hash(&s, EmoId::new())
                .await
                .unwrap()
                .is_none()
        );
    }
}
