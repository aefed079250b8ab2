//! Memory → EMO translator.
//!
//! A projector that subscribes to `memory.*` events and appends equivalent
//! `emo.*` events to the same log, preserving identity determinism
//! (`emo_id = UUIDv5(ns, "memory:{id}")`) and version tracking across
//! restarts (the version cache falls back to the EMO lens).
//!
//! No compaction: every memory event keeps its `emo.*` counterpart, and
//! existing `memory.*` consumers are untouched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use nexus_core::ChangeId;
use nexus_events::{Envelope, EventDelivery, EventKind, StreamKey};
use nexus_projection::{ProjectionError, Projector};
use nexus_store::{EventLog, EventStoreError, WorldContext};

use nexus_emo::{
    EmoEventPayload, EmoId, EmoLink, EmoOperation, EmoParent, EmoSource, EmoStore, EmoType,
    LinkKind, ParentRel, SourceKind, emo_idempotency_key,
};

/// Watermark identity of the translator.
pub const TRANSLATOR_NAME: &str = "translator_memory_to_emo";

/// Content above this length reads as a document.
const DOC_CONTENT_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VersionKey {
    emo_id: EmoId,
    stream: StreamKey,
}

/// Translator shim: consumes `memory.*`, emits `emo.*`.
pub struct MemoryToEmoTranslator<L, S> {
    log: Arc<L>,
    emo_lens: Arc<S>,
    versions: RwLock<HashMap<VersionKey, u32>>,
}

impl<L, S> MemoryToEmoTranslator<L, S>
where
    L: EventLog,
    S: EmoStore,
{
    pub fn new(log: Arc<L>, emo_lens: Arc<S>) -> Self {
        Self {
            log,
            emo_lens,
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Current version of an EMO identity: cache first, then the lens.
    /// 0 means the identity has never been seen.
    async fn current_version(&self, emo_id: EmoId, stream: &StreamKey) -> u32 {
        let key = VersionKey {
            emo_id,
            stream: stream.clone(),
        };
        if let Ok(cache) = self.versions.read() {
            if let Some(v) = cache.get(&key) {
                return *v;
            }
        }
        match self
            .emo_lens
            .get_current(stream.world_id, &stream.branch, emo_id)
            .await
        {
            Ok(Some(row)) => {
                let v = row.emo_version;
                self.cache_version(emo_id, stream, v);
                v
            }
            Ok(None) => 0,
            Err(e) => {
                warn!(emo_id = %emo_id, error = %e, "version lookup failed; treating as unseen");
                0
            }
        }
    }

    fn cache_version(&self, emo_id: EmoId, stream: &StreamKey, version: u32) {
        if let Ok(mut cache) = self.versions.write() {
            cache.insert(
                VersionKey {
                    emo_id,
                    stream: stream.clone(),
                },
                version,
            );
        }
    }

    async fn translate_upserted(&self, event: &EventDelivery) -> Result<(), ProjectionError> {
        let payload = event.payload();
        let Some(memory_id) = payload.get("id").and_then(Value::as_str) else {
            return Err(ProjectionError::structural(
                "memory.item.upserted payload missing id",
            ));
        };

        let stream = event.stream();
        let emo_id = EmoId::derive_from_memory(memory_id);
        let current = self.current_version(emo_id, &stream).await;
        let is_new = current == 0;
        let version = if is_new { 1 } else { current + 1 };
        let op = if is_new {
            EmoOperation::Created
        } else {
            EmoOperation::Updated
        };

        let mut emo = EmoEventPayload::new(emo_id, version);
        emo.emo_type = Some(infer_emo_type(payload));
        emo.tenant_id = Some(*event.world_id().as_uuid());
        emo.world_id = Some(event.world_id());
        emo.branch = Some(stream.branch.clone());
        emo.content = Some(compose_content(payload));
        emo.tags = payload
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        emo.mime_type = Some(
            payload
                .get("mime_type")
                .and_then(Value::as_str)
                .unwrap_or("text/markdown")
                .to_string(),
        );
        emo.source = Some(extract_source(event.agent(), payload));
        emo.parents = infer_parents(payload);
        emo.links = extract_links(payload);
        emo.idempotency_key = Some(emo_idempotency_key(emo_id, version, op));
        emo.change_id = Some(ChangeId::new());

        let kind = if is_new { "emo.created" } else { "emo.updated" };
        self.emit(event, kind, emo).await?;
        self.cache_version(emo_id, &stream, version);

        info!(memory_id, emo_id = %emo_id, version, kind, "memory event translated");
        Ok(())
    }

    async fn translate_deleted(&self, event: &EventDelivery) -> Result<(), ProjectionError> {
        let payload = event.payload();
        let Some(memory_id) = payload.get("id").and_then(Value::as_str) else {
            return Err(ProjectionError::structural(
                "memory.item.deleted payload missing id",
            ));
        };

        let stream = event.stream();
        let emo_id = EmoId::derive_from_memory(memory_id);
        let current = self.current_version(emo_id, &stream).await;
        if current == 0 {
            warn!(memory_id, emo_id = %emo_id, "delete of untranslated memory ignored");
            return Ok(());
        }

        let mut emo = EmoEventPayload::new(emo_id, current);
        emo.tenant_id = Some(*event.world_id().as_uuid());
        emo.world_id = Some(event.world_id());
        emo.branch = Some(stream.branch.clone());
        emo.reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .map(String::from);
        emo.idempotency_key = Some(emo_idempotency_key(emo_id, current, EmoOperation::Deleted));
        emo.change_id = Some(ChangeId::new());

        self.emit(event, "emo.deleted", emo).await?;
        info!(memory_id, emo_id = %emo_id, version = current, "memory delete translated");
        Ok(())
    }

    /// Append the translated event to the same log the source came from.
    /// An idempotency conflict means a previous run already emitted it.
    async fn emit(
        &self,
        source: &EventDelivery,
        kind: &str,
        payload: EmoEventPayload,
    ) -> Result<(), ProjectionError> {
        let idempotency_key = payload.idempotency_key.clone();
        let envelope = Envelope {
            world_id: source.world_id(),
            branch: source.branch().to_string(),
            kind: EventKind::new(kind),
            payload: serde_json::to_value(&payload)
                .map_err(|e| ProjectionError::apply(format!("payload encode failed: {e}")))?,
            by: source.envelope.envelope.by.clone(),
            version: 1,
            occurred_at: source.envelope.envelope.occurred_at,
            causation_id: Some(*source.event_id.as_uuid()),
        };

        let ctx = WorldContext::for_world(source.world_id());
        match self
            .log
            .append_event(&ctx, envelope.enrich(idempotency_key))
            .await
        {
            Ok(_) => Ok(()),
            Err(EventStoreError::IdempotencyConflict { key, .. }) => {
                debug!(key, "translated event already on the log");
                Ok(())
            }
            Err(e) => Err(ProjectionError::apply(e.to_string())),
        }
    }
}

/// `content := title + "\n\n" + body`, separator omitted when either side
/// is empty. The body falls back from `content` to `body`.
fn compose_content(payload: &Value) -> String {
    let title = payload.get("title").and_then(Value::as_str).unwrap_or("");
    let body = payload
        .get("content")
        .or_else(|| payload.get("body"))
        .and_then(Value::as_str)
        .unwrap_or("");

    match (title.is_empty(), body.is_empty()) {
        (true, _) => body.to_string(),
        (_, true) => title.to_string(),
        _ => format!("{title}\n\n{body}"),
    }
}

/// Rough shape classification carried over from the legacy importer.
fn infer_emo_type(payload: &Value) -> EmoType {
    let content = payload
        .get("content")
        .or_else(|| payload.get("body"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();

    if content.len() > DOC_CONTENT_LEN || content.contains("# ") || content.contains("## ") {
        return EmoType::Doc;
    }
    if ["fact", "definition", "rule"].iter().any(|w| title.contains(w)) {
        return EmoType::Fact;
    }
    if ["profile", "person", "contact"]
        .iter()
        .any(|w| title.contains(w))
    {
        return EmoType::Profile;
    }
    EmoType::Note
}

/// Source kind from the audit agent, URI from the payload when present.
fn extract_source(agent: &str, payload: &Value) -> EmoSource {
    let lowered = agent.to_lowercase();
    let kind = if lowered.contains("user") {
        SourceKind::User
    } else if lowered.contains("ingest") || lowered.contains("import") {
        SourceKind::Ingest
    } else {
        SourceKind::Agent
    };

    let uri = payload
        .get("source_uri")
        .or_else(|| payload.get("uri"))
        .and_then(Value::as_str)
        .map(String::from);

    EmoSource { kind, uri }
}

/// Lineage edges from explicit payload references, each mapped through the
/// deterministic id derivation.
fn infer_parents(payload: &Value) -> Vec<EmoParent> {
    let mut parents = Vec::new();

    if let Some(parent_id) = payload.get("parent_id").and_then(Value::as_str) {
        parents.push(EmoParent {
            emo_id: EmoId::derive_from_memory(parent_id),
            rel: ParentRel::Derived,
        });
    }
    if let Some(supersedes) = payload.get("supersedes").and_then(Value::as_str) {
        parents.push(EmoParent {
            emo_id: EmoId::derive_from_memory(supersedes),
            rel: ParentRel::Supersedes,
        });
    }
    if let Some(merged) = payload.get("merged_from").and_then(Value::as_array) {
        for id in merged.iter().filter_map(Value::as_str) {
            parents.push(EmoParent {
                emo_id: EmoId::derive_from_memory(id),
                rel: ParentRel::Merges,
            });
        }
    }
    parents
}

/// Outbound links: `links[]` entries become URI links, `references[]`
/// entries become EMO links.
fn extract_links(payload: &Value) -> Vec<EmoLink> {
    let mut links = Vec::new();

    if let Some(raw) = payload.get("links").and_then(Value::as_array) {
        for entry in raw {
            let target = match entry {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map.get("uri").and_then(Value::as_str).map(String::from),
                _ => None,
            };
            if let Some(target) = target {
                links.push(EmoLink {
                    kind: LinkKind::Uri,
                    target,
                });
            }
        }
    }

    if let Some(refs) = payload.get("references").and_then(Value::as_array) {
        for id in refs.iter().filter_map(Value::as_str) {
            links.push(EmoLink {
                kind: LinkKind::Emo,
                target: EmoId::derive_from_memory(id).to_string(),
            });
        }
    }
    links
}

#[async_trait]
impl<L, S> Projector for MemoryToEmoTranslator<L, S>
where
    L: EventLog,
    S: EmoStore,
{
    fn name(&self) -> &str {
        TRANSLATOR_NAME
    }

    fn lens(&self) -> &str {
        "translator"
    }

    #[instrument(skip(self, event), fields(global_seq = event.global_seq, kind = %event.kind()))]
    async fn apply(&self, event: &EventDelivery) -> Result<(), ProjectionError> {
        let kind = event.kind().as_str();
        if !kind.starts_with("memory.") {
            debug!("non-memory event skipped");
            return Ok(());
        }

        match kind {
            "memory.item.upserted" => self.translate_upserted(event).await,
            "memory.item.deleted" => self.translate_deleted(event).await,
            "memory.embed.generated" => {
                // Embedding audit only; nothing to translate.
                debug!("memory embedding acknowledged");
                Ok(())
            }
            other => {
                warn!(kind = other, "unknown memory event kind skipped");
                Ok(())
            }
        }
    }

    async fn snapshot(&self, stream: &StreamKey) -> Result<Value, ProjectionError> {
        let mut versions: Vec<(String, u32)> = match self.versions.read() {
            Ok(cache) => cache
                .iter()
                .filter(|(k, _)| k.stream == *stream)
                .map(|(k, v)| (k.emo_id.to_string(), *v))
                .collect(),
            Err(_) => Vec::new(),
        };
        versions.sort();

        Ok(json!({
            "lens": "translator",
            "world_id": stream.world_id.to_string(),
            "branch": stream.branch,
            "versions": versions
                .into_iter()
                .map(|(emo_id, version)| json!({"emo_id": emo_id, "version": version}))
                .collect::<Vec<_>>(),
        }))
    }

    async fn clear(&self, stream: &StreamKey) -> Result<(), ProjectionError> {
        if let Ok(mut cache) = self.versions.write() {
            cache.retain(|k, _| k.stream != *stream);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::WorldId;
    use nexus_emo::{EmoProjector, InMemoryEmoStore};
    use nexus_events::Audit;
    use nexus_store::{EventFilter as Filter, InMemoryEventStore};
    use serde_json::json;
    use uuid::Uuid;

    fn memory_delivery(
        world_id: WorldId,
        global_seq: u64,
        kind: &str,
        agent: &str,
        payload: Value,
    ) -> EventDelivery {
        let envelope = Envelope {
            world_id,
            branch: "main".to_string(),
            kind: EventKind::new(kind),
            payload,
            by: Audit::agent(agent),
            version: 1,
            occurred_at: None,
            causation_id: None,
        };
        let enriched = envelope.enrich(None);
        EventDelivery {
            global_seq,
            event_id: enriched.event_id,
            payload_hash: enriched.payload_hash.clone(),
            envelope: enriched,
        }
    }

    fn setup() -> (
        Arc<InMemoryEventStore>,
        Arc<InMemoryEmoStore>,
        MemoryToEmoTranslator<InMemoryEventStore, InMemoryEmoStore>,
    ) {
        let log = InMemoryEventStore::arc();
        let lens = InMemoryEmoStore::arc();
        let translator = MemoryToEmoTranslator::new(log.clone(), lens.clone());
        (log, lens, translator)
    }

    async fn emitted_events(
        log: &InMemoryEventStore,
        world_id: WorldId,
    ) -> Vec<nexus_events::RecordedEvent> {
        let ctx = WorldContext::for_world(world_id);
        log.list_events(&ctx, "main", Filter::default())
            .await
            .unwrap()
            .items
    }

    #[tokio::test]
    async fn unseen_memory_becomes_emo_created_v1() {
        let (log, _, translator) = setup();
        let world = WorldId::new();

        translator
            .apply(&memory_delivery(
                world,
                1,
                "memory.item.upserted",
                "user",
                json!({"id": "mem1", "title": "X", "body": "Y"}),
            ))
            .await
            .unwrap();

        let events = emitted_events(&log, world).await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.envelope.kind.as_str(), "emo.created");

        let payload: EmoEventPayload =
            serde_json::from_value(event.envelope.payload.clone()).unwrap();
        assert_eq!(payload.emo_id, EmoId::derive_from_memory("mem1"));
        assert_eq!(
            *payload.emo_id.as_uuid(),
            Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"memory:mem1")
        );
        assert_eq!(payload.emo_version, 1);
        assert_eq!(payload.content.as_deref(), Some("X\n\nY"));
        assert_eq!(
            payload.idempotency_key.as_deref(),
            Some(format!("{}:1:created", payload.emo_id).as_str())
        );
        assert!(payload.change_id.is_some());
        assert_eq!(event.idempotency_key, payload.idempotency_key);
    }

    #[tokio::test]
    async fn known_memory_becomes_emo_updated_with_bumped_version() {
        let (log, _, translator) = setup();
        let world = WorldId::new();

        for seq in 1..=2 {
            translator
                .apply(&memory_delivery(
                    world,
                    seq,
                    "memory.item.upserted",
                    "user",
                    json!({"id": "mem1", "title": "X", "body": format!("v{seq}")}),
                ))
                .await
                .unwrap();
        }

        let events = emitted_events(&log, world).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].envelope.kind.as_str(), "emo.updated");
        let payload: EmoEventPayload =
            serde_json::from_value(events[1].envelope.payload.clone()).unwrap();
        assert_eq!(payload.emo_version, 2);
    }

    #[tokio::test]
    async fn delete_uses_cached_version_and_skips_unseen() {
        let (log, _, translator) = setup();
        let world = WorldId::new();

        // Unseen delete emits nothing.
        translator
            .apply(&memory_delivery(
                world,
                1,
                "memory.item.deleted",
                "user",
                json!({"id": "ghost"}),
            ))
            .await
            .unwrap();
        assert!(emitted_events(&log, world).await.is_empty());

        translator
            .apply(&memory_delivery(
                world,
                2,
                "memory.item.upserted",
                "user",
                json!({"id": "mem1", "title": "X", "body": "Y"}),
            ))
            .await
            .unwrap();
        translator
            .apply(&memory_delivery(
                world,
                3,
                "memory.item.deleted",
                "user",
                json!({"id": "mem1"}),
            ))
            .await
            .unwrap();

        let events = emitted_events(&log, world).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].envelope.kind.as_str(), "emo.deleted");
        let payload: EmoEventPayload =
            serde_json::from_value(events[1].envelope.payload.clone()).unwrap();
        assert_eq!(payload.emo_version, 1);
    }

    #[tokio::test]
    async fn versions_survive_restart_via_the_lens() {
        let (log, lens, translator) = setup();
        let world = WorldId::new();

        translator
            .apply(&memory_delivery(
                world,
                1,
                "memory.item.upserted",
                "user",
                json!({"id": "mem1", "title": "X", "body": "Y"}),
            ))
            .await
            .unwrap();

        // Project the emitted event into the lens, as the EMO projector
        // would.
        let emo_projector = EmoProjector::new(lens.clone());
        for event in emitted_events(&log, world).await {
            emo_projector
                .apply(&EventDelivery::from(&event))
                .await
                .unwrap();
        }

        // A fresh translator (empty cache) consults the lens and keeps
        // counting from there.
        let restarted = MemoryToEmoTranslator::new(log.clone(), lens.clone());
        restarted
            .apply(&memory_delivery(
                world,
                2,
                "memory.item.upserted",
                "user",
                json!({"id": "mem1", "title": "X", "body": "Y2"}),
            ))
            .await
            .unwrap();

        let events = emitted_events(&log, world).await;
        assert_eq!(events.len(), 2);
        let payload: EmoEventPayload =
            serde_json::from_value(events[1].envelope.payload.clone()).unwrap();
        assert_eq!(payload.emo_version, 2);
    }

    #[tokio::test]
    async fn translated_and_direct_emo_events_project_identically() {
        let (log, lens, translator) = setup();
        let world = WorldId::new();

        translator
            .apply(&memory_delivery(
                world,
                1,
                "memory.item.upserted",
                "user",
                json!({"id": "mem1", "title": "X", "body": "Y", "tags": ["a", "b"]}),
            ))
            .await
            .unwrap();

        let translated_projector = EmoProjector::new(lens.clone());
        for event in emitted_events(&log, world).await {
            translated_projector
                .apply(&EventDelivery::from(&event))
                .await
                .unwrap();
        }

        // The same state, written as a first-class emo.created event.
        let emo_id = EmoId::derive_from_memory("mem1");
        let direct_lens = nexus_emo::InMemoryEmoStore::arc();
        let direct_projector = EmoProjector::new(direct_lens.clone());
        let mut payload = EmoEventPayload::new(emo_id, 1);
        payload.emo_type = Some(EmoType::Note);
        payload.content = Some("X\n\nY".to_string());
        payload.tags = vec!["a".to_string(), "b".to_string()];
        payload.mime_type = Some("text/markdown".to_string());
        payload.source = Some(EmoSource::of_kind(SourceKind::User));
        payload.idempotency_key =
            Some(emo_idempotency_key(emo_id, 1, EmoOperation::Created));

        let envelope = Envelope {
            world_id: world,
            branch: "main".to_string(),
            kind: EventKind::new("emo.created"),
            payload: serde_json::to_value(&payload).unwrap(),
            by: Audit::agent("user"),
            version: 1,
            occurred_at: None,
            causation_id: None,
        };
        let enriched = envelope.enrich(payload.idempotency_key.clone());
        direct_projector
            .apply(&EventDelivery {
                global_seq: 1,
                event_id: enriched.event_id,
                payload_hash: enriched.payload_hash.clone(),
                envelope: enriched,
            })
            .await
            .unwrap();

        let translated = lens
            .get_current(world, "main", emo_id)
            .await
            .unwrap()
            .unwrap();
        let direct = direct_lens
            .get_current(world, "main", emo_id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(translated.emo_type, direct.emo_type);
        assert_eq!(translated.emo_version, direct.emo_version);
        assert_eq!(translated.content, direct.content);
        assert_eq!(translated.tags, direct.tags);
        assert_eq!(translated.mime_type, direct.mime_type);
        assert_eq!(translated.deleted, direct.deleted);

        let translated_links = lens.links_for(world, "main", emo_id).await.unwrap();
        let direct_links = direct_lens.links_for(world, "main", emo_id).await.unwrap();
        assert_eq!(translated_links.len(), direct_links.len());
    }

    #[tokio::test]
    async fn re_emission_conflicts_idempotently() {
        let (log, lens, _) = setup();
        let world = WorldId::new();

        // Two translator instances with empty caches see the same unseen
        // memory id; both emit created v1, the second hits the idempotency
        // conflict and treats it as done.
        let event = memory_delivery(
            world,
            1,
            "memory.item.upserted",
            "user",
            json!({"id": "mem1", "title": "X", "body": "Y"}),
        );
        let first = MemoryToEmoTranslator::new(log.clone(), lens.clone());
        first.apply(&event).await.unwrap();
        let second = MemoryToEmoTranslator::new(log.clone(), lens.clone());
        second.apply(&event).await.unwrap();

        assert_eq!(emitted_events(&log, world).await.len(), 1);
    }

    #[tokio::test]
    async fn source_kind_inferred_from_agent() {
        assert_eq!(
            extract_source("user", &json!({})).kind,
            SourceKind::User
        );
        assert_eq!(
            extract_source("bulk-import-tool", &json!({})).kind,
            SourceKind::Ingest
        );
        assert_eq!(
            extract_source("planner", &json!({})).kind,
            SourceKind::Agent
        );
        assert_eq!(
            extract_source("agent", &json!({"source_uri": "file:///a"}))
                .uri
                .as_deref(),
            Some("file:///a")
        );
    }

    #[tokio::test]
    async fn parents_and_links_inferred_from_payload() {
        let payload = json!({
            "id": "mem1",
            "parent_id": "p1",
            "supersedes": "p2",
            "merged_from": ["p3", "p4"],
            "links": ["https://a", {"uri": "https://b"}],
            "references": ["r1"],
        });

        let parents = infer_parents(&payload);
        assert_eq!(parents.len(), 4);
        assert_eq!(parents[0].rel, ParentRel::Derived);
        assert_eq!(parents[1].rel, ParentRel::Supersedes);
        assert_eq!(parents[2].rel, ParentRel::Merges);
        assert_eq!(parents[0].emo_id, EmoId::derive_from_memory("p1"));

        let links = extract_links(&payload);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].kind, LinkKind::Uri);
        assert_eq!(links[2].kind, LinkKind::Emo);
        assert_eq!(links[2].target, EmoId::derive_from_memory("r1").to_string());
    }

    #[test]
    fn content_composition_rules() {
        assert_eq!(
            compose_content(&json!({"title": "X", "body": "Y"})),
            "X\n\nY"
        );
        assert_eq!(compose_content(&json!({"title": "X"})), "X");
        assert_eq!(compose_content(&json!({"body": "Y"})), "Y");
        assert_eq!(
            compose_content(&json!({"title": "X", "content": "C", "body": "Y"})),
            "X\n\nC"
        );
    }

    #[test]
    fn emo_type_heuristics() {
        assert_eq!(
            infer_emo_type(&json!({"title": "n", "body": "short"})),
            EmoType::Note
        );
        assert_eq!(
            infer_emo_type(&json!({"title": "n", "body": "# heading"})),
            EmoType::Doc
        );
        assert_eq!(
            infer_emo_type(&json!({"title": "a fact about x", "body": "s"})),
            EmoType::Fact
        );
        assert_eq!(
            infer_emo_type(&json!({"title": "contact card", "body": "s"})),
            EmoType::Profile
        );
    }
}
