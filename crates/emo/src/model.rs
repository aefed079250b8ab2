//! EMO types: identity, payloads, lens rows, and the determinism hash.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nexus_core::{ChangeId, DomainError, WorldId, canonical};

/// Identifier of an EMO, stable across versions.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EmoId(Uuid);

impl EmoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Deterministic derivation from a legacy memory id: UUIDv5 over a
    /// fixed namespace and the string `memory:{id}`. The same memory id
    /// always maps to the same EMO id.
    pub fn derive_from_memory(memory_id: &str) -> Self {
        Self(Uuid::new_v5(
            &Uuid::NAMESPACE_DNS,
            format!("memory:{memory_id}").as_bytes(),
        ))
    }
}

impl Default for EmoId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EmoId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EmoId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::validation(format!("EmoId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// What an EMO is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmoType {
    Note,
    Fact,
    Doc,
    Profile,
}

impl EmoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Fact => "fact",
            Self::Doc => "doc",
            Self::Profile => "profile",
        }
    }
}

/// Where an EMO came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    User,
    Agent,
    Ingest,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Ingest => "ingest",
        }
    }
}

/// Lineage relationship to a parent EMO.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRel {
    Derived,
    Supersedes,
    Merges,
}

impl ParentRel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Derived => "derived",
            Self::Supersedes => "supersedes",
            Self::Merges => "merges",
        }
    }
}

/// Target kind of an outbound link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Emo,
    Uri,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emo => "emo",
            Self::Uri => "uri",
        }
    }
}

/// Source descriptor: kind plus optional URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoSource {
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl EmoSource {
    pub fn of_kind(kind: SourceKind) -> Self {
        Self { kind, uri: None }
    }
}

/// One lineage edge in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoParent {
    pub emo_id: EmoId,
    pub rel: ParentRel,
}

/// One outbound link in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoLink {
    pub kind: LinkKind,
    #[serde(rename = "ref")]
    pub target: String,
}

fn default_schema_version() -> u32 {
    1
}

/// Payload shared by the `emo.*` event family. Create events carry the
/// full shape; update/link/delete events carry the subset they need,
/// everything else defaulting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmoEventPayload {
    pub emo_id: EmoId,
    pub emo_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emo_type: Option<EmoType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<WorldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EmoSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<EmoParent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<EmoLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<ChangeId>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl EmoEventPayload {
    /// Minimal payload; callers fill the fields their operation carries.
    pub fn new(emo_id: EmoId, emo_version: u32) -> Self {
        Self {
            emo_id,
            emo_version,
            emo_type: None,
            tenant_id: None,
            world_id: None,
            branch: None,
            content: None,
            tags: Vec::new(),
            mime_type: None,
            source: None,
            parents: Vec::new(),
            links: Vec::new(),
            reason: None,
            idempotency_key: None,
            change_id: None,
            schema_version: 1,
        }
    }
}

/// Operation recorded in `emo_history`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmoOperation {
    Created,
    Updated,
    Linked,
    Deleted,
}

impl EmoOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Linked => "linked",
            Self::Deleted => "deleted",
        }
    }
}

/// The idempotency key format carried by every EMO event:
/// `{emo_id}:{emo_version}:{op}`.
pub fn emo_idempotency_key(emo_id: EmoId, emo_version: u32, op: EmoOperation) -> String {
    format!("{emo_id}:{emo_version}:{}", op.as_str())
}

/// One row of `emo_current`: the latest state per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmoCurrentRow {
    pub emo_id: EmoId,
    pub world_id: WorldId,
    pub branch: String,
    pub emo_type: EmoType,
    pub emo_version: u32,
    pub tenant_id: Uuid,
    pub content: String,
    pub tags: Vec<String>,
    pub mime_type: String,
    pub source: EmoSource,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deletion_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only row of `emo_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoHistoryRow {
    pub emo_id: EmoId,
    pub world_id: WorldId,
    pub branch: String,
    pub emo_version: u32,
    pub operation: EmoOperation,
    pub content_hash: String,
    pub idempotency_key: String,
    pub recorded_at: DateTime<Utc>,
}

/// One edge of `emo_links`: lineage parents keep their relationship name,
/// outbound links use `rel = "link"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoLinkRow {
    pub emo_id: EmoId,
    pub world_id: WorldId,
    pub branch: String,
    pub rel: String,
    pub kind: LinkKind,
    pub target: String,
}

impl EmoLinkRow {
    pub fn from_parent(emo_id: EmoId, world_id: WorldId, branch: &str, parent: &EmoParent) -> Self {
        Self {
            emo_id,
            world_id,
            branch: branch.to_string(),
            rel: parent.rel.as_str().to_string(),
            kind: LinkKind::Emo,
            target: parent.emo_id.to_string(),
        }
    }

    pub fn from_link(emo_id: EmoId, world_id: WorldId, branch: &str, link: &EmoLink) -> Self {
        Self {
            emo_id,
            world_id,
            branch: branch.to_string(),
            rel: "link".to_string(),
            kind: link.kind,
            target: link.target.clone(),
        }
    }
}

/// SHA-256 hash of raw content, hex.
pub fn content_hash(content: &str) -> String {
    canonical::sha256_hex(content.as_bytes())
}

/// Determinism hash of one EMO, for replay validation.
///
/// SHA-256 over, in this exact order: `emo_id`, `emo_version`, `world_id`,
/// `branch`, `content`, tags (sorted, comma-joined), linked EMO ids
/// (sorted, comma-joined), `updated_at` as epoch seconds, joined with
/// `:`.
pub fn determinism_hash(row: &EmoCurrentRow, links: &[EmoLinkRow]) -> String {
    let mut tags = row.tags.clone();
    tags.sort();

    let mut linked: Vec<String> = links
        .iter()
        .filter(|l| l.kind == LinkKind::Emo)
        .map(|l| l.target.clone())
        .collect();
    linked.sort();
    linked.dedup();

    let input = [
        row.emo_id.to_string(),
        row.emo_version.to_string(),
        row.world_id.to_string(),
        row.branch.clone(),
        row.content.clone(),
        tags.join(","),
        linked.join(","),
        row.updated_at.timestamp().to_string(),
    ]
    .join(":");

    canonical::sha256_hex(input.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_id_derivation_is_deterministic() {
        let a = EmoId::derive_from_memory("mem1");
        let b = EmoId::derive_from_memory("mem1");
        assert_eq!(a, b);
        assert_ne!(a, EmoId::derive_from_memory("mem2"));
        // UUIDv5 over the DNS namespace and "memory:mem1".
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"memory:mem1");
        assert_eq!(*a.as_uuid(), expected);
    }

    #[test]
    fn idempotency_key_format() {
        let id: EmoId = "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap();
        assert_eq!(
            emo_idempotency_key(id, 3, EmoOperation::Deleted),
            "6ba7b810-9dad-11d1-80b4-00c04fd430c8:3:deleted"
        );
    }

    #[test]
    fn determinism_hash_is_tag_order_insensitive() {
        let mut row = EmoCurrentRow {
            emo_id: EmoId::new(),
            world_id: WorldId::new(),
            branch: "main".to_string(),
            emo_type: EmoType::Note,
            emo_version: 1,
            tenant_id: Uuid::new_v4(),
            content: "c".to_string(),
            tags: vec!["b".to_string(), "a".to_string()],
            mime_type: "text/markdown".to_string(),
            source: EmoSource::of_kind(SourceKind::User),
            deleted: false,
            deleted_at: None,
            deletion_reason: None,
            updated_at: Utc::now(),
        };
        let h1 = determinism_hash(&row, &[]);
        row.tags = vec!["a".to_string(), "b".to_string()];
        assert_eq!(h1, determinism_hash(&row, &[]));

        row.content = "changed".to_string();
        assert_ne!(h1, determinism_hash(&row, &[]));
    }

    #[test]
    fn payload_accepts_minimal_delete_shape() {
        let json = serde_json::json!({
            "emo_id": "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
            "emo_version": 3,
            "reason": "r"
        });
        let payload: EmoEventPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.emo_version, 3);
        assert_eq!(payload.reason.as_deref(), Some("r"));
        assert_eq!(payload.schema_version, 1);
    }
}
