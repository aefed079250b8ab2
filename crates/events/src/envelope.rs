//! Event envelope: the immutable per-event record accepted by the gateway.
//!
//! An `Envelope` is what a client submits: tenant key, branch, kind, opaque
//! payload, and audit principal. The gateway enriches it with server fields
//! (`event_id`, `received_at`, `payload_hash`) before persistence; the store
//! assigns `global_seq` and produces the final `RecordedEvent`.
//!
//! Tenancy is enforced at the envelope level: every downstream row carries
//! `world_id`, and projections process events per world/branch stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nexus_core::{DomainError, DomainResult, EventId, WorldId, canonical};

/// Maximum accepted branch-name length.
const MAX_BRANCH_LEN: usize = 100;

/// Envelope schema versions this build understands.
const SUPPORTED_VERSIONS: core::ops::RangeInclusive<u16> = 1..=2;

/// Event kind in `category.action` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKind(String);

impl EventKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> &str {
        self.0.split_once('.').map(|(c, _)| c).unwrap_or("")
    }

    pub fn action(&self) -> &str {
        self.0.split_once('.').map(|(_, a)| a).unwrap_or("")
    }

    fn check(&self) -> DomainResult<()> {
        match self.0.split_once('.') {
            Some((category, action))
                if !category.is_empty() && !action.is_empty() && !action.contains('.') =>
            {
                Ok(())
            }
            _ => Err(DomainError::validation(
                "event kind must be in 'category.action' form with both parts non-empty",
            )),
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Audit principal; `agent` is required, extra fields pass through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    pub agent: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Audit {
    pub fn agent(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// The pair identifying an ordered event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub world_id: WorldId,
    pub branch: String,
}

impl core::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.world_id, self.branch)
    }
}

fn default_version() -> u16 {
    1
}

/// Client-submitted event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub world_id: WorldId,
    pub branch: String,
    pub kind: EventKind,
    pub payload: Value,
    pub by: Audit,
    #[serde(default = "default_version")]
    pub version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
}

impl Envelope {
    /// Validate the envelope against the acceptance rules.
    ///
    /// Rejects: malformed branch names, branch names over 100 chars,
    /// malformed kinds, empty payloads, missing audit agent, and unknown
    /// schema versions. Timestamps are already RFC 3339 UTC by construction.
    pub fn validate(&self) -> DomainResult<()> {
        if self.branch.is_empty() {
            return Err(DomainError::validation("branch name cannot be empty"));
        }
        if self.branch.len() > MAX_BRANCH_LEN {
            return Err(DomainError::validation(format!(
                "branch name cannot exceed {MAX_BRANCH_LEN} characters"
            )));
        }
        if !self
            .branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::validation(
                "branch name must be alphanumeric with hyphens/underscores",
            ));
        }

        self.kind.check()?;

        match &self.payload {
            Value::Object(map) if !map.is_empty() => {}
            _ => return Err(DomainError::validation("event payload cannot be empty")),
        }

        if self.by.agent.trim().is_empty() {
            return Err(DomainError::validation("by.agent cannot be empty"));
        }

        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(DomainError::validation(format!(
                "unsupported envelope version: {} (supported: 1, 2)",
                self.version
            )));
        }

        Ok(())
    }

    /// The `(world_id, branch)` stream this envelope belongs to.
    pub fn stream(&self) -> StreamKey {
        StreamKey {
            world_id: self.world_id,
            branch: self.branch.clone(),
        }
    }

    /// Attach server fields: fresh `event_id`, `received_at`, and the
    /// SHA-256 of the canonical payload.
    pub fn enrich(self, idempotency_key: Option<String>) -> EnrichedEnvelope {
        let payload_hash = canonical::payload_hash(&self.payload);
        EnrichedEnvelope {
            event_id: EventId::new(),
            received_at: Utc::now(),
            payload_hash,
            idempotency_key,
            envelope: self,
        }
    }
}

/// Envelope plus server-assigned fields, ready for the append transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEnvelope {
    pub event_id: EventId,
    pub received_at: DateTime<Utc>,
    pub payload_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// An event as persisted in the log, with its global position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub global_seq: u64,
    pub event_id: EventId,
    pub received_at: DateTime<Utc>,
    pub payload_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

impl RecordedEvent {
    pub fn from_enriched(enriched: EnrichedEnvelope, global_seq: u64) -> Self {
        Self {
            global_seq,
            event_id: enriched.event_id,
            received_at: enriched.received_at,
            payload_hash: enriched.payload_hash,
            idempotency_key: enriched.idempotency_key,
            envelope: enriched.envelope,
        }
    }

    pub fn stream(&self) -> StreamKey {
        self.envelope.stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope {
            world_id: WorldId::new(),
            branch: "main".to_string(),
            kind: EventKind::new("note.created"),
            payload: json!({"id": "n1", "title": "T"}),
            by: Audit::agent("tester"),
            version: 1,
            occurred_at: None,
            causation_id: None,
        }
    }

    #[test]
    fn valid_envelope_passes() {
        envelope().validate().unwrap();
    }

    #[test]
    fn branch_rules_enforced() {
        let mut env = envelope();
        env.branch = "feature/x".to_string();
        assert!(env.validate().is_err());

        env.branch = "a".repeat(101);
        assert!(env.validate().is_err());

        env.branch = "feature_x-2".to_string();
        assert!(env.validate().is_ok());
    }

    #[test]
    fn kind_must_be_category_action() {
        for bad in ["note", ".created", "note.", "note.created.extra"] {
            let mut env = envelope();
            env.kind = EventKind::new(bad);
            assert!(env.validate().is_err(), "kind {bad:?} should be rejected");
        }
    }

    #[test]
    fn empty_payload_rejected() {
        let mut env = envelope();
        env.payload = json!({});
        assert!(env.validate().is_err());

        env.payload = json!("text");
        assert!(env.validate().is_err());
    }

    #[test]
    fn blank_agent_rejected() {
        let mut env = envelope();
        env.by.agent = "  ".to_string();
        assert!(env.validate().is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        let mut env = envelope();
        env.version = 3;
        assert!(env.validate().is_err());
        env.version = 2;
        assert!(env.validate().is_ok());
    }

    #[test]
    fn enrich_computes_canonical_payload_hash() {
        let env = envelope();
        let expected = nexus_core::payload_hash(&env.payload);
        let enriched = env.enrich(Some("k1".to_string()));
        assert_eq!(enriched.payload_hash, expected);
        assert_eq!(enriched.idempotency_key.as_deref(), Some("k1"));
    }

    #[test]
    fn recorded_event_serializes_flattened() {
        let enriched = envelope().enrich(None);
        let recorded = RecordedEvent::from_enriched(enriched, 7);
        let v = serde_json::to_value(&recorded).unwrap();
        assert_eq!(v["global_seq"], 7);
        assert_eq!(v["branch"], "main");
        assert_eq!(v["kind"], "note.created");
        assert!(v["payload_hash"].is_string());
    }
}
