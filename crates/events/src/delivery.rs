//! Delivery payload carried from the publisher to projector endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nexus_core::{DomainError, DomainResult, EventId, WorldId, canonical};

use crate::envelope::{EnrichedEnvelope, EventKind, RecordedEvent, StreamKey};

/// Header identifying the publishing process on each delivery.
pub const PUBLISHER_ID_HEADER: &str = "x-publisher-id";

/// Body of one publisher → projector delivery. The envelope is the
/// enriched form, so subscribers see the server fields the log holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDelivery {
    pub global_seq: u64,
    pub event_id: EventId,
    pub envelope: EnrichedEnvelope,
    pub payload_hash: String,
}

impl EventDelivery {
    /// Recompute the canonical payload hash and compare against the one the
    /// publisher supplied. A mismatch is a structural rejection: the event
    /// is poisoned and retrying cannot help.
    pub fn verify_payload_hash(&self) -> DomainResult<()> {
        let computed = canonical::payload_hash(&self.envelope.envelope.payload);
        if computed != self.payload_hash {
            return Err(DomainError::hash_mismatch(format!(
                "event {} expected {} computed {}",
                self.event_id, self.payload_hash, computed
            )));
        }
        Ok(())
    }

    pub fn world_id(&self) -> WorldId {
        self.envelope.envelope.world_id
    }

    pub fn branch(&self) -> &str {
        &self.envelope.envelope.branch
    }

    pub fn kind(&self) -> &EventKind {
        &self.envelope.envelope.kind
    }

    pub fn payload(&self) -> &Value {
        &self.envelope.envelope.payload
    }

    pub fn agent(&self) -> &str {
        &self.envelope.envelope.by.agent
    }

    pub fn schema_version(&self) -> u16 {
        self.envelope.envelope.version
    }

    pub fn stream(&self) -> StreamKey {
        self.envelope.envelope.stream()
    }

    /// Event time: client `occurred_at` when supplied, else the server
    /// receive time. Stable across replays of an unchanged log.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.envelope
            .envelope
            .occurred_at
            .unwrap_or(self.envelope.received_at)
    }
}

impl From<&RecordedEvent> for EventDelivery {
    fn from(event: &RecordedEvent) -> Self {
        Self {
            global_seq: event.global_seq,
            event_id: event.event_id,
            payload_hash: event.payload_hash.clone(),
            envelope: EnrichedEnvelope {
                event_id: event.event_id,
                received_at: event.received_at,
                payload_hash: event.payload_hash.clone(),
                idempotency_key: event.idempotency_key.clone(),
                envelope: event.envelope.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Audit, Envelope};
    use serde_json::json;

    fn delivery() -> EventDelivery {
        let envelope = Envelope {
            world_id: WorldId::new(),
            branch: "main".to_string(),
            kind: EventKind::new("note.created"),
            payload: json!({"id": "n1"}),
            by: Audit::agent("t"),
            version: 1,
            occurred_at: None,
            causation_id: None,
        };
        let enriched = envelope.enrich(None);
        EventDelivery {
            global_seq: 1,
            event_id: enriched.event_id,
            payload_hash: enriched.payload_hash.clone(),
            envelope: enriched,
        }
    }

    #[test]
    fn matching_hash_verifies() {
        delivery().verify_payload_hash().unwrap();
    }

    #[test]
    fn tampered_payload_detected() {
        let mut d = delivery();
        d.envelope.envelope.payload = json!({"id": "n2"});
        let err = d.verify_payload_hash().unwrap_err();
        assert!(matches!(err, DomainError::HashMismatch(_)));
    }

    #[test]
    fn event_time_prefers_occurred_at() {
        let mut d = delivery();
        assert_eq!(d.event_time(), d.envelope.received_at);

        let t: DateTime<Utc> = "2025-01-02T03:04:05Z".parse().unwrap();
        d.envelope.envelope.occurred_at = Some(t);
        assert_eq!(d.event_time(), t);
    }
}
