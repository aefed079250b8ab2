//! Shared event reception: the framework half of every projector endpoint.
//!
//! Per-event state machine:
//!
//! ```text
//!             reject (hash mismatch / schema too new)
//! received ────────────────────────────────────────▶ error (structural)
//!    │
//!    ▼
//! check watermark ── seq ≤ wm ──▶ ack (no-op, idempotent)
//!    │
//!    ▼
//! apply + advance watermark ──▶ ack
//!    │
//!    ▼
//! apply failure ──▶ error (publisher retries)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};

use nexus_events::{EventDelivery, StreamKey};
use nexus_store::WatermarkStore;

use crate::error::ProjectionError;
use crate::projector::Projector;
use crate::state_hash::snapshot_hash;

/// Highest envelope schema version this build can apply.
const MAX_ENVELOPE_VERSION: u16 = 2;

/// Acknowledgement returned to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Applied and watermark advanced.
    Applied,
    /// Sequence at or below the watermark; nothing to do.
    Skipped,
}

/// Wraps a projector with hash verification, watermark gating, and
/// per-stream serialization.
pub struct EventReceiver {
    projector: Arc<dyn Projector>,
    watermarks: Arc<dyn WatermarkStore>,
    // Apply + watermark advance are serialized per stream; streams stay
    // independent.
    stream_locks: Mutex<HashMap<StreamKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl EventReceiver {
    pub fn new(projector: Arc<dyn Projector>, watermarks: Arc<dyn WatermarkStore>) -> Self {
        Self {
            projector,
            watermarks,
            stream_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn projector(&self) -> &Arc<dyn Projector> {
        &self.projector
    }

    pub fn watermarks(&self) -> &Arc<dyn WatermarkStore> {
        &self.watermarks
    }

    fn stream_lock(&self, stream: &StreamKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.stream_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(stream.clone()).or_default().clone()
    }

    /// Receive one delivery from the publisher.
    #[instrument(
        skip(self, delivery),
        fields(
            projector = %self.projector.name(),
            global_seq = delivery.global_seq,
            kind = %delivery.kind(),
        ),
        err
    )]
    pub async fn handle(&self, delivery: &EventDelivery) -> Result<Ack, ProjectionError> {
        delivery
            .verify_payload_hash()
            .map_err(|e| ProjectionError::structural(e.to_string()))?;

        if delivery.schema_version() > MAX_ENVELOPE_VERSION {
            return Err(ProjectionError::structural(format!(
                "envelope schema version {} too new (max {MAX_ENVELOPE_VERSION})",
                delivery.schema_version()
            )));
        }

        let stream = delivery.stream();
        let lock = self.stream_lock(&stream);
        let _guard = lock.lock().await;

        let name = self.projector.name().to_string();
        let watermark = self.watermarks.get(&name, &stream).await?;
        if delivery.global_seq <= watermark {
            debug!(watermark, "duplicate delivery skipped");
            return Ok(Ack::Skipped);
        }

        self.projector.apply(delivery).await?;
        self.watermarks
            .advance(&name, &stream, delivery.global_seq)
            .await?;

        Ok(Ack::Applied)
    }

    /// Current watermark for a stream.
    pub async fn watermark(&self, stream: &StreamKey) -> Result<u64, ProjectionError> {
        Ok(self.watermarks.get(self.projector.name(), stream).await?)
    }

    /// Deterministic state hash for a stream: SHA-256 of the canonical
    /// snapshot.
    pub async fn state_hash(&self, stream: &StreamKey) -> Result<String, ProjectionError> {
        let snapshot = self.projector.snapshot(stream).await?;
        Ok(snapshot_hash(&snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nexus_core::WorldId;
    use nexus_events::{Audit, Envelope, EventKind};
    use nexus_store::InMemoryWatermarkStore;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts applied events; snapshot is the count.
    #[derive(Default)]
    struct CountingProjector {
        applied: AtomicU32,
        fail_next: AtomicU32,
    }

    #[async_trait]
    impl Projector for CountingProjector {
        fn name(&self) -> &str {
            "counting"
        }

        fn lens(&self) -> &str {
            "rel"
        }

        async fn apply(&self, _event: &EventDelivery) -> Result<(), ProjectionError> {
            if self.fail_next.swap(0, Ordering::SeqCst) > 0 {
                return Err(ProjectionError::apply("induced failure"));
            }
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn snapshot(&self, _stream: &StreamKey) -> Result<Value, ProjectionError> {
            Ok(json!({"applied": self.applied.load(Ordering::SeqCst)}))
        }

        async fn clear(&self, _stream: &StreamKey) -> Result<(), ProjectionError> {
            self.applied.store(0, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delivery(world_id: WorldId, global_seq: u64) -> EventDelivery {
        let envelope = Envelope {
            world_id,
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
            global_seq,
            event_id: enriched.event_id,
            payload_hash: enriched.payload_hash.clone(),
            envelope: enriched,
        }
    }

    fn receiver() -> (Arc<CountingProjector>, EventReceiver) {
        let projector = Arc::new(CountingProjector::default());
        let receiver = EventReceiver::new(projector.clone(), InMemoryWatermarkStore::arc());
        (projector, receiver)
    }

    #[tokio::test]
    async fn applies_and_advances_watermark() {
        let (projector, receiver) = receiver();
        let world = WorldId::new();

        assert_eq!(receiver.handle(&delivery(world, 1)).await.unwrap(), Ack::Applied);
        assert_eq!(receiver.handle(&delivery(world, 2)).await.unwrap(), Ack::Applied);
        assert_eq!(projector.applied.load(Ordering::SeqCst), 2);

        let stream = StreamKey {
            world_id: world,
            branch: "main".to_string(),
        };
        assert_eq!(receiver.watermark(&stream).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op() {
        let (projector, receiver) = receiver();
        let world = WorldId::new();

        receiver.handle(&delivery(world, 1)).await.unwrap();
        assert_eq!(receiver.handle(&delivery(world, 1)).await.unwrap(), Ack::Skipped);
        assert_eq!(projector.applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hash_mismatch_is_structural() {
        let (_, receiver) = receiver();
        let mut d = delivery(WorldId::new(), 1);
        d.payload_hash = "0".repeat(64);
        let err = receiver.handle(&d).await.unwrap_err();
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn too_new_schema_is_structural() {
        let (_, receiver) = receiver();
        let mut d = delivery(WorldId::new(), 1);
        d.envelope.envelope.version = 3;
        let err = receiver.handle(&d).await.unwrap_err();
        assert!(err.is_structural());
    }

    #[tokio::test]
    async fn failed_apply_leaves_watermark_untouched() {
        let (projector, receiver) = receiver();
        let world = WorldId::new();

        projector.fail_next.store(1, Ordering::SeqCst);
        assert!(receiver.handle(&delivery(world, 1)).await.is_err());

        let stream = StreamKey {
            world_id: world,
            branch: "main".to_string(),
        };
        assert_eq!(receiver.watermark(&stream).await.unwrap(), 0);

        // Redelivery after the transient failure succeeds.
        assert_eq!(receiver.handle(&delivery(world, 1)).await.unwrap(), Ack::Applied);
        assert_eq!(receiver.watermark(&stream).await.unwrap(), 1);
    }
}
