//! The contract every projector implements.

use async_trait::async_trait;
use serde_json::Value;

use nexus_events::{EventDelivery, StreamKey};

use crate::error::ProjectionError;

/// A projector consumes events and maintains a read-optimized lens.
///
/// Implementations own their lens tables exclusively; no other component
/// writes to them. `apply` must be idempotent: the publisher delivers
/// at-least-once, and the framework additionally gates on the watermark.
#[async_trait]
pub trait Projector: Send + Sync {
    /// Unique identifier used in watermarks.
    fn name(&self) -> &str;

    /// Logical lens category ("rel", "sem", "graph", "translator").
    fn lens(&self) -> &str;

    /// Apply one event to the lens. Idempotent on `(name, global_seq)`.
    async fn apply(&self, event: &EventDelivery) -> Result<(), ProjectionError>;

    /// A deterministic serializable value over the projector's current
    /// state for a stream. Must depend only on persisted state, not on
    /// processing time, nor on insertion order beyond what the data model
    /// encodes. Two projectors fed the same event sequence from empty state
    /// must produce equal snapshots.
    async fn snapshot(&self, stream: &StreamKey) -> Result<Value, ProjectionError>;

    /// Drop all lens state for a stream. Rebuilds only; callers hold the
    /// administrative bypass.
    async fn clear(&self, stream: &StreamKey) -> Result<(), ProjectionError>;
}
