//! Event envelope model and delivery payloads.

pub mod delivery;
pub mod envelope;

pub use delivery::EventDelivery;
pub use envelope::{Audit, EnrichedEnvelope, Envelope, EventKind, RecordedEvent, StreamKey};
