//! Projector framework: shared machinery for every lens projector.
//!
//! Event reception (hash verification, watermark gating, per-stream
//! serialization), deterministic state hashing, and rebuild support.

pub mod error;
pub mod http;
pub mod projector;
pub mod rebuild;
pub mod receiver;
pub mod state_hash;

pub use error::ProjectionError;
pub use projector::Projector;
pub use rebuild::{RebuildHandle, RebuildPhase, RebuildProgress, rebuild_projector};
pub use receiver::{Ack, EventReceiver};
pub use state_hash::snapshot_hash;
