//! Core domain: identifiers, canonical JSON, error model.

pub mod canonical;
pub mod error;
pub mod id;

pub use canonical::{canonical_json, payload_hash, sha256_hex};
pub use error::{DomainError, DomainResult};
pub use id::{ChangeId, CorrelationId, EventId, WorldId};
