//! Entity-Memory-Object (EMO) model and its relational projector.
//!
//! Identity is `(emo_id, world_id, branch)`; versions increase strictly
//! from 1; deletes are soft and preserve lineage; history is append-only.

pub mod model;
pub mod postgres;
pub mod projector;
pub mod store;

pub use model::{
    EmoCurrentRow, EmoEventPayload, EmoHistoryRow, EmoId, EmoLink, EmoLinkRow, EmoOperation,
    EmoParent, EmoSource, EmoType, LinkKind, ParentRel, SourceKind, determinism_hash,
    emo_idempotency_key,
};
pub use postgres::PostgresEmoStore;
pub use projector::EmoProjector;
pub use store::{EmoStore, InMemoryEmoStore};
