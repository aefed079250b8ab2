//! Event log + outbox store: the single source of truth.
//!
//! One privileged append operation writes the log row and the outbox row in
//! a single transaction, with `global_seq` assigned by the store's monotonic
//! generator. Reads are gated by a session world context; lens tables are
//! owned by their projectors and never written here.

pub mod error;
pub mod event_log;
pub mod outbox;
pub mod tenancy;
pub mod watermark;

pub use error::EventStoreError;
pub use event_log::{
    DEFAULT_LIST_LIMIT, EventFilter, EventLog, EventPage, InMemoryEventStore, MAX_LIST_LIMIT,
    PostgresEventStore,
};
pub use outbox::{DlqEntry, Outbox, OutboxEntry, OutboxLag};
pub use tenancy::{IsolationReport, WorldContext, isolation_check};
pub use watermark::{InMemoryWatermarkStore, PostgresWatermarkStore, Watermark, WatermarkStore};
