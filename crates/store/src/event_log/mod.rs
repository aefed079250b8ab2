//! Append-only event log: trait, Postgres implementation, in-memory
//! implementation for tests/dev.

pub mod in_memory;
pub mod postgres;
#[path = "trait.rs"]
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{DEFAULT_LIST_LIMIT, EventFilter, EventLog, EventPage, MAX_LIST_LIMIT};
