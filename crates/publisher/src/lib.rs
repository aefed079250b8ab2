//! CDC publisher: drains the outbox and fans events out to projectors.

pub mod config;
pub mod publisher;
pub mod retry;
pub mod subscriber;

pub use config::PublisherConfig;
pub use publisher::CdcPublisher;
pub use retry::RetryPolicy;
pub use subscriber::{DeliveryOutcome, HttpSubscriber, Subscriber};
