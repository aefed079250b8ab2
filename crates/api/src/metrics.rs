//! Gateway counters, exported as JSON by `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters. Cheap atomics; scrapers read a consistent-enough
/// snapshot.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    events_appended: AtomicU64,
    idempotency_conflicts: AtomicU64,
    validation_failures: AtomicU64,
    internal_errors: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_appended(&self) {
        self.events_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.idempotency_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "events_appended": self.events_appended.load(Ordering::Relaxed),
            "idempotency_conflicts": self.idempotency_conflicts.load(Ordering::Relaxed),
            "validation_failures": self.validation_failures.load(Ordering::Relaxed),
            "internal_errors": self.internal_errors.load(Ordering::Relaxed),
        })
    }
}
