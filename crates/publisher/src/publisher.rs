//! The CDC batch loop: claim, fan out, commit outcomes.
//!
//! Ordering model: the claimed batch is grouped by stream `(world_id,
//! branch)`; streams are processed concurrently under a shard budget,
//! events within a stream strictly in `global_seq` order. A stream stops at
//! its first failed event in the batch so redelivery keeps per-stream
//! order. Delivery state commits per event, never per subscriber;
//! subscribers are idempotent, so a partial fan-out is safely re-fanned.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, instrument, warn};

use nexus_events::StreamKey;
use nexus_store::{Outbox, OutboxEntry};

use crate::config::PublisherConfig;
use crate::retry::RetryPolicy;
use crate::subscriber::{DeliveryOutcome, Subscriber};

/// What became of one event after a delivery round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventDisposition {
    /// All subscribers acked; the stream may proceed.
    Published,
    /// Parked in the DLQ (structural or exhausted); terminal, the stream
    /// may proceed.
    DeadLettered,
    /// Retry scheduled; the stream stops here to preserve order.
    RetryScheduled,
}

/// Single logical publisher per deployment.
pub struct CdcPublisher<O> {
    outbox: Arc<O>,
    subscribers: Arc<Vec<Arc<dyn Subscriber>>>,
    retry: Arc<RetryPolicy>,
    config: Arc<PublisherConfig>,
}

impl<O> Clone for CdcPublisher<O> {
    fn clone(&self) -> Self {
        Self {
            outbox: self.outbox.clone(),
            subscribers: self.subscribers.clone(),
            retry: self.retry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<O> CdcPublisher<O>
where
    O: Outbox + Send + Sync + 'static,
{
    pub fn new(
        outbox: Arc<O>,
        subscribers: Vec<Arc<dyn Subscriber>>,
        retry: RetryPolicy,
        config: PublisherConfig,
    ) -> Self {
        Self {
            outbox,
            subscribers: Arc::new(subscribers),
            retry: Arc::new(retry),
            config: Arc::new(config),
        }
    }

    /// Poll-and-publish until `shutdown` flips. The in-flight batch always
    /// commits its outcomes before the loop exits; unclaimed rows simply
    /// wait for the next run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(publisher_id = %self.config.publisher_id, "CDC publisher starting");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.outbox.fetch_unpublished(self.config.batch_size).await {
                Ok(batch) if !batch.is_empty() => {
                    self.process_batch(batch).await;
                }
                Ok(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "outbox polling failed");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!("CDC publisher stopped");
    }

    /// Deliver one claimed batch, stream by stream.
    #[instrument(skip(self, batch), fields(events = batch.len()))]
    pub async fn process_batch(&self, batch: Vec<OutboxEntry>) {
        // Group by stream, preserving global_seq order within each group.
        let mut order: Vec<StreamKey> = Vec::new();
        let mut streams: HashMap<StreamKey, Vec<OutboxEntry>> = HashMap::new();
        for entry in batch {
            let stream = entry.stream();
            if !streams.contains_key(&stream) {
                order.push(stream.clone());
            }
            streams.entry(stream).or_default().push(entry);
        }

        let shards = Arc::new(Semaphore::new(self.config.shards.max(1)));
        let mut tasks = Vec::with_capacity(order.len());
        for stream in order {
            let Some(events) = streams.remove(&stream) else {
                continue;
            };
            let publisher = self.clone();
            let shards = shards.clone();
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = shards.acquire().await else {
                    return;
                };
                let mut events = events.into_iter();
                for event in events.by_ref() {
                    let seq = event.global_seq;
                    if publisher.publish_event(event).await == EventDisposition::RetryScheduled {
                        debug!(%stream, seq, "stream paused on failed event");
                        break;
                    }
                }
                // Unattempted claims behind the failure go back to the
                // outbox for the next run.
                for event in events {
                    if let Err(e) = publisher.outbox.release_claim(event.global_seq).await {
                        error!(seq = event.global_seq, error = %e, "release_claim failed");
                    }
                }
            }));
        }
        join_all(tasks).await;
    }

    /// Deliver one event to every subscriber and commit its outcome.
    async fn publish_event(&self, entry: OutboxEntry) -> EventDisposition {
        let delivery = entry.delivery();
        let seq = entry.global_seq;

        let delivery = &delivery;
        let outcomes = join_all(
            self.subscribers
                .iter()
                .map(|s| async move { (s.name().to_string(), s.deliver(delivery).await) }),
        )
        .await;

        let mut structural: Option<String> = None;
        let mut retryable: Option<String> = None;
        for (name, outcome) in outcomes {
            match outcome {
                DeliveryOutcome::Acked => {}
                DeliveryOutcome::StructuralReject(reason) => {
                    warn!(subscriber = %name, seq, reason, "structural rejection");
                    structural.get_or_insert(reason);
                }
                DeliveryOutcome::Retryable(reason) => {
                    warn!(subscriber = %name, seq, reason, "delivery failed");
                    retryable.get_or_insert(reason);
                }
            }
        }

        if let Some(reason) = structural {
            return self.dead_letter(seq, &reason).await;
        }

        if let Some(reason) = retryable {
            let delay = self.retry.delay(entry.attempts);
            match self.outbox.mark_retry(seq, &reason, delay).await {
                Ok(attempts) if self.retry.exhausted(attempts) => {
                    return self.dead_letter(seq, &reason).await;
                }
                Ok(attempts) => {
                    debug!(seq, attempts, delay_ms = delay.num_milliseconds(), "retry scheduled");
                    return EventDisposition::RetryScheduled;
                }
                Err(e) => {
                    error!(seq, error = %e, "mark_retry failed");
                    return EventDisposition::RetryScheduled;
                }
            }
        }

        match self.outbox.mark_published(seq).await {
            Ok(()) => EventDisposition::Published,
            Err(e) => {
                // The row stays unpublished; idempotent subscribers absorb
                // the redelivery.
                error!(seq, error = %e, "mark_published failed");
                EventDisposition::RetryScheduled
            }
        }
    }

    async fn dead_letter(&self, seq: u64, reason: &str) -> EventDisposition {
        if let Err(e) = self
            .outbox
            .move_to_dlq(seq, reason, &self.config.publisher_id)
            .await
        {
            error!(seq, error = %e, "move_to_dlq failed");
            return EventDisposition::RetryScheduled;
        }
        EventDisposition::DeadLettered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use nexus_core::WorldId;
    use nexus_events::{Audit, Envelope, EventDelivery, EventKind};
    use nexus_store::{EventLog, InMemoryEventStore, WorldContext};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with 500 for the first `failures` deliveries, then acks.
    struct FlakySubscriber {
        failures: AtomicU32,
        structural: bool,
        conflict: bool,
        seen: Mutex<Vec<u64>>,
    }

    impl FlakySubscriber {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                structural: false,
                conflict: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn structural() -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(0),
                structural: true,
                conflict: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn conflicting() -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(0),
                structural: false,
                conflict: true,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Subscriber for FlakySubscriber {
        fn name(&self) -> &str {
            "mock"
        }

        async fn deliver(&self, delivery: &EventDelivery) -> DeliveryOutcome {
            self.seen.lock().unwrap().push(delivery.global_seq);
            if self.structural {
                return DeliveryOutcome::StructuralReject("hash mismatch".to_string());
            }
            if self.conflict {
                return DeliveryOutcome::Acked;
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return DeliveryOutcome::Retryable("returned 500".to_string());
            }
            DeliveryOutcome::Acked
        }
    }

    fn instant_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base: ChronoDuration::zero(),
            max: ChronoDuration::zero(),
            max_attempts,
        }
    }

    async fn append(store: &InMemoryEventStore, world: WorldId, branch: &str) -> u64 {
        let ctx = WorldContext::for_world(world);
        let envelope = Envelope {
            world_id: world,
            branch: branch.to_string(),
            kind: EventKind::new("note.created"),
            payload: json!({"id": "n1"}),
            by: Audit::agent("t"),
            version: 1,
            occurred_at: None,
            causation_id: None,
        };
        store
            .append_event(&ctx, envelope.enrich(None))
            .await
            .unwrap()
            .global_seq
    }

    fn publisher(
        store: Arc<InMemoryEventStore>,
        subscriber: Arc<FlakySubscriber>,
        max_attempts: u32,
    ) -> CdcPublisher<InMemoryEventStore> {
        CdcPublisher::new(
            store,
            vec![subscriber as Arc<dyn Subscriber>],
            instant_retry(max_attempts),
            PublisherConfig::default(),
        )
    }

    /// Drive fetch/process rounds until the outbox drains or `rounds` runs
    /// out.
    async fn drain(publisher: &CdcPublisher<InMemoryEventStore>, store: &InMemoryEventStore, rounds: u32) {
        for _ in 0..rounds {
            let batch = store.fetch_unpublished(50).await.unwrap();
            if batch.is_empty() {
                break;
            }
            publisher.process_batch(batch).await;
        }
    }

    #[tokio::test]
    async fn transient_failures_retry_then_publish() {
        let store = InMemoryEventStore::arc();
        let world = WorldId::new();
        append(&store, world, "main").await;

        let subscriber = FlakySubscriber::failing(2);
        let publisher = publisher(store.clone(), subscriber.clone(), 10);
        drain(&publisher, &store, 5).await;

        assert!(store.fetch_unpublished(50).await.unwrap().is_empty());
        assert!(store.list_dlq(10).await.unwrap().is_empty());
        // Two failures plus the final success.
        assert_eq!(subscriber.seen.lock().unwrap().len(), 3);
        assert_eq!(store.lag().await.unwrap().unpublished_events, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter() {
        let store = InMemoryEventStore::arc();
        let world = WorldId::new();
        let seq = append(&store, world, "main").await;

        let subscriber = FlakySubscriber::failing(u32::MAX);
        let publisher = publisher(store.clone(), subscriber.clone(), 3);
        drain(&publisher, &store, 10).await;

        let dlq = store.list_dlq(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].global_seq, seq);
        // max_attempts deliveries, then parked for good.
        assert_eq!(subscriber.seen.lock().unwrap().len(), 3);
        assert!(store.fetch_unpublished(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn structural_rejection_skips_retries() {
        let store = InMemoryEventStore::arc();
        let world = WorldId::new();
        append(&store, world, "main").await;

        let subscriber = FlakySubscriber::structural();
        let publisher = publisher(store.clone(), subscriber.clone(), 10);
        drain(&publisher, &store, 3).await;

        let dlq = store.list_dlq(10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert!(dlq[0].error.contains("hash mismatch"));
        // One delivery, straight to the DLQ.
        assert_eq!(subscriber.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflict_counts_as_success() {
        let store = InMemoryEventStore::arc();
        let world = WorldId::new();
        append(&store, world, "main").await;

        let subscriber = FlakySubscriber::conflicting();
        let publisher = publisher(store.clone(), subscriber.clone(), 10);
        drain(&publisher, &store, 2).await;

        assert!(store.list_dlq(10).await.unwrap().is_empty());
        assert_eq!(store.lag().await.unwrap().unpublished_events, 0);
    }

    #[tokio::test]
    async fn stream_pauses_behind_a_failed_event() {
        let store = InMemoryEventStore::arc();
        let world = WorldId::new();
        let first = append(&store, world, "main").await;
        append(&store, world, "main").await;

        let subscriber = FlakySubscriber::failing(1);
        let publisher = publisher(store.clone(), subscriber.clone(), 10);

        let batch = store.fetch_unpublished(50).await.unwrap();
        assert_eq!(batch.len(), 2);
        publisher.process_batch(batch).await;

        // Only the failed head of the stream was attempted this round.
        assert_eq!(*subscriber.seen.lock().unwrap(), vec![first]);

        // The next rounds deliver both, in order.
        drain(&publisher, &store, 5).await;
        assert_eq!(*subscriber.seen.lock().unwrap(), vec![1, 1, 2]);
        assert_eq!(store.lag().await.unwrap().unpublished_events, 0);
    }

    #[tokio::test]
    async fn independent_streams_proceed_despite_a_stuck_one() {
        let store = InMemoryEventStore::arc();
        let world = WorldId::new();
        append(&store, world, "stuck").await;
        let healthy = append(&store, world, "healthy").await;

        // Only the first delivery (the stuck branch head) fails.
        let subscriber = FlakySubscriber::failing(1);
        let publisher = publisher(store.clone(), subscriber.clone(), 10);

        let batch = store.fetch_unpublished(50).await.unwrap();
        publisher.process_batch(batch).await;

        let seen = subscriber.seen.lock().unwrap().clone();
        assert!(seen.contains(&healthy), "healthy stream must not be blocked");
    }
}
