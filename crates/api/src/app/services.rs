//! Service wiring shared by every handler.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use nexus_core::WorldId;
use nexus_emo::{EmoProjector, InMemoryEmoStore};
use nexus_projection::{EventReceiver, RebuildHandle};
use nexus_store::{
    EventLog, InMemoryEventStore, InMemoryWatermarkStore, Outbox, WatermarkStore,
};
use nexus_translator::MemoryToEmoTranslator;

use crate::metrics::GatewayMetrics;

/// The store the gateway appends to and the admin surface inspects: the
/// event log and its co-written outbox.
pub trait NexusStore: EventLog + Outbox {}

impl<T> NexusStore for T where T: EventLog + Outbox {}

/// One registered projector: its receiver plus the log it rebuilds from.
#[derive(Clone)]
pub struct RegisteredProjector {
    pub lens: String,
    pub receiver: Arc<EventReceiver>,
}

/// A tracked rebuild job.
#[derive(Clone)]
pub struct RebuildJob {
    pub job_id: Uuid,
    pub lens: String,
    pub world_id: WorldId,
    pub branch: String,
    pub estimated_events: u64,
    pub handle: RebuildHandle,
}

/// In-memory rebuild job registry.
#[derive(Default)]
pub struct RebuildJobStore {
    jobs: RwLock<HashMap<Uuid, RebuildJob>>,
}

impl RebuildJobStore {
    pub fn insert(&self, job: RebuildJob) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.insert(job.job_id, job);
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<RebuildJob> {
        self.jobs.read().ok()?.get(&job_id).cloned()
    }
}

/// Everything the handlers need, injected as one extension.
pub struct AppServices {
    store: Arc<dyn NexusStore>,
    watermarks: Arc<dyn WatermarkStore>,
    projectors: Vec<RegisteredProjector>,
    metrics: GatewayMetrics,
    rebuilds: RebuildJobStore,
    admin_token: Option<String>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn NexusStore>,
        watermarks: Arc<dyn WatermarkStore>,
        projectors: Vec<RegisteredProjector>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            store,
            watermarks,
            projectors,
            metrics: GatewayMetrics::new(),
            rebuilds: RebuildJobStore::default(),
            admin_token,
        }
    }

    /// Fully in-memory wiring: in-memory log/outbox, the EMO relational
    /// projector, and the memory→EMO translator on the same log. Used by
    /// dev mode and tests.
    pub fn in_memory() -> (Arc<Self>, Arc<InMemoryEventStore>, Arc<InMemoryEmoStore>) {
        let store = InMemoryEventStore::arc();
        let watermarks: Arc<dyn WatermarkStore> = InMemoryWatermarkStore::arc();

        let emo_lens = InMemoryEmoStore::arc();
        let emo_projector = Arc::new(EmoProjector::new(emo_lens.clone()));
        let emo_receiver = Arc::new(EventReceiver::new(emo_projector, watermarks.clone()));

        let translator = Arc::new(MemoryToEmoTranslator::new(store.clone(), emo_lens.clone()));
        let translator_receiver = Arc::new(EventReceiver::new(translator, watermarks.clone()));

        let services = Arc::new(Self::new(
            store.clone(),
            watermarks,
            vec![
                RegisteredProjector {
                    lens: "rel".to_string(),
                    receiver: emo_receiver,
                },
                RegisteredProjector {
                    lens: "translator".to_string(),
                    receiver: translator_receiver,
                },
            ],
            None,
        ));
        (services, store, emo_lens)
    }

    pub fn store(&self) -> &Arc<dyn NexusStore> {
        &self.store
    }

    pub fn watermarks(&self) -> &Arc<dyn WatermarkStore> {
        &self.watermarks
    }

    pub fn projectors(&self) -> &[RegisteredProjector] {
        &self.projectors
    }

    pub fn projector_for_lens(&self, lens: &str) -> Option<&RegisteredProjector> {
        self.projectors.iter().find(|p| p.lens == lens)
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn rebuilds(&self) -> &RebuildJobStore {
        &self.rebuilds
    }

    /// Admin-role gate: token must match when one is configured.
    pub fn admin_allowed(&self, presented: Option<&str>) -> bool {
        match &self.admin_token {
            Some(required) => presented == Some(required.as_str()),
            None => true,
        }
    }
}
