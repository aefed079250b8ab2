//! Rebuild tooling: clear a projector's state and replay from the log.
//!
//! A rebuild clears the stream's watermark (and, when requested, the lens
//! rows) under the administrative bypass, then re-applies events from the
//! requested sequence in `global_seq` order. For an unchanged log the
//! post-rebuild state hash equals the pre-rebuild hash.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use nexus_core::WorldId;
use nexus_events::{EventDelivery, StreamKey};
use nexus_store::{EventFilter, EventLog, EventStoreError, WorldContext};

use crate::error::ProjectionError;
use crate::receiver::EventReceiver;

/// Page size used while walking the log.
const REPLAY_PAGE: u32 = 1000;

/// Error type for rebuild operations.
#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("rebuild cancelled")]
    Cancelled,
}

impl From<ProjectionError> for RebuildError {
    fn from(err: ProjectionError) -> Self {
        Self::Projection(err.to_string())
    }
}

/// Phase of a rebuild operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    Loading,
    Clearing,
    Replaying,
    Complete,
    Failed,
}

/// Progress information for a running rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildProgress {
    pub total_events: u64,
    pub processed_events: u64,
    pub phase: RebuildPhase,
    pub is_complete: bool,
    pub error: Option<String>,
}

/// Handle for monitoring and cancelling a rebuild.
#[derive(Clone)]
pub struct RebuildHandle {
    progress: Arc<RwLock<RebuildProgress>>,
    cancellation: Arc<AtomicBool>,
}

impl RebuildHandle {
    pub async fn progress(&self) -> RebuildProgress {
        self.progress.read().await.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.load(Ordering::Relaxed)
    }

    /// Poll until the rebuild finishes one way or the other.
    pub async fn wait_for_completion(&self) -> Result<RebuildProgress, RebuildError> {
        loop {
            let progress = self.progress.read().await.clone();
            if progress.is_complete {
                if progress.phase == RebuildPhase::Failed {
                    return match progress.error {
                        Some(error) => Err(RebuildError::Projection(error)),
                        None => Err(RebuildError::Cancelled),
                    };
                }
                return Ok(progress);
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
    }
}

/// Start a rebuild in the background and return its handle.
///
/// `clear_existing` additionally drops the lens rows before replay; the
/// watermark is always cleared so redelivery passes the gate.
#[instrument(
    skip(log, receiver),
    fields(projector = %receiver.projector().name(), world_id = %world_id, branch = %branch)
)]
pub fn rebuild_projector<L>(
    log: Arc<L>,
    receiver: Arc<EventReceiver>,
    world_id: WorldId,
    branch: String,
    from_global_seq: u64,
    clear_existing: bool,
) -> RebuildHandle
where
    L: EventLog + ?Sized + 'static,
{
    let progress = Arc::new(RwLock::new(RebuildProgress {
        total_events: 0,
        processed_events: 0,
        phase: RebuildPhase::Loading,
        is_complete: false,
        error: None,
    }));
    let cancellation = Arc::new(AtomicBool::new(false));

    let handle = RebuildHandle {
        progress: progress.clone(),
        cancellation: cancellation.clone(),
    };

    tokio::spawn(async move {
        let result = run_rebuild(
            log,
            receiver,
            world_id,
            branch,
            from_global_seq,
            clear_existing,
            progress.clone(),
            cancellation,
        )
        .await;

        let mut prog = progress.write().await;
        match result {
            Ok(processed) => {
                prog.phase = RebuildPhase::Complete;
                prog.processed_events = processed;
                prog.is_complete = true;
            }
            Err(RebuildError::Cancelled) => {
                prog.phase = RebuildPhase::Failed;
                prog.is_complete = true;
            }
            Err(e) => {
                prog.phase = RebuildPhase::Failed;
                prog.error = Some(e.to_string());
                prog.is_complete = true;
            }
        }
    });

    handle
}

#[allow(clippy::too_many_arguments)]
async fn run_rebuild<L>(
    log: Arc<L>,
    receiver: Arc<EventReceiver>,
    world_id: WorldId,
    branch: String,
    from_global_seq: u64,
    clear_existing: bool,
    progress: Arc<RwLock<RebuildProgress>>,
    cancellation: Arc<AtomicBool>,
) -> Result<u64, RebuildError>
where
    L: EventLog + ?Sized,
{
    let stream = StreamKey {
        world_id,
        branch: branch.clone(),
    };
    let ctx = WorldContext::for_world(world_id);

    let total = log
        .count_events_from(&ctx, &branch, from_global_seq)
        .await?;
    {
        let mut prog = progress.write().await;
        prog.total_events = total;
        prog.phase = RebuildPhase::Clearing;
    }

    let projector_name = receiver.projector().name().to_string();
    if clear_existing {
        receiver.projector().clear(&stream).await?;
    }
    receiver
        .watermarks()
        .clear(&projector_name, &stream)
        .await?;

    {
        let mut prog = progress.write().await;
        prog.phase = RebuildPhase::Replaying;
    }

    let processed = Arc::new(AtomicU64::new(0));
    let mut cursor = from_global_seq.saturating_sub(1);

    loop {
        if cancellation.load(Ordering::Relaxed) {
            return Err(RebuildError::Cancelled);
        }

        let page = log
            .list_events(
                &ctx,
                &branch,
                EventFilter {
                    kind: None,
                    after_global_seq: Some(cursor),
                    limit: Some(REPLAY_PAGE),
                },
            )
            .await?;

        for event in &page.items {
            if cancellation.load(Ordering::Relaxed) {
                return Err(RebuildError::Cancelled);
            }
            let delivery = EventDelivery::from(event);
            receiver.handle(&delivery).await?;
            let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
            progress.write().await.processed_events = count;
        }

        match page.next_after_global_seq {
            Some(next) if page.has_more => cursor = next,
            _ => break,
        }
    }

    let count = processed.load(Ordering::Relaxed);
    info!(processed = count, "rebuild replay finished");
    Ok(count)
}
