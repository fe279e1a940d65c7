//! Download Manager: the single entry point that turns `submit`/`pause`/
//! `cancel`/... calls into persistent-store transitions and dispatches the
//! right transfer strategy, honoring the global concurrency ceiling.

mod budget;
mod dispatch;
mod execute;
mod lock;
mod retry;
mod stats;
mod strategy;
mod sweeper;

pub use stats::{EngineStats, QueueTimeEstimate};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

use crate::bandwidth::BandwidthScheduler;
use crate::catalog::CatalogStore;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink};
use crate::progress::ProgressThrottler;
use crate::recovery;
use crate::store::types::{DownloadId, DownloadState, NewDownload};
use crate::store::PersistentStore;
use crate::transport::CancellationHandle;

use budget::ConcurrencySlots;
use lock::ProcessingLock;

/// Why an in-flight transfer's cancellation handle was tripped. Distinguishes
/// a user pause/cancel from the stale-job sweeper's force-cleanup so the
/// executor can apply the right store transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelReason {
    Pause,
    Cancel,
    Stale,
}

pub(crate) struct ActiveJob {
    pub handle: CancellationHandle,
    pub reason: Arc<AsyncMutex<Option<CancelReason>>>,
}

/// Parameters accepted by `submit`.
pub struct SubmitParams {
    pub id: DownloadId,
    pub title: String,
    pub download_path: Option<String>,
    pub preserve_structure: bool,
    pub force_overwrite: bool,
    pub priority: i32,
}

/// The engine's single stateful coordinator. Construct with [`DownloadManager::spawn`],
/// which also starts the background bandwidth ticker and stale-job sweeper.
pub struct DownloadManager<S: EventSink> {
    pub(crate) store: PersistentStore,
    pub(crate) catalog: Arc<dyn CatalogStore>,
    pub(crate) config: EngineConfig,
    pub(crate) bandwidth: Arc<BandwidthScheduler>,
    pub(crate) progress: ProgressThrottler<S>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) slots: ConcurrencySlots,
    pub(crate) lock: ProcessingLock,
    pub(crate) active: AsyncMutex<HashMap<DownloadId, ActiveJob>>,
    pub(crate) last_activity: AsyncMutex<HashMap<DownloadId, Instant>>,
    pub(crate) held_until: AsyncMutex<HashMap<DownloadId, Instant>>,
    pub(crate) reserved: AsyncMutex<std::collections::HashSet<DownloadId>>,
    dispatch_generation: AtomicU64,
}

impl<S: EventSink + Clone> DownloadManager<S> {
    /// Initializes the store-level recovery pass, seeds the bandwidth
    /// scheduler, and starts the background ticker/sweeper tasks.
    pub async fn spawn(
        config: EngineConfig,
        store: PersistentStore,
        catalog: Arc<dyn CatalogStore>,
        sink: S,
    ) -> Result<Arc<Self>, EngineError> {
        let recovered = recovery::run(&store).await?;

        let bandwidth = Arc::new(BandwidthScheduler::new(config.bandwidth.clone()));
        if config.bandwidth.auto_detect {
            bandwidth.seed_default_estimate();
        }

        let progress = ProgressThrottler::new(
            sink.clone(),
            Duration::from_millis(config.progress_update_interval_ms),
        );

        let manager = Arc::new(DownloadManager {
            slots: ConcurrencySlots::new(config.max_concurrent),
            lock: ProcessingLock::new(
                Duration::from_millis(config.lock_timeout_ms),
                Duration::from_millis(config.lock_check_interval_ms),
            ),
            active: AsyncMutex::new(HashMap::new()),
            last_activity: AsyncMutex::new(HashMap::new()),
            held_until: AsyncMutex::new(HashMap::new()),
            reserved: AsyncMutex::new(std::collections::HashSet::new()),
            dispatch_generation: AtomicU64::new(0),
            sink: Arc::new(sink),
            progress,
            bandwidth,
            config,
            catalog,
            store,
        });

        if !recovered.is_empty() {
            manager.sink.emit(EngineEvent::DownloadsRestored { ids: recovered });
        }

        dispatch::spawn_bandwidth_ticker(manager.clone());
        sweeper::spawn(manager.clone());
        manager.kick_dispatch();

        Ok(manager)
    }

    /// Triggers a dispatch pass in the background; safe to call from any
    /// context, any number of times — passes beyond the first are no-ops if
    /// one is already in flight for the same generation.
    pub(crate) fn kick_dispatch(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatch::run_pass(&manager).await {
                tracing::warn!("dispatch pass failed: {}", e);
            }
        });
    }

    pub async fn submit(self: &Arc<Self>, params: SubmitParams) -> Result<(), EngineError> {
        if params.title.trim().is_empty() {
            return Err(EngineError::input_invalid("title must not be empty"));
        }
        let info = self
            .catalog
            .get_file_download_info(params.id)
            .ok_or_else(|| EngineError::input_invalid("unknown catalog id"))?;
        let url = info.url.ok_or_else(|| EngineError::input_invalid("catalog entry has no url"))?;

        let record = NewDownload {
            id: params.id,
            title: params.title,
            url: Some(url),
            download_path: params.download_path,
            preserve_structure: params.preserve_structure,
            force_overwrite: params.force_overwrite,
            priority: params.priority,
            max_retries: self.config.retry.max_retries as i32,
        };

        match self.store.add_download(&record).await? {
            Some(row) => {
                self.sink.emit(EngineEvent::Queued {
                    id: row.id,
                    title: row.title,
                    position: row.queue_position,
                });
            }
            None => {
                tracing::debug!(id = params.id, "submit: download already exists, ignoring");
            }
        }
        self.kick_dispatch();
        Ok(())
    }

    pub async fn pause(self: &Arc<Self>, id: DownloadId) -> Result<(), EngineError> {
        let row = self.store.get_by_id(id).await?.ok_or_else(|| EngineError::input_invalid("unknown id"))?;
        match row.state {
            DownloadState::Downloading => {
                self.signal_cancel(id, CancelReason::Pause).await;
                Ok(())
            }
            DownloadState::Queued => {
                self.reserved.lock().await.remove(&id);
                self.store.set_state(id, DownloadState::Paused, None).await?;
                self.progress.cancel_pending(id);
                self.sink.emit(EngineEvent::Paused { id, percent: Some(row.progress) });
                Ok(())
            }
            other => Err(EngineError::input_invalid(format!("cannot pause from state {:?}", other))),
        }
    }

    pub async fn resume(self: &Arc<Self>, id: DownloadId) -> Result<(), EngineError> {
        let row = self.store.get_by_id(id).await?.ok_or_else(|| EngineError::input_invalid("unknown id"))?;
        if row.state != DownloadState::Paused {
            return Err(EngineError::input_invalid(format!("cannot resume from state {:?}", row.state)));
        }
        self.store.set_state(id, DownloadState::Queued, None).await?;
        self.kick_dispatch();
        Ok(())
    }

    pub async fn cancel(self: &Arc<Self>, id: DownloadId) -> Result<(), EngineError> {
        let row = self.store.get_by_id(id).await?.ok_or_else(|| EngineError::input_invalid("unknown id"))?;
        match row.state {
            DownloadState::Downloading => {
                self.signal_cancel(id, CancelReason::Cancel).await;
                Ok(())
            }
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled => {
                Err(EngineError::input_invalid("download already in a terminal state"))
            }
            _ => {
                self.reserved.lock().await.remove(&id);
                execute::cleanup_artifacts(self, &row).await;
                self.store.set_state(id, DownloadState::Cancelled, None).await?;
                self.progress.cancel_pending(id);
                self.sink.emit(EngineEvent::Cancelled { id });
                self.kick_dispatch();
                Ok(())
            }
        }
    }

    pub async fn retry(self: &Arc<Self>, id: DownloadId) -> Result<(), EngineError> {
        let row = self.store.get_by_id(id).await?.ok_or_else(|| EngineError::input_invalid("unknown id"))?;
        if !matches!(
            row.state,
            DownloadState::Cancelled | DownloadState::Failed | DownloadState::Awaiting | DownloadState::Paused
        ) {
            return Err(EngineError::input_invalid(format!("cannot retry from state {:?}", row.state)));
        }
        execute::cleanup_artifacts(self, &row).await;
        self.store
            .update_download(
                id,
                &crate::store::types::DownloadPatch {
                    retry_count: Some(0),
                    last_error: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.store.update_progress(id, 0.0, 0).await.ok();
        self.store.set_state(id, DownloadState::Queued, Some(r#"{"reason":"manual_retry"}"#)).await?;
        self.kick_dispatch();
        Ok(())
    }

    pub async fn confirm_overwrite(self: &Arc<Self>, id: DownloadId) -> Result<(), EngineError> {
        let row = self.store.get_by_id(id).await?.ok_or_else(|| EngineError::input_invalid("unknown id"))?;
        if row.state != DownloadState::Awaiting {
            return Err(EngineError::input_invalid(format!("cannot confirm overwrite from state {:?}", row.state)));
        }
        self.store
            .update_download(
                id,
                &crate::store::types::DownloadPatch {
                    force_overwrite: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        self.store.set_state(id, DownloadState::Queued, None).await?;
        self.kick_dispatch();
        Ok(())
    }

    pub async fn delete(self: &Arc<Self>, id: DownloadId) -> Result<(), EngineError> {
        let row = self.store.get_by_id(id).await?.ok_or_else(|| EngineError::input_invalid("unknown id"))?;
        if row.state == DownloadState::Downloading {
            self.signal_cancel(id, CancelReason::Cancel).await;
            // Wait briefly for the executor to observe cancellation and exit
            // before we delete the row out from under it.
            for _ in 0..50 {
                if !self.active.lock().await.contains_key(&id) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        self.reserved.lock().await.remove(&id);
        execute::cleanup_artifacts(self, &row).await;
        if let Some(ref save_path) = row.save_path {
            std::fs::remove_file(save_path).ok();
        }
        self.store.delete_download(id).await?;
        self.kick_dispatch();
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<EngineStats, EngineError> {
        stats::get_stats(self).await
    }

    pub async fn get_queue_time_estimate(&self, id: Option<DownloadId>) -> Result<QueueTimeEstimate, EngineError> {
        stats::get_queue_time_estimate(self, id).await
    }

    async fn signal_cancel(self: &Arc<Self>, id: DownloadId, reason: CancelReason) {
        let active = self.active.lock().await;
        if let Some(job) = active.get(&id) {
            *job.reason.lock().await = Some(reason);
            job.handle.cancel();
        }
    }
}
