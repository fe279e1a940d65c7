//! Per-job execution: drives exactly one download from `queued` through
//! strategy selection, transfer, and whatever terminal or re-queued state it
//! lands in. Owns the bridge from the transfer strategies' synchronous
//! progress callbacks (invoked from blocking curl threads) to the async
//! Persistent Store and Progress Throttler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::downloader::{chunked, single, BandwidthQuota};
use crate::error::ErrorKind;
use crate::events::{ChunkProgress, EngineEvent};
use crate::events::EventSink;
use crate::store::types::{DownloadId, DownloadPatch, DownloadRow, DownloadState};
use crate::transport::CancellationHandle;

use super::strategy::{self, Prepared};
use super::{retry, ActiveJob, CancelReason, DownloadManager};

/// One sample off a transfer's progress callback: the running byte count
/// plus, for a chunked transfer, the per-chunk breakdown `forward_progress`
/// needs to populate `EngineEvent::Progressing`'s chunk fields.
struct ProgressSample {
    downloaded_bytes: u64,
    active_chunks: Option<i64>,
    completed_chunks: Option<i64>,
    total_chunks: Option<i64>,
    chunk_progress: Option<Vec<ChunkProgress>>,
}

impl ProgressSample {
    fn whole_file(downloaded_bytes: u64) -> Self {
        ProgressSample {
            downloaded_bytes,
            active_chunks: None,
            completed_chunks: None,
            total_chunks: None,
            chunk_progress: None,
        }
    }
}

impl From<chunked::ChunkedProgressSnapshot> for ProgressSample {
    fn from(snap: chunked::ChunkedProgressSnapshot) -> Self {
        let chunk_progress = snap
            .chunks
            .iter()
            .map(|c| ChunkProgress {
                chunk_index: c.chunk_index,
                downloaded_bytes: c.downloaded_bytes as i64,
                total_bytes: c.total_bytes as i64,
                state: if c.completed { "completed".to_string() } else { "downloading".to_string() },
            })
            .collect();
        ProgressSample {
            downloaded_bytes: snap.downloaded_bytes,
            active_chunks: Some(snap.active_chunks),
            completed_chunks: Some(snap.completed_chunks),
            total_chunks: Some(snap.total_chunks),
            chunk_progress: Some(chunk_progress),
        }
    }
}

/// Drives `id` to completion, failure, pause, or cancellation, then releases
/// every piece of bookkeeping the dispatch loop attached to it regardless of
/// which branch below was taken, and kicks another dispatch pass.
pub(super) async fn run_job<S: EventSink + Clone>(manager: Arc<DownloadManager<S>>, id: DownloadId) {
    let cancel = CancellationHandle::new();
    let reason: Arc<AsyncMutex<Option<CancelReason>>> = Arc::new(AsyncMutex::new(None));
    manager.active.lock().await.insert(
        id,
        ActiveJob {
            handle: cancel.clone(),
            reason: reason.clone(),
        },
    );
    manager.last_activity.lock().await.insert(id, Instant::now());

    run_job_inner(&manager, id, cancel, reason).await;

    manager.active.lock().await.remove(&id);
    manager.last_activity.lock().await.remove(&id);
    manager.reserved.lock().await.remove(&id);
    manager.slots.release_one();
    manager.kick_dispatch();
}

async fn run_job_inner<S: EventSink + Clone>(
    manager: &Arc<DownloadManager<S>>,
    id: DownloadId,
    cancel: CancellationHandle,
    reason: Arc<AsyncMutex<Option<CancelReason>>>,
) {
    let row = match manager.store.get_by_id(id).await {
        Ok(Some(row)) => row,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(id, "failed to load download row before dispatch: {}", e);
            return;
        }
    };

    let Some(url) = row.url.clone() else {
        retry::fail_download(manager, &row, ErrorKind::InputInvalid, "download has no url").await;
        return;
    };

    let prepared = match strategy::prepare(&row, &url, &manager.config, manager.catalog.as_ref()).await {
        Ok(p) => p,
        Err(e) => {
            retry::fail_download(manager, &row, e.kind, &e.user_visible_message()).await;
            return;
        }
    };

    let prepared = match prepared {
        Prepared::NeedsConfirmation { save_path, file_check } => {
            let save_path_str = save_path.to_string_lossy().to_string();
            manager
                .store
                .update_download(
                    id,
                    &DownloadPatch {
                        save_path: Some(Some(save_path_str.clone())),
                        ..Default::default()
                    },
                )
                .await
                .ok();
            manager.store.set_state(id, DownloadState::Awaiting, None).await.ok();
            manager.sink.emit(EngineEvent::AwaitingConfirmation {
                id,
                title: row.title.clone(),
                save_path: save_path_str,
                file_check,
            });
            return;
        }
        Prepared::Ready(p) => p,
    };

    let save_path_str = prepared.save_path.to_string_lossy().to_string();
    manager
        .store
        .update_download(
            id,
            &DownloadPatch {
                save_path: Some(Some(save_path_str.clone())),
                total_bytes: prepared.total_bytes.map(|t| t as i64),
                ..Default::default()
            },
        )
        .await
        .ok();
    manager.store.set_state(id, DownloadState::Downloading, None).await.ok();

    let resuming = row.downloaded_bytes > 0;
    manager.sink.emit(EngineEvent::Starting {
        id,
        title: row.title.clone(),
        resuming,
        resume_from_byte: resuming.then_some(row.downloaded_bytes as u64),
        chunked: prepared.chunked,
        num_chunks: prepared.chunked.then_some(prepared.chunk_count as i64),
    });

    let (progress_tx, progress_rx) = mpsc::unbounded_channel::<ProgressSample>();
    let total_bytes_hint = prepared.total_bytes.unwrap_or(row.total_bytes.max(0) as u64);
    let forwarder = tokio::spawn(forward_progress(
        manager.clone(),
        id,
        prepared.chunked,
        total_bytes_hint,
        progress_rx,
    ));

    let outcome = if prepared.chunked {
        run_chunked(manager, id, &url, &prepared, &cancel, progress_tx).await
    } else {
        run_single(manager, id, &url, &prepared, &cancel, progress_tx).await
    };

    forwarder.await.ok();

    match outcome {
        Ok(bytes_written) => {
            manager.progress.cancel_pending(id);
            manager
                .store
                .update_progress(id, 1.0, bytes_written as i64)
                .await
                .ok();
            manager.store.set_state(id, DownloadState::Completed, None).await.ok();
            manager.sink.emit(EngineEvent::Completed {
                id,
                save_path: save_path_str,
                percent: 1.0,
                chunked: prepared.chunked,
            });
        }
        Err(e) if e.kind == ErrorKind::Cancelled => {
            let observed = reason.lock().await.take().unwrap_or(CancelReason::Stale);
            handle_cancellation(manager, &row, observed).await;
        }
        Err(e) => {
            retry::fail_download(manager, &row, e.kind, &e.user_visible_message()).await;
        }
    }
}

async fn run_single<S: EventSink + Clone>(
    manager: &Arc<DownloadManager<S>>,
    id: DownloadId,
    url: &str,
    prepared: &strategy::PreparedDownload,
    cancel: &CancellationHandle,
    progress_tx: mpsc::UnboundedSender<ProgressSample>,
) -> Result<u64, crate::error::EngineError> {
    let key = crate::bandwidth::WriterKey::whole(id);
    manager.bandwidth.register(key);
    let quota = Arc::new(BandwidthQuota::new(manager.bandwidth.clone(), key));

    let req = single::SingleStreamRequest {
        url: url.to_string(),
        headers: prepared.headers.clone(),
        final_path: prepared.save_path.clone(),
        expected_total: prepared.total_bytes,
        force_overwrite: true,
    };

    let on_progress: Arc<dyn Fn(u64) + Send + Sync> = Arc::new(move |written: u64| {
        let _ = progress_tx.send(ProgressSample::whole_file(written));
    });

    let result = single::run(req, manager.config.transport.clone(), quota, cancel.clone(), on_progress).await;
    manager.bandwidth.unregister(key);
    result.map(|o| o.bytes_written)
}

async fn run_chunked<S: EventSink + Clone>(
    manager: &Arc<DownloadManager<S>>,
    id: DownloadId,
    url: &str,
    prepared: &strategy::PreparedDownload,
    cancel: &CancellationHandle,
    progress_tx: mpsc::UnboundedSender<ProgressSample>,
) -> Result<u64, crate::error::EngineError> {
    let req = chunked::ChunkedRequest {
        download_id: id,
        url: url.to_string(),
        headers: prepared.headers.clone(),
        final_path: prepared.save_path.clone(),
        total_bytes: prepared.total_bytes.unwrap_or(0),
        chunk_count: prepared.chunk_count,
    };

    let on_progress: Arc<dyn Fn(chunked::ChunkedProgressSnapshot) + Send + Sync> = Arc::new(move |snap| {
        let _ = progress_tx.send(ProgressSample::from(snap));
    });

    chunked::run(
        req,
        &manager.store,
        &manager.bandwidth,
        &manager.config.transport,
        &manager.config.chunked,
        cancel.clone(),
        on_progress,
    )
    .await
    .map(|o| o.bytes_written)
}

/// Drains the progress channel: persists the byte count (hot path, best
/// effort), feeds the bandwidth scheduler a fresh throughput sample, and
/// forwards a throttled `Progressing` event.
async fn forward_progress<S: EventSink + Clone>(
    manager: Arc<DownloadManager<S>>,
    id: DownloadId,
    chunked_transfer: bool,
    total_bytes: u64,
    mut rx: mpsc::UnboundedReceiver<ProgressSample>,
) {
    let mut last_sample = Instant::now();
    let mut last_bytes = 0u64;

    while let Some(sample) = rx.recv().await {
        let downloaded = sample.downloaded_bytes;
        manager.last_activity.lock().await.insert(id, Instant::now());

        let percent = if total_bytes > 0 {
            (downloaded as f64 / total_bytes as f64).min(1.0)
        } else {
            0.0
        };
        manager.store.update_progress(id, percent, downloaded as i64).await.ok();

        let now = Instant::now();
        let elapsed = now.duration_since(last_sample);
        if elapsed >= Duration::from_millis(500) && downloaded > last_bytes {
            let delta = downloaded - last_bytes;
            let bps = (delta as f64 / elapsed.as_secs_f64()) as u64;
            if bps > 0 {
                manager.bandwidth.update_detected_bandwidth(bps);
            }
            last_sample = now;
            last_bytes = downloaded;
        }

        let speed_mbps = if elapsed.as_secs_f64() > 0.0 {
            (downloaded.saturating_sub(last_bytes) as f64 / elapsed.as_secs_f64()) / (1024.0 * 1024.0)
        } else {
            0.0
        };

        manager.progress.queue_update(
            id,
            EngineEvent::Progressing {
                id,
                percent,
                speed_mbps,
                total_bytes: total_bytes as i64,
                downloaded_bytes: downloaded as i64,
                remaining_seconds: None,
                chunked: chunked_transfer,
                active_chunks: sample.active_chunks,
                completed_chunks: sample.completed_chunks,
                total_chunks: sample.total_chunks,
                chunk_progress: sample.chunk_progress,
            },
        );
    }
}

async fn handle_cancellation<S: EventSink + Clone>(
    manager: &Arc<DownloadManager<S>>,
    row: &DownloadRow,
    reason: CancelReason,
) {
    let id = row.id;
    manager.progress.cancel_pending(id);
    match reason {
        CancelReason::Pause => {
            manager.store.set_state(id, DownloadState::Paused, None).await.ok();
            let row_now = manager.store.get_by_id(id).await.ok().flatten();
            manager.sink.emit(EngineEvent::Paused {
                id,
                percent: row_now.map(|r| r.progress),
            });
            if !manager.config.chunked.preserve_on_pause {
                cleanup_artifacts(manager, row).await;
            }
        }
        CancelReason::Cancel => {
            cleanup_artifacts(manager, row).await;
            manager.store.set_state(id, DownloadState::Cancelled, None).await.ok();
            manager.sink.emit(EngineEvent::Cancelled { id });
        }
        CancelReason::Stale => {
            retry::fail_download(
                manager,
                row,
                ErrorKind::NetworkTransient,
                "download became unresponsive and was stopped",
            )
            .await;
        }
    }
}

/// Removes the `.part`/chunk temp files and chunk rows for a download. Safe
/// to call on a download with no transfer artifacts yet.
pub(super) async fn cleanup_artifacts<S: EventSink + Clone>(manager: &Arc<DownloadManager<S>>, row: &DownloadRow) {
    if let Some(ref save_path) = row.save_path {
        let path = std::path::PathBuf::from(save_path);
        let part = crate::storage::temp_path(&path);
        std::fs::remove_file(&part).ok();

        if let Ok(chunks) = manager.store.get_chunks(row.id).await {
            for chunk in &chunks {
                let p = chunk
                    .temp_file
                    .as_ref()
                    .map(std::path::PathBuf::from)
                    .unwrap_or_else(|| crate::storage::chunk_temp_path(&path, chunk.chunk_index as usize));
                std::fs::remove_file(p).ok();
            }
        }
    }
    manager.store.delete_chunks(row.id).await.ok();
}
