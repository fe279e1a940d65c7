//! Chunked Downloader: splits a known file length into N byte ranges,
//! downloads each concurrently with its own bandwidth writer, and merges the
//! completed chunks into the final file.

mod merge;
mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::bandwidth::{BandwidthScheduler, WriterKey};
use crate::config::ChunkedConfig;
use crate::config::TransportConfig;
use crate::error::{EngineError, ErrorKind};
use crate::segmenter::{self, ChunkRange};
use crate::storage;
use crate::store::types::{ChunkPatch, ChunkState, DownloadId};
use crate::store::PersistentStore;
use crate::transport::CancellationHandle;

use super::BandwidthQuota;

/// What the caller asked the chunked downloader to fetch.
pub struct ChunkedRequest {
    pub download_id: DownloadId,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub final_path: PathBuf,
    pub total_bytes: u64,
    pub chunk_count: usize,
}

/// Per-chunk detail inside a [`ChunkedProgressSnapshot`].
#[derive(Debug, Clone)]
pub struct ChunkSnapshotEntry {
    pub chunk_index: i64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub completed: bool,
}

/// A live snapshot of chunk progress, reported to the manager on every
/// granted write so it can forward a throttled `Progressing` event.
#[derive(Debug, Clone)]
pub struct ChunkedProgressSnapshot {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub active_chunks: i64,
    pub completed_chunks: i64,
    pub total_chunks: i64,
    pub chunks: Vec<ChunkSnapshotEntry>,
}

pub struct ChunkedOutcome {
    pub bytes_written: u64,
}

/// Runs a chunked download to completion: lays out chunk rows (once, in a
/// single transaction) if this is the first dispatch, otherwise resumes from
/// whatever chunk rows and temp files already exist, downloads every
/// incomplete chunk under `max_concurrent_chunks`, merges, and renames.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    req: ChunkedRequest,
    store: &PersistentStore,
    bandwidth: &Arc<BandwidthScheduler>,
    transport_cfg: &TransportConfig,
    cfg: &ChunkedConfig,
    cancel: CancellationHandle,
    on_progress: Arc<dyn Fn(ChunkedProgressSnapshot) + Send + Sync>,
) -> Result<ChunkedOutcome, EngineError> {
    let existing = store.get_chunks(req.download_id).await?;
    if existing.is_empty() {
        let ranges = segmenter::plan_chunks(req.total_bytes, req.chunk_count);
        store.create_chunks(req.download_id, &ranges).await?;
    }
    let chunk_rows = store.get_chunks(req.download_id).await?;
    let total_chunks = chunk_rows.len() as i64;

    let completed = Arc::new(std::sync::Mutex::new(
        chunk_rows
            .iter()
            .filter(|c| c.state == ChunkState::Completed)
            .map(|c| c.chunk_index as usize)
            .collect::<std::collections::HashSet<_>>(),
    ));
    let per_chunk_bytes = Arc::new(std::sync::Mutex::new(
        chunk_rows
            .iter()
            .map(|c| (c.chunk_index, c.downloaded_bytes as u64))
            .collect::<HashMap<i64, u64>>(),
    ));
    let chunk_sizes: Arc<HashMap<i64, u64>> = Arc::new(
        chunk_rows
            .iter()
            .map(|c| (c.chunk_index, (c.end_byte - c.start_byte + 1) as u64))
            .collect(),
    );
    let active = Arc::new(AtomicU64::new(0));
    let aborted = Arc::new(AtomicBool::new(false));
    let abort_reason: Arc<std::sync::Mutex<Option<EngineError>>> = Arc::new(std::sync::Mutex::new(None));

    let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent_chunks.max(1)));
    let mut handles = Vec::new();

    for row in &chunk_rows {
        if row.state == ChunkState::Completed {
            continue;
        }
        let range = ChunkRange {
            start: row.start_byte as u64,
            end: row.end_byte as u64,
        };
        let chunk_index = row.chunk_index;
        let resume_progress = row.downloaded_bytes as u64;
        let temp_path = row
            .temp_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| storage::chunk_temp_path(&req.final_path, chunk_index as usize));

        let permit_sema = semaphore.clone();
        let store = store.clone();
        let bandwidth = bandwidth.clone();
        let transport_cfg = transport_cfg.clone();
        let cfg_retries = cfg.chunk_retries;
        let url = req.url.clone();
        let headers = req.headers.clone();
        let cancel = cancel.clone();
        let download_id = req.download_id;
        let completed = completed.clone();
        let per_chunk_bytes = per_chunk_bytes.clone();
        let chunk_sizes = chunk_sizes.clone();
        let active = active.clone();
        let aborted = aborted.clone();
        let abort_reason = abort_reason.clone();
        let on_progress = on_progress.clone();
        let total_bytes = req.total_bytes;

        handles.push((chunk_index, temp_path.clone(), tokio::spawn(async move {
            let _permit = permit_sema.acquire_owned().await.expect("semaphore closed");
            active.fetch_add(1, Ordering::SeqCst);

            let key = WriterKey::chunk(download_id, chunk_index);
            bandwidth.register(key);

            let mut attempt = 0u32;
            let mut progress = resume_progress;
            let result = loop {
                if cancel.is_cancelled() {
                    break Err(EngineError::cancelled());
                }
                store
                    .update_chunk(
                        download_id,
                        chunk_index,
                        &ChunkPatch {
                            state: Some(ChunkState::Downloading),
                            temp_file: Some(Some(temp_path.to_string_lossy().to_string())),
                            ..Default::default()
                        },
                    )
                    .await
                    .ok();

                let quota = Arc::new(BandwidthQuota::new(bandwidth.clone(), key));
                let chunk_progress_cb: Arc<dyn Fn(u64) + Send + Sync> = {
                    let on_progress = on_progress.clone();
                    let active = active.clone();
                    let completed = completed.clone();
                    let per_chunk_bytes = per_chunk_bytes.clone();
                    let chunk_sizes = chunk_sizes.clone();
                    Arc::new(move |written_total: u64| {
                        let (downloaded_bytes, chunks) = {
                            let mut map = per_chunk_bytes.lock().unwrap();
                            map.insert(chunk_index, written_total);
                            let completed_set = completed.lock().unwrap();
                            let chunks: Vec<ChunkSnapshotEntry> = map
                                .iter()
                                .map(|(&idx, &downloaded)| ChunkSnapshotEntry {
                                    chunk_index: idx,
                                    downloaded_bytes: downloaded,
                                    total_bytes: *chunk_sizes.get(&idx).unwrap_or(&0),
                                    completed: completed_set.contains(&(idx as usize)),
                                })
                                .collect();
                            (map.values().sum(), chunks)
                        };
                        on_progress(ChunkedProgressSnapshot {
                            downloaded_bytes,
                            total_bytes,
                            active_chunks: active.load(Ordering::SeqCst) as i64,
                            completed_chunks: completed.lock().unwrap().len() as i64,
                            total_chunks,
                            chunks,
                        });
                    })
                };

                match worker::download_chunk(
                    url.clone(),
                    headers.clone(),
                    range,
                    progress,
                    temp_path.clone(),
                    transport_cfg.clone(),
                    quota,
                    cancel.clone(),
                    chunk_progress_cb,
                )
                .await
                {
                    Ok(total_for_chunk) => break Ok(total_for_chunk),
                    Err(e) if e.kind == ErrorKind::Cancelled => break Err(e),
                    Err(e) => {
                        progress = std::fs::metadata(&temp_path).map(|m| m.len()).unwrap_or(0);
                        attempt += 1;
                        if attempt > cfg_retries {
                            break Err(e);
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64)).await;
                    }
                }
            };

            bandwidth.unregister(key);
            active.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(final_bytes) => {
                    per_chunk_bytes.lock().unwrap().insert(chunk_index, final_bytes);
                    store
                        .update_chunk(
                            download_id,
                            chunk_index,
                            &ChunkPatch {
                                downloaded_bytes: Some(final_bytes as i64),
                                state: Some(ChunkState::Completed),
                                ..Default::default()
                            },
                        )
                        .await
                        .ok();
                    completed.lock().unwrap().insert(chunk_index as usize);
                    Ok(final_bytes)
                }
                Err(e) => {
                    store
                        .update_chunk(
                            download_id,
                            chunk_index,
                            &ChunkPatch {
                                state: Some(ChunkState::Failed),
                                ..Default::default()
                            },
                        )
                        .await
                        .ok();
                    if e.kind != ErrorKind::Cancelled {
                        aborted.store(true, Ordering::SeqCst);
                        *abort_reason.lock().unwrap() = Some(e.clone());
                    }
                    Err(e)
                }
            }
        })));
    }

    for (_idx, _path, handle) in handles {
        match handle.await {
            Ok(Ok(_)) | Ok(Err(_)) => {}
            Err(e) => {
                return Err(EngineError::new(ErrorKind::Internal, format!("chunk task join error: {e}")));
            }
        }
    }

    if aborted.load(Ordering::SeqCst) {
        let reason = abort_reason.lock().unwrap().take();
        return Err(reason.unwrap_or_else(|| {
            EngineError::new(ErrorKind::NetworkFatal, "one or more chunks exceeded retry limit")
        }));
    }
    if cancel.is_cancelled() {
        return Err(EngineError::cancelled());
    }

    // Every chunk must be accounted for before merging (including chunks
    // that were already `completed` from a prior run and thus skipped above).
    let final_rows = store.get_chunks(req.download_id).await?;
    if final_rows.iter().any(|c| c.state != ChunkState::Completed) {
        return Err(EngineError::new(ErrorKind::Internal, "not all chunks completed before merge"));
    }

    let chunk_paths: Vec<PathBuf> = final_rows
        .iter()
        .map(|c| {
            c.temp_file
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| storage::chunk_temp_path(&req.final_path, c.chunk_index as usize))
        })
        .collect();

    let part_path = storage::temp_path(&req.final_path);
    let merged_bytes = merge::merge_chunks(chunk_paths.clone(), part_path.clone(), req.total_bytes, cfg.clone()).await?;

    if req.final_path.exists() {
        std::fs::remove_file(&req.final_path).ok();
    }
    std::fs::rename(&part_path, &req.final_path).map_err(EngineError::from)?;

    if cfg.cleanup_on_complete {
        for p in &chunk_paths {
            std::fs::remove_file(p).ok();
        }
        store.delete_chunks(req.download_id).await?;
    }

    Ok(ChunkedOutcome {
        bytes_written: merged_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn layout_is_persisted_before_any_chunk_worker_starts() {
        let store = PersistentStore::initialize_in_memory().await.unwrap();
        let rec = crate::store::types::NewDownload {
            id: 1,
            title: "x.bin".into(),
            url: None,
            download_path: None,
            preserve_structure: false,
            force_overwrite: false,
            priority: 1,
            max_retries: 3,
        };
        store.add_download(&rec).await.unwrap();
        let ranges = segmenter::plan_chunks(1000, 4);
        store.create_chunks(1, &ranges).await.unwrap();
        let chunks = store.get_chunks(1).await.unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.state == ChunkState::Pending));
    }
}
