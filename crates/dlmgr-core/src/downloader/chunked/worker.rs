//! A single chunk's download worker.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::error::EngineError;
use crate::segmenter::ChunkRange;
use crate::storage::{StorageWriter, StorageWriterBuilder};
use crate::transport::{self, CancellationHandle, QuotaSource};

/// Downloads one chunk into its own temp file, resuming from `resume_progress`
/// bytes already present if this is a re-dispatch after a pause.
pub async fn download_chunk(
    url: String,
    headers: HashMap<String, String>,
    range: ChunkRange,
    resume_progress: u64,
    temp_path: std::path::PathBuf,
    transport_cfg: TransportConfig,
    quota: Arc<dyn QuotaSource + Send + Sync>,
    cancel: CancellationHandle,
    on_progress: Arc<dyn Fn(u64) + Send + Sync>,
) -> Result<u64, EngineError> {
    tokio::task::spawn_blocking(move || {
        download_chunk_blocking(
            &url,
            &headers,
            range,
            resume_progress,
            &temp_path,
            &transport_cfg,
            quota,
            cancel,
            on_progress,
        )
    })
    .await
    .map_err(|e| EngineError::new(crate::error::ErrorKind::Internal, format!("join error: {e}")))?
}

#[allow(clippy::too_many_arguments)]
fn download_chunk_blocking(
    url: &str,
    headers: &HashMap<String, String>,
    range: ChunkRange,
    resume_progress: u64,
    temp_path: &std::path::Path,
    transport_cfg: &TransportConfig,
    quota: Arc<dyn QuotaSource + Send + Sync>,
    cancel: CancellationHandle,
    on_progress: Arc<dyn Fn(u64) + Send + Sync>,
) -> Result<u64, EngineError> {
    let writer = if resume_progress > 0 && temp_path.exists() {
        StorageWriter::open_existing(temp_path)?
    } else {
        let mut builder = StorageWriterBuilder::create(temp_path)?;
        builder.preallocate(range.len())?;
        builder.build()
    };

    let from = range.start + resume_progress.min(range.len());
    let to = range.end.saturating_sub(1);

    let progress_quota = ChunkProgressQuota {
        inner: quota,
        written: std::sync::atomic::AtomicU64::new(resume_progress),
        on_progress,
    };

    let outcome = transport::fetch(
        url,
        headers,
        transport_cfg,
        Some((from, Some(to))),
        resume_progress,
        &writer,
        &progress_quota,
        &cancel,
    )?;

    writer.sync()?;
    Ok(resume_progress + outcome.bytes_written)
}

struct ChunkProgressQuota {
    inner: Arc<dyn QuotaSource + Send + Sync>,
    written: std::sync::atomic::AtomicU64,
    on_progress: Arc<dyn Fn(u64) + Send + Sync>,
}

impl QuotaSource for ChunkProgressQuota {
    fn request(&self, wanted: u64) -> u64 {
        let granted = self.inner.request(wanted);
        if granted > 0 {
            let total = self
                .written
                .fetch_add(granted, std::sync::atomic::Ordering::Relaxed)
                + granted;
            (self.on_progress)(total);
        }
        granted
    }
}
