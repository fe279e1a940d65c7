//! Single-Stream Downloader: one HTTPS GET, optional `Range: bytes=N-` to
//! resume, writes to `<save_path>.part`, atomic rename on completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::error::{EngineError, ErrorKind};
use crate::storage::{self, StorageWriter, StorageWriterBuilder};
use crate::transport::{self, CancellationHandle, QuotaSource};

/// What the caller asked the single-stream downloader to do.
pub struct SingleStreamRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub final_path: PathBuf,
    pub expected_total: Option<u64>,
    pub force_overwrite: bool,
}

/// Result of a completed (or resumed-then-completed) single-stream transfer.
pub struct SingleStreamOutcome {
    pub bytes_written: u64,
    pub resumed_from: u64,
}

/// Runs one single-stream download to completion. Blocking (curl) work is
/// pushed onto a blocking thread; callers should already be inside an async
/// context.
pub async fn run(
    req: SingleStreamRequest,
    transport_cfg: TransportConfig,
    quota: Arc<dyn QuotaSource + Send + Sync>,
    cancel: CancellationHandle,
    on_progress: Arc<dyn Fn(u64) + Send + Sync>,
) -> Result<SingleStreamOutcome, EngineError> {
    tokio::task::spawn_blocking(move || run_blocking(req, transport_cfg, quota, cancel, on_progress))
        .await
        .map_err(|e| EngineError::new(ErrorKind::Internal, format!("join error: {e}")))?
}

fn run_blocking(
    req: SingleStreamRequest,
    transport_cfg: TransportConfig,
    quota: Arc<dyn QuotaSource + Send + Sync>,
    cancel: CancellationHandle,
    on_progress: Arc<dyn Fn(u64) + Send + Sync>,
) -> Result<SingleStreamOutcome, EngineError> {
    let part_path = storage::temp_path(&req.final_path);

    let resume_from = prepare_part_file(&req.final_path, &part_path, req.expected_total, req.force_overwrite)?;

    let writer = if resume_from > 0 {
        StorageWriter::open_existing(&part_path)?
    } else {
        let mut builder = StorageWriterBuilder::create(&part_path)?;
        if let Some(total) = req.expected_total {
            builder.preallocate(total)?;
        }
        builder.build()
    };

    let range = if resume_from > 0 { Some((resume_from, None)) } else { None };

    let progress_quota = ProgressQuota {
        inner: quota,
        written_so_far: std::sync::atomic::AtomicU64::new(resume_from),
        on_progress: on_progress.clone(),
    };

    let outcome = match transport::fetch(
        &req.url,
        &req.headers,
        &transport_cfg,
        range,
        resume_from,
        &writer,
        &progress_quota,
        &cancel,
    ) {
        Ok(o) => o,
        Err(e) if e.kind == ErrorKind::RangeUnsupported && resume_from > 0 => {
            // Server answered 200 to a ranged request: it will not honor
            // resume. Discard the partial and restart from zero.
            drop(writer);
            std::fs::remove_file(&part_path).ok();
            let mut builder = StorageWriterBuilder::create(&part_path)?;
            if let Some(total) = req.expected_total {
                builder.preallocate(total)?;
            }
            let fresh_writer = builder.build();
            let fresh_quota = ProgressQuota {
                inner: progress_quota.inner,
                written_so_far: std::sync::atomic::AtomicU64::new(0),
                on_progress,
            };
            let result = transport::fetch(
                &req.url,
                &req.headers,
                &transport_cfg,
                None,
                0,
                &fresh_writer,
                &fresh_quota,
                &cancel,
            )?;
            fresh_writer.sync()?;
            finalize(fresh_writer, &req.final_path)?;
            return Ok(SingleStreamOutcome {
                bytes_written: result.bytes_written,
                resumed_from: 0,
            });
        }
        Err(e) => return Err(e),
    };

    writer.sync()?;
    finalize(writer, &req.final_path)?;

    Ok(SingleStreamOutcome {
        bytes_written: resume_from + outcome.bytes_written,
        resumed_from: resume_from,
    })
}

fn finalize(writer: StorageWriter, final_path: &Path) -> Result<(), EngineError> {
    if final_path.exists() {
        std::fs::remove_file(final_path).ok();
    }
    writer.finalize(final_path)?;
    Ok(())
}

/// Determines the resume offset and leaves `part_path` in the state the
/// transfer should continue from: if a non-empty, undersized `final_path`
/// exists and `force_overwrite` is false, it is renamed to `part_path` and
/// treated as a partial; otherwise any pre-existing `part_path` is used
/// as-is.
fn prepare_part_file(
    final_path: &Path,
    part_path: &Path,
    expected_total: Option<u64>,
    force_overwrite: bool,
) -> Result<u64, EngineError> {
    // An unknown total means the HEAD probe failed; per the boundary
    // behavior for that case, always start fresh rather than attempt resume.
    if expected_total.is_none() {
        if part_path.exists() {
            std::fs::remove_file(part_path)?;
        }
        return Ok(0);
    }

    if !part_path.exists() && !force_overwrite && final_path.exists() {
        if let Ok(meta) = std::fs::metadata(final_path) {
            let size = meta.len();
            let smaller_than_total = expected_total.map(|t| size < t).unwrap_or(size > 0);
            if size > 0 && smaller_than_total {
                std::fs::rename(final_path, part_path)?;
            }
        }
    }

    if let Ok(meta) = std::fs::metadata(part_path) {
        let size = meta.len();
        let still_partial = expected_total.map(|t| size > 0 && size < t).unwrap_or(size > 0);
        if still_partial {
            return Ok(size);
        }
        if let Some(total) = expected_total {
            if size >= total {
                // Resumed partial is not smaller than the expected total: corrupted, restart.
                std::fs::remove_file(part_path)?;
            }
        }
    }

    Ok(0)
}

/// Wraps a quota source so every granted byte is also reported to the
/// progress callback, without the transport module needing to know about it.
struct ProgressQuota {
    inner: Arc<dyn QuotaSource + Send + Sync>,
    written_so_far: std::sync::atomic::AtomicU64,
    on_progress: Arc<dyn Fn(u64) + Send + Sync>,
}

impl QuotaSource for ProgressQuota {
    fn request(&self, wanted: u64) -> u64 {
        let granted = self.inner.request(wanted);
        if granted > 0 {
            let total = self
                .written_so_far
                .fetch_add(granted, std::sync::atomic::Ordering::Relaxed)
                + granted;
            (self.on_progress)(total);
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_part_file_starts_fresh_with_no_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.bin");
        let part_path = storage::temp_path(&final_path);
        let resume = prepare_part_file(&final_path, &part_path, Some(100), false).unwrap();
        assert_eq!(resume, 0);
    }

    #[test]
    fn prepare_part_file_resumes_from_existing_partial() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.bin");
        let part_path = storage::temp_path(&final_path);
        std::fs::write(&part_path, vec![0u8; 40]).unwrap();
        let resume = prepare_part_file(&final_path, &part_path, Some(100), false).unwrap();
        assert_eq!(resume, 40);
    }

    #[test]
    fn prepare_part_file_adopts_undersized_final_file_as_partial() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.bin");
        let part_path = storage::temp_path(&final_path);
        std::fs::write(&final_path, vec![0u8; 40]).unwrap();
        let resume = prepare_part_file(&final_path, &part_path, Some(100), false).unwrap();
        assert_eq!(resume, 40);
        assert!(part_path.exists());
        assert!(!final_path.exists());
    }

    #[test]
    fn prepare_part_file_discards_oversized_partial() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("a.bin");
        let part_path = storage::temp_path(&final_path);
        std::fs::write(&part_path, vec![0u8; 200]).unwrap();
        let resume = prepare_part_file(&final_path, &part_path, Some(100), false).unwrap();
        assert_eq!(resume, 0);
        assert!(!part_path.exists());
    }
}
