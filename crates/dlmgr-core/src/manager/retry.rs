//! Retry/backoff policy for whole-job failures: a fixed retry ceiling with a
//! delay proportional to the attempt number, gated on the error kind
//! (chunk-level and transport-level retries already happened beneath this).
//! Only kinds `ErrorKind::is_retryable()` accepts ever see a requeue;
//! everything else (`InputInvalid`, `NetworkFatal`, `FilesystemFatal`,
//! `Internal`, ...) goes straight to a terminal `failed` without touching
//! `retry_count`, matching each kind's own fail-fast/non-retryable contract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ErrorKind;
use crate::events::{EngineEvent, EventSink};
use crate::store::types::{DownloadPatch, DownloadRow, DownloadState};

use super::DownloadManager;

/// Records the failure, then either re-queues the download for another
/// attempt (after `retryDelay * retry_count` has elapsed) or marks it
/// terminally `failed` once `max_retries` is exhausted or `kind` is not
/// retryable in the first place.
pub(super) async fn fail_download<S: EventSink + Clone>(
    manager: &Arc<DownloadManager<S>>,
    row: &DownloadRow,
    kind: ErrorKind,
    message: &str,
) {
    let id = row.id;

    if !kind.is_retryable() {
        manager
            .store
            .update_download(
                id,
                &DownloadPatch {
                    last_error: Some(Some(message.to_string())),
                    ..Default::default()
                },
            )
            .await
            .ok();
        manager
            .store
            .set_state(id, DownloadState::Failed, Some(r#"{"reason":"non_retryable"}"#))
            .await
            .ok();
        manager.sink.emit(EngineEvent::Interrupted {
            id,
            error: message.to_string(),
            save_path: row.save_path.clone(),
        });
        tracing::warn!(id, ?kind, "download failed non-retryably: {}", message);
        return;
    }

    let next_retry_count = row.retry_count + 1;

    manager
        .store
        .update_download(
            id,
            &DownloadPatch {
                retry_count: Some(next_retry_count),
                last_error: Some(Some(message.to_string())),
                ..Default::default()
            },
        )
        .await
        .ok();

    if next_retry_count <= row.max_retries {
        manager.store.update_progress(id, 0.0, 0).await.ok();
        manager
            .store
            .set_state(id, DownloadState::Queued, Some(r#"{"reason":"retry"}"#))
            .await
            .ok();

        let backoff = Duration::from_millis(manager.config.retry.retry_delay_ms * next_retry_count as u64);
        let resume_at = Instant::now() + backoff;
        manager.held_until.lock().await.insert(id, resume_at);

        let manager = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            manager.kick_dispatch();
        });

        tracing::info!(id, attempt = next_retry_count, "download failed, retrying after backoff: {}", message);
    } else {
        manager
            .store
            .set_state(id, DownloadState::Failed, Some(r#"{"reason":"retries_exhausted"}"#))
            .await
            .ok();
        manager.sink.emit(EngineEvent::Interrupted {
            id,
            error: message.to_string(),
            save_path: row.save_path.clone(),
        });
        tracing::warn!(id, "download failed permanently after {} attempts: {}", next_retry_count, message);
    }
}
