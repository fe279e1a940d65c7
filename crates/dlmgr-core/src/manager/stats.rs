//! `getStats`/`getQueueTimeEstimate`: read-only aggregate views over the
//! persistent store, computed on demand rather than kept running.

use crate::error::EngineError;
use crate::events::EventSink;
use crate::store::types::{DownloadId, DownloadState};

use super::DownloadManager;

/// Snapshot of how many downloads sit in each lifecycle state, plus the
/// concurrency ceiling currently in use.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub queued: usize,
    pub downloading: usize,
    pub paused: usize,
    pub awaiting: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active_slots_in_use: usize,
    pub active_slots_total: usize,
    pub total_bytes_downloaded: i64,
}

/// Estimated wait before a queued download starts, or for the queue as a
/// whole when no id is given.
#[derive(Debug, Clone)]
pub struct QueueTimeEstimate {
    pub position: Option<i64>,
    pub estimated_seconds: Option<f64>,
}

/// Assumed sustained throughput used for the estimate when neither a fixed
/// cap nor a detected figure is available; deliberately conservative.
const FALLBACK_BPS: f64 = 2.0 * 1024.0 * 1024.0;

pub(super) async fn get_stats<S: EventSink + Clone>(manager: &DownloadManager<S>) -> Result<EngineStats, EngineError> {
    let all = manager.store.get_all().await?;
    let mut stats = EngineStats {
        active_slots_in_use: manager.slots.in_use(),
        active_slots_total: manager.slots.in_use() + manager.slots.available(),
        ..Default::default()
    };
    for row in &all {
        stats.total_bytes_downloaded += row.downloaded_bytes;
        match row.state {
            DownloadState::Queued | DownloadState::Reserved => stats.queued += 1,
            DownloadState::Downloading => stats.downloading += 1,
            DownloadState::Paused => stats.paused += 1,
            DownloadState::Awaiting => stats.awaiting += 1,
            DownloadState::Completed => stats.completed += 1,
            DownloadState::Failed => stats.failed += 1,
            DownloadState::Cancelled => stats.cancelled += 1,
        }
    }
    Ok(stats)
}

pub(super) async fn get_queue_time_estimate<S: EventSink + Clone>(
    manager: &DownloadManager<S>,
    id: Option<DownloadId>,
) -> Result<QueueTimeEstimate, EngineError> {
    let queued = manager.store.get_queued().await?;
    let bps = effective_bps(manager);

    let Some(id) = id else {
        let total_remaining: i64 = queued.iter().map(|r| (r.total_bytes - r.downloaded_bytes).max(0)).sum();
        let seconds = seconds_for_bytes(total_remaining as f64, bps, manager.slots.available().max(1));
        return Ok(QueueTimeEstimate {
            position: Some(queued.len() as i64),
            estimated_seconds: Some(seconds),
        });
    };

    let Some(index) = queued.iter().position(|r| r.id == id) else {
        return Ok(QueueTimeEstimate {
            position: None,
            estimated_seconds: None,
        });
    };

    let ahead_bytes: i64 = queued[..index]
        .iter()
        .map(|r| (r.total_bytes - r.downloaded_bytes).max(0))
        .sum();
    let concurrency = manager.slots.in_use() + manager.slots.available();
    let seconds = seconds_for_bytes(ahead_bytes as f64, bps, concurrency.max(1));

    Ok(QueueTimeEstimate {
        position: Some(index as i64 + 1),
        estimated_seconds: Some(seconds),
    })
}

fn effective_bps<S: EventSink + Clone>(manager: &DownloadManager<S>) -> f64 {
    let cfg = &manager.config.bandwidth;
    if cfg.max_bandwidth_bytes_per_second > 0 {
        cfg.max_bandwidth_bytes_per_second as f64
    } else {
        FALLBACK_BPS
    }
}

fn seconds_for_bytes(bytes: f64, bps: f64, concurrency: usize) -> f64 {
    if bytes <= 0.0 || bps <= 0.0 {
        return 0.0;
    }
    bytes / (bps * concurrency as f64)
}
