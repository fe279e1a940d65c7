//! The dispatch loop: one pass pulls as many queued downloads as there are
//! free concurrency slots and spawns an executor task for each. Passes are
//! serialized by the processing lock so two concurrent callers (e.g. a
//! `submit` and the stale sweeper firing at once) can't double-reserve.

use std::sync::Arc;
use std::time::Instant;

use crate::error::EngineError;
use crate::events::EventSink;

use super::{execute, DownloadManager};

pub(super) async fn run_pass<S: EventSink + Clone>(manager: &Arc<DownloadManager<S>>) -> Result<(), EngineError> {
    let _guard = match manager.lock.acquire().await {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!("dispatch pass could not acquire processing lock: {}", e);
            return Ok(());
        }
    };

    let queued = manager.store.get_queued().await?;
    let now = Instant::now();

    for row in queued {
        if manager.slots.available() == 0 {
            break;
        }
        {
            let mut reserved = manager.reserved.lock().await;
            if reserved.contains(&row.id) {
                continue;
            }
            if let Some(&held) = manager.held_until.lock().await.get(&row.id) {
                if now < held {
                    continue;
                }
            }
            if !manager.slots.try_reserve_one() {
                break;
            }
            reserved.insert(row.id);
        }
        manager.held_until.lock().await.remove(&row.id);

        let manager = manager.clone();
        let id = row.id;
        tokio::spawn(async move {
            execute::run_job(manager, id).await;
        });
    }

    Ok(())
}

/// Periodically drives [`crate::bandwidth::BandwidthScheduler::tick`] so
/// registered writers get a fresh share even when no single transfer is
/// granting bytes fast enough to trigger one incidentally.
pub(super) fn spawn_bandwidth_ticker<S: EventSink + Clone>(manager: Arc<DownloadManager<S>>) {
    let interval_ms = manager.config.bandwidth.update_interval_ms.max(10);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            manager.bandwidth.tick(Instant::now());
        }
    });
}
