//! Stale-job sweeper: a download that stops reporting progress (network
//! stall past curl's own timeouts without tripping an error, a dropped
//! connection the write-quota loop never notices) is force-cancelled after
//! `staleTimeout` so it doesn't hold a concurrency slot forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::EventSink;

use super::{CancelReason, DownloadManager};

pub(super) fn spawn<S: EventSink + Clone>(manager: Arc<DownloadManager<S>>) {
    let stale_timeout = Duration::from_millis(manager.config.stale_timeout_ms);
    let sweep_interval = (stale_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweep_once(&manager, stale_timeout).await;
        }
    });
}

async fn sweep_once<S: EventSink + Clone>(manager: &Arc<DownloadManager<S>>, stale_timeout: Duration) {
    let now = Instant::now();
    let stale_ids: Vec<_> = manager
        .last_activity
        .lock()
        .await
        .iter()
        .filter(|(_, last)| now.duration_since(**last) >= stale_timeout)
        .map(|(id, _)| *id)
        .collect();

    for id in stale_ids {
        tracing::warn!(id, "stale-job sweep: no activity for {:?}, cancelling", stale_timeout);
        manager.signal_cancel(id, CancelReason::Stale).await;
    }
}
