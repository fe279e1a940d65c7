//! Progress Throttler: coalesces high-frequency progress updates so the
//! event sink never receives more than one `Progressing` event per download
//! per `MIN_INTERVAL`, while still delivering the freshest values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::events::{EngineEvent, EventSink};
use crate::store::types::DownloadId;

struct Entry {
    last_sent: Option<Instant>,
    pending: Option<EngineEvent>,
    timer_armed: bool,
    /// Bumped on every `cancel_pending`/`send_immediate` so an in-flight
    /// timer that fires after a cancellation finds a stale generation and
    /// drops its payload instead of emitting it.
    generation: u64,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            last_sent: None,
            pending: None,
            timer_armed: false,
            generation: 0,
        }
    }
}

struct Inner<S: EventSink> {
    sink: S,
    min_interval: Duration,
    entries: Mutex<HashMap<DownloadId, Entry>>,
}

/// Per-download debounce sitting between the transfer workers and the host
/// event sink. Cloning is cheap; all clones share the same state.
pub struct ProgressThrottler<S: EventSink> {
    inner: Arc<Inner<S>>,
}

impl<S: EventSink> Clone for ProgressThrottler<S> {
    fn clone(&self) -> Self {
        ProgressThrottler {
            inner: self.inner.clone(),
        }
    }
}

impl<S: EventSink> ProgressThrottler<S> {
    pub fn new(sink: S, min_interval: Duration) -> Self {
        ProgressThrottler {
            inner: Arc::new(Inner {
                sink,
                min_interval,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Queues a progress update. If the download hasn't been sent an update
    /// within `min_interval`, this flushes immediately; otherwise it replaces
    /// any previously-pending update and, if no timer is already armed for
    /// this id, schedules one for the remainder of the interval.
    pub fn queue_update(&self, id: DownloadId, event: EngineEvent) {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock().unwrap();
        let entry = entries.entry(id).or_default();

        let ready = match entry.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.inner.min_interval,
        };

        if ready {
            entry.last_sent = Some(now);
            entry.pending = None;
            entry.generation += 1;
            drop(entries);
            self.inner.sink.emit(event);
            return;
        }

        entry.pending = Some(event);
        if entry.timer_armed {
            return;
        }
        entry.timer_armed = true;
        let generation = entry.generation;
        let wait = self
            .inner
            .min_interval
            .saturating_sub(now.duration_since(entry.last_sent.unwrap_or(now)));
        drop(entries);

        let throttler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            throttler.flush_timer(id, generation);
        });
    }

    fn flush_timer(&self, id: DownloadId, generation: u64) {
        let mut entries = self.inner.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&id) else {
            return;
        };
        entry.timer_armed = false;
        if entry.generation != generation {
            // Superseded by a cancel or an immediate send while we slept.
            return;
        }
        if let Some(event) = entry.pending.take() {
            entry.last_sent = Some(Instant::now());
            drop(entries);
            self.inner.sink.emit(event);
        }
    }

    /// Drops any queued-but-unsent update for `id` without emitting it, e.g.
    /// because the download just transitioned to a terminal state.
    pub fn cancel_pending(&self, id: DownloadId) {
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&id) {
            entry.pending = None;
            entry.generation += 1;
        }
    }

    /// Bypasses throttling entirely: used for lifecycle events (start,
    /// complete, pause, cancel) that must never be delayed or dropped.
    pub fn send_immediate(&self, id: DownloadId, event: EngineEvent) {
        let mut entries = self.inner.entries.lock().unwrap();
        let entry = entries.entry(id).or_default();
        entry.last_sent = Some(Instant::now());
        entry.pending = None;
        entry.generation += 1;
        drop(entries);
        self.inner.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct CountingSink(Arc<AtomicUsize>);

    impl EventSink for CountingSink {
        fn emit(&self, _event: EngineEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn progress_event(id: DownloadId, percent: f64) -> EngineEvent {
        EngineEvent::Progressing {
            id,
            percent,
            speed_mbps: 1.0,
            total_bytes: 100,
            downloaded_bytes: (percent * 100.0) as i64,
            remaining_seconds: None,
            chunked: false,
            active_chunks: None,
            completed_chunks: None,
            total_chunks: None,
            chunk_progress: None,
        }
    }

    #[tokio::test]
    async fn first_update_for_a_download_flushes_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = ProgressThrottler::new(CountingSink(counter.clone()), Duration::from_millis(200));
        throttler.queue_update(1, progress_event(1, 0.1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rapid_updates_coalesce_into_one_deferred_flush() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = ProgressThrottler::new(CountingSink(counter.clone()), Duration::from_millis(50));
        throttler.queue_update(1, progress_event(1, 0.1));
        throttler.queue_update(1, progress_event(1, 0.2));
        throttler.queue_update(1, progress_event(1, 0.3));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_pending_suppresses_the_deferred_flush() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = ProgressThrottler::new(CountingSink(counter.clone()), Duration::from_millis(50));
        throttler.queue_update(1, progress_event(1, 0.1));
        throttler.queue_update(1, progress_event(1, 0.2));
        throttler.cancel_pending(1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_immediate_bypasses_the_throttle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = ProgressThrottler::new(CountingSink(counter.clone()), Duration::from_millis(200));
        throttler.queue_update(1, progress_event(1, 0.1));
        throttler.send_immediate(
            1,
            EngineEvent::Completed {
                id: 1,
                save_path: "x".into(),
                percent: 1.0,
                chunked: false,
            },
        );
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn independent_downloads_do_not_share_a_throttle_window() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = ProgressThrottler::new(CountingSink(counter.clone()), Duration::from_millis(200));
        throttler.queue_update(1, progress_event(1, 0.1));
        throttler.queue_update(2, progress_event(2, 0.1));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
