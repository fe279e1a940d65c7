//! Events emitted to the host sink and the trait that receives them.
//!
//! The engine never calls back into arbitrary external closures; instead a
//! caller provides an [`EventSink`] implementation (typically an mpsc sender
//! wrapper) and the manager pushes one-way [`EngineEvent`] values into it.

use crate::store::types::DownloadId;
use serde::Serialize;

/// Per-chunk progress snapshot included in `Progressing` for chunked transfers.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkProgress {
    pub chunk_index: i64,
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    pub state: String,
}

/// Existing-file comparison reported with `AwaitingConfirmation`.
#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub existing_size: u64,
    pub expected_size: u64,
    pub size_difference: i64,
    pub similar_size: bool,
}

/// One-way messages the engine emits to the host sink, keyed by download id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    Starting {
        id: DownloadId,
        title: String,
        resuming: bool,
        resume_from_byte: Option<u64>,
        chunked: bool,
        num_chunks: Option<i64>,
    },
    Progressing {
        id: DownloadId,
        percent: f64,
        speed_mbps: f64,
        total_bytes: i64,
        downloaded_bytes: i64,
        remaining_seconds: Option<f64>,
        chunked: bool,
        active_chunks: Option<i64>,
        completed_chunks: Option<i64>,
        total_chunks: Option<i64>,
        chunk_progress: Option<Vec<ChunkProgress>>,
    },
    AwaitingConfirmation {
        id: DownloadId,
        title: String,
        save_path: String,
        file_check: FileCheck,
    },
    Paused {
        id: DownloadId,
        percent: Option<f64>,
    },
    Completed {
        id: DownloadId,
        save_path: String,
        percent: f64,
        chunked: bool,
    },
    Interrupted {
        id: DownloadId,
        error: String,
        save_path: Option<String>,
    },
    Cancelled {
        id: DownloadId,
    },
    Queued {
        id: DownloadId,
        title: String,
        position: i64,
    },
    DownloadsRestored {
        ids: Vec<DownloadId>,
    },
}

impl EngineEvent {
    /// The download id this event pertains to, if any (`DownloadsRestored` has none).
    pub fn download_id(&self) -> Option<DownloadId> {
        match self {
            EngineEvent::Starting { id, .. }
            | EngineEvent::Progressing { id, .. }
            | EngineEvent::AwaitingConfirmation { id, .. }
            | EngineEvent::Paused { id, .. }
            | EngineEvent::Completed { id, .. }
            | EngineEvent::Interrupted { id, .. }
            | EngineEvent::Cancelled { id }
            | EngineEvent::Queued { id, .. } => Some(*id),
            EngineEvent::DownloadsRestored { .. } => None,
        }
    }

    /// True for events that end a download's visible lifecycle: no `Progressing`
    /// for the same id may be delivered after one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::Completed { .. } | EngineEvent::Cancelled { .. }
        ) || matches!(self, EngineEvent::Interrupted { .. })
    }
}

/// Sink that the engine pushes one-way lifecycle and progress events into.
///
/// Implementations are expected to be cheap to clone (e.g. wrap an
/// `mpsc::UnboundedSender`) and non-blocking: a slow or full sink must not
/// stall the dispatch loop or a transfer worker.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: EngineEvent);
}

/// Sink backed by a tokio unbounded channel.
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (ChannelEventSink { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        // A dropped receiver means nobody is listening anymore; this must
        // never be treated as a download-level failure.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events() {
        assert!(EngineEvent::Completed {
            id: 1,
            save_path: "x".into(),
            percent: 1.0,
            chunked: false
        }
        .is_terminal());
        assert!(!EngineEvent::Progressing {
            id: 1,
            percent: 0.5,
            speed_mbps: 1.0,
            total_bytes: 100,
            downloaded_bytes: 50,
            remaining_seconds: None,
            chunked: false,
            active_chunks: None,
            completed_chunks: None,
            total_chunks: None,
            chunk_progress: None,
        }
        .is_terminal());
    }
}
