//! Typed rows and enums for the persistent store.

use serde::{Deserialize, Serialize};

/// Download identifier: externally assigned from the catalog node id.
pub type DownloadId = i64;

/// Download lifecycle state. `Reserved` only ever exists in memory (the
/// manager's in-flight reservation, never written to the store as a row
/// state) but is included here since it shares the same state space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Queued,
    Reserved,
    Downloading,
    Paused,
    Awaiting,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadState::Queued => "queued",
            DownloadState::Reserved => "reserved",
            DownloadState::Downloading => "downloading",
            DownloadState::Paused => "paused",
            DownloadState::Awaiting => "awaiting",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
            DownloadState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => DownloadState::Queued,
            "reserved" => DownloadState::Reserved,
            "downloading" => DownloadState::Downloading,
            "paused" => DownloadState::Paused,
            "awaiting" => DownloadState::Awaiting,
            "completed" => DownloadState::Completed,
            "failed" => DownloadState::Failed,
            "cancelled" => DownloadState::Cancelled,
            _ => DownloadState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// Chunk lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl ChunkState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkState::Pending => "pending",
            ChunkState::Downloading => "downloading",
            ChunkState::Completed => "completed",
            ChunkState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ChunkState::Pending,
            "downloading" => ChunkState::Downloading,
            "completed" => ChunkState::Completed,
            "failed" => ChunkState::Failed,
            _ => ChunkState::Failed,
        }
    }
}

/// A full `downloads` row.
#[derive(Debug, Clone)]
pub struct DownloadRow {
    pub id: DownloadId,
    pub title: String,
    pub url: Option<String>,
    pub save_path: Option<String>,
    pub download_path: Option<String>,
    pub preserve_structure: bool,
    pub force_overwrite: bool,
    pub priority: i32,
    pub state: DownloadState,
    pub progress: f64,
    pub downloaded_bytes: i64,
    pub total_bytes: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub queue_position: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// Fields accepted by `addDownload`.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub id: DownloadId,
    pub title: String,
    pub url: Option<String>,
    pub download_path: Option<String>,
    pub preserve_structure: bool,
    pub force_overwrite: bool,
    pub priority: i32,
    pub max_retries: i32,
}

/// Sparse patch used by `updateDownload`. `None` fields are left unchanged;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct DownloadPatch {
    pub title: Option<String>,
    pub url: Option<Option<String>>,
    pub save_path: Option<Option<String>>,
    pub download_path: Option<Option<String>>,
    pub force_overwrite: Option<bool>,
    pub priority: Option<i32>,
    pub total_bytes: Option<i64>,
    pub last_error: Option<Option<String>>,
    pub expected_hash: Option<Option<String>>,
    pub actual_hash: Option<Option<String>>,
    pub retry_count: Option<i32>,
    pub started_at: Option<Option<i64>>,
    pub completed_at: Option<Option<i64>>,
}

/// A full `download_chunks` row.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub download_id: DownloadId,
    pub chunk_index: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub downloaded_bytes: i64,
    pub state: ChunkState,
    pub temp_file: Option<String>,
}

/// Partial update for a single chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkPatch {
    pub downloaded_bytes: Option<i64>,
    pub state: Option<ChunkState>,
    pub temp_file: Option<Option<String>>,
}

/// A `download_history` row.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub download_id: DownloadId,
    pub event_type: String,
    pub event_data: Option<String>,
    pub created_at: i64,
}
