//! Persistent Store: the embedded SQL database holding all durable engine
//! state. Sole source of truth for `downloads`, `download_chunks`,
//! `download_history`, and `metadata`; every mutating operation here is
//! transactional or a single statement, and callers never see a torn write.

mod chunks;
mod downloads;
mod history;
mod schema;
pub mod types;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::segmenter::ChunkRange;
use types::{ChunkPatch, ChunkRow, DownloadId, DownloadPatch, DownloadRow, DownloadState, HistoryEvent, NewDownload};

/// Handle to the SQLite-backed download store.
///
/// The database file lives under the XDG state directory:
/// `~/.local/state/dlmgr/downloads.db`, with WAL-mode `-wal`/`-shm` siblings.
#[derive(Clone)]
pub struct PersistentStore {
    pool: Pool<Sqlite>,
}

impl PersistentStore {
    /// Opens (or creates) the default database, applies pragmas, and creates
    /// the schema if absent. Schema/open failures are fatal and propagate to
    /// the caller. The recovery pass is run once by [`crate::manager::DownloadManager::spawn`],
    /// not here, so its result can surface as a `downloads-restored` event.
    pub async fn initialize_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlmgr")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        let db_path = state_dir.join("downloads.db");
        Self::initialize_at(&db_path).await
    }

    /// Opens (or creates) the database at an explicit path. Used by tests and
    /// by callers that want an isolated store (e.g. `sqlite::memory:`-backed).
    pub async fn initialize_at(db_path: &std::path::Path) -> Result<Self> {
        let uri = format!("sqlite://{}?mode=rwc", db_path.display());
        Self::initialize_with_uri(&uri).await
    }

    pub async fn initialize_in_memory() -> Result<Self> {
        Self::initialize_with_uri("sqlite::memory:").await
    }

    async fn initialize_with_uri(uri: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(uri)
            .await
            .with_context(|| format!("failed to open download store at {}", uri))?;

        schema::configure_connection(&pool)
            .await
            .context("failed to configure store pragmas")?;
        schema::migrate(&pool).await.context("failed to create schema")?;

        let store = PersistentStore { pool };
        Ok(store)
    }

    /// Issues a truncating WAL checkpoint. Call before process exit.
    pub async fn close(&self) -> Result<()> {
        schema::checkpoint_truncate(&self.pool).await?;
        Ok(())
    }

    // -- Downloads --------------------------------------------------------

    pub async fn add_download(&self, record: &NewDownload) -> Result<Option<DownloadRow>> {
        Ok(downloads::add_download(&self.pool, record).await?)
    }

    pub async fn update_download(&self, id: DownloadId, patch: &DownloadPatch) -> Result<()> {
        Ok(downloads::update_download(&self.pool, id, patch).await?)
    }

    pub async fn set_state(&self, id: DownloadId, new_state: DownloadState, event_extra: Option<&str>) -> Result<()> {
        downloads::set_state(&self.pool, id, new_state).await?;
        self.append_event(id, new_state.as_str(), event_extra).await?;
        Ok(())
    }

    /// Hot-path progress update (no event log). Errors are logged and
    /// swallowed by the caller per the store's best-effort contract.
    pub async fn update_progress(&self, id: DownloadId, progress: f64, downloaded_bytes: i64) -> Result<()> {
        Ok(downloads::update_progress(&self.pool, id, progress, downloaded_bytes).await?)
    }

    pub async fn get_by_id(&self, id: DownloadId) -> Result<Option<DownloadRow>> {
        Ok(downloads::get_by_id(&self.pool, id).await?)
    }

    pub async fn exists(&self, id: DownloadId) -> Result<bool> {
        Ok(downloads::exists(&self.pool, id).await?)
    }

    pub async fn get_queued(&self) -> Result<Vec<DownloadRow>> {
        Ok(downloads::get_queued(&self.pool).await?)
    }

    pub async fn get_active(&self) -> Result<Vec<DownloadRow>> {
        Ok(downloads::get_active(&self.pool).await?)
    }

    pub async fn get_paused(&self) -> Result<Vec<DownloadRow>> {
        Ok(downloads::get_paused(&self.pool).await?)
    }

    pub async fn get_by_state(&self, state: DownloadState) -> Result<Vec<DownloadRow>> {
        Ok(downloads::get_by_state(&self.pool, state).await?)
    }

    pub async fn get_all(&self) -> Result<Vec<DownloadRow>> {
        Ok(downloads::get_all(&self.pool).await?)
    }

    pub async fn delete_download(&self, id: DownloadId) -> Result<()> {
        Ok(downloads::delete_download(&self.pool, id).await?)
    }

    // -- Chunks -------------------------------------------------------------

    pub async fn create_chunks(&self, download_id: DownloadId, ranges: &[ChunkRange]) -> Result<()> {
        Ok(chunks::create_chunks(&self.pool, download_id, ranges).await?)
    }

    pub async fn update_chunk(&self, download_id: DownloadId, chunk_index: i64, patch: &ChunkPatch) -> Result<()> {
        Ok(chunks::update_chunk(&self.pool, download_id, chunk_index, patch).await?)
    }

    pub async fn get_chunks(&self, download_id: DownloadId) -> Result<Vec<ChunkRow>> {
        Ok(chunks::get_chunks(&self.pool, download_id).await?)
    }

    pub async fn delete_chunks(&self, download_id: DownloadId) -> Result<()> {
        Ok(chunks::delete_chunks(&self.pool, download_id).await?)
    }

    // -- History / metadata ---------------------------------------------------

    pub async fn append_event(&self, download_id: DownloadId, event_type: &str, data: Option<&str>) -> Result<()> {
        Ok(history::append_event(&self.pool, download_id, event_type, data).await?)
    }

    pub async fn get_events(&self, download_id: DownloadId) -> Result<Vec<HistoryEvent>> {
        Ok(history::get_events(&self.pool, download_id).await?)
    }

    pub async fn prune_older_than(&self, days: i64) -> Result<u64> {
        Ok(history::prune_older_than(&self.pool, days).await?)
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(history::get_metadata(&self.pool, key).await?)
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        Ok(history::set_metadata(&self.pool, key, value).await?)
    }

    /// Exposed for the recovery coordinator, which needs raw pool access to
    /// reconcile rows before the rest of the engine starts reading them.
    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[allow(unused)]
pub(crate) fn db_path_under_state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlmgr")?;
    Ok(xdg_dirs.get_state_home().join("downloads.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::NewDownload;

    async fn open_memory() -> PersistentStore {
        PersistentStore::initialize_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn add_download_assigns_queue_position_and_rejects_duplicate() {
        let store = open_memory().await;
        let rec = NewDownload {
            id: 1,
            title: "a.bin".into(),
            url: Some("https://example.com/a.bin".into()),
            download_path: Some("/tmp".into()),
            preserve_structure: false,
            force_overwrite: false,
            priority: 1,
            max_retries: 3,
        };
        let row = store.add_download(&rec).await.unwrap().expect("inserted");
        assert_eq!(row.queue_position, 1);
        assert_eq!(row.state, DownloadState::Queued);

        // Duplicate id is a no-op returning None.
        let dup = store.add_download(&rec).await.unwrap();
        assert!(dup.is_none());
    }

    #[tokio::test]
    async fn queue_position_increments_across_inserts() {
        let store = open_memory().await;
        for id in 1..=3 {
            let rec = NewDownload {
                id,
                title: format!("f{id}.bin"),
                url: None,
                download_path: None,
                preserve_structure: false,
                force_overwrite: false,
                priority: 1,
                max_retries: 3,
            };
            store.add_download(&rec).await.unwrap();
        }
        let queued = store.get_queued().await.unwrap();
        assert_eq!(queued.len(), 3);
        let mut positions: Vec<i64> = queued.iter().map(|r| r.queue_position).collect();
        positions.sort();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn set_state_appends_history_event() {
        let store = open_memory().await;
        let rec = NewDownload {
            id: 1,
            title: "a.bin".into(),
            url: None,
            download_path: None,
            preserve_structure: false,
            force_overwrite: false,
            priority: 1,
            max_retries: 3,
        };
        store.add_download(&rec).await.unwrap();
        store
            .set_state(1, DownloadState::Downloading, None)
            .await
            .unwrap();
        let row = store.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(row.state, DownloadState::Downloading);
        assert!(row.started_at.is_some());

        let events = store.get_events(1).await.unwrap();
        assert_eq!(events.last().unwrap().event_type, "downloading");
    }

    #[tokio::test]
    async fn completed_at_set_on_completion() {
        let store = open_memory().await;
        let rec = NewDownload {
            id: 1,
            title: "a.bin".into(),
            url: None,
            download_path: None,
            preserve_structure: false,
            force_overwrite: false,
            priority: 1,
            max_retries: 3,
        };
        store.add_download(&rec).await.unwrap();
        store.set_state(1, DownloadState::Completed, None).await.unwrap();
        let row = store.get_by_id(1).await.unwrap().unwrap();
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn chunk_rows_partition_and_cascade_delete() {
        let store = open_memory().await;
        let rec = NewDownload {
            id: 1,
            title: "big.bin".into(),
            url: None,
            download_path: None,
            preserve_structure: false,
            force_overwrite: false,
            priority: 1,
            max_retries: 3,
        };
        store.add_download(&rec).await.unwrap();
        let ranges = crate::segmenter::plan_chunks(1000, 4);
        store.create_chunks(1, &ranges).await.unwrap();
        let chunks = store.get_chunks(1).await.unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].start_byte, 0);
        assert_eq!(chunks[3].end_byte, 1000);

        store.delete_download(1).await.unwrap();
        let chunks_after = store.get_chunks(1).await.unwrap();
        assert!(chunks_after.is_empty());
    }

    #[tokio::test]
    async fn metadata_roundtrip() {
        let store = open_memory().await;
        let v = store.get_metadata("schema_version").await.unwrap();
        assert_eq!(v.as_deref(), Some("1"));
        store.set_metadata("foo", "bar").await.unwrap();
        assert_eq!(store.get_metadata("foo").await.unwrap().as_deref(), Some("bar"));
    }
}
