//! Schema creation and pragma configuration for the download store.

use sqlx::{Pool, Sqlite};

pub(super) async fn configure_connection(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    // WAL mode: concurrent readers alongside a writer, durable commit with
    // fsync deferred to checkpoint.
    sqlx::query("PRAGMA journal_mode = WAL;").execute(pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL;").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON;").execute(pool).await?;
    Ok(())
}

pub(super) async fn migrate(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS downloads (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            url TEXT,
            save_path TEXT,
            download_path TEXT,
            preserve_structure INTEGER NOT NULL DEFAULT 0,
            force_overwrite INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 1,
            state TEXT NOT NULL DEFAULT 'queued',
            progress REAL NOT NULL DEFAULT 0.0,
            downloaded_bytes INTEGER NOT NULL DEFAULT 0,
            total_bytes INTEGER NOT NULL DEFAULT 0,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            last_error TEXT,
            expected_hash TEXT,
            actual_hash TEXT,
            queue_position INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            updated_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_chunks (
            download_id INTEGER NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            downloaded_bytes INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'pending',
            temp_file TEXT,
            PRIMARY KEY (download_id, chunk_index)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            download_id INTEGER NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            event_data TEXT,
            created_at INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_state ON downloads(state);")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_downloads_dispatch_order ON downloads(state, priority DESC, queue_position ASC);",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_created_at ON downloads(created_at DESC);")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_download_id ON download_chunks(download_id);")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_download_id ON download_history(download_id);")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', '1');")
        .execute(pool)
        .await?;

    Ok(())
}

/// Issues a truncating WAL checkpoint. Call on `close()`.
pub(super) async fn checkpoint_truncate(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);").execute(pool).await?;
    Ok(())
}
