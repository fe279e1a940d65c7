//! Append-only history events and the single-row metadata table.

use sqlx::{Pool, Row, Sqlite};

use super::types::{DownloadId, HistoryEvent};
use super::unix_timestamp;

pub(super) async fn append_event(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
    event_type: &str,
    data: Option<&str>,
) -> Result<(), sqlx::Error> {
    let now = unix_timestamp();
    sqlx::query(
        "INSERT INTO download_history (download_id, event_type, event_data, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(download_id)
    .bind(event_type)
    .bind(data)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn get_events(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
) -> Result<Vec<HistoryEvent>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT download_id, event_type, event_data, created_at FROM download_history WHERE download_id = ?1 ORDER BY created_at ASC, id ASC",
    )
    .bind(download_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| HistoryEvent {
            download_id: r.get("download_id"),
            event_type: r.get("event_type"),
            event_data: r.get("event_data"),
            created_at: r.get("created_at"),
        })
        .collect())
}

/// Removes history rows older than `days` belonging only to downloads in a
/// terminal state.
pub(super) async fn prune_older_than(pool: &Pool<Sqlite>, days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = unix_timestamp() - days * 86_400;
    let result = sqlx::query(
        r#"
        DELETE FROM download_history
        WHERE created_at < ?1
          AND download_id IN (SELECT id FROM downloads WHERE state IN ('completed', 'failed', 'cancelled'))
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub(super) async fn get_metadata(pool: &Pool<Sqlite>, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

pub(super) async fn set_metadata(pool: &Pool<Sqlite>, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO metadata (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}
