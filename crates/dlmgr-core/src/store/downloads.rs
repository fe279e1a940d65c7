//! CRUD and queries over the `downloads` table.

use sqlx::{Pool, Row, Sqlite};

use super::types::{DownloadId, DownloadPatch, DownloadRow, DownloadState, NewDownload};
use super::unix_timestamp;

pub(super) async fn add_download(
    pool: &Pool<Sqlite>,
    record: &NewDownload,
) -> Result<Option<DownloadRow>, sqlx::Error> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM downloads WHERE id = ?1")
        .bind(record.id)
        .fetch_optional(pool)
        .await?;
    if exists.is_some() {
        return Ok(None);
    }

    let now = unix_timestamp();
    let next_position: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(queue_position), 0) + 1 FROM downloads WHERE state = 'queued'")
            .fetch_one(pool)
            .await?;

    sqlx::query(
        r#"
        INSERT INTO downloads (
            id, title, url, save_path, download_path, preserve_structure, force_overwrite,
            priority, state, progress, downloaded_bytes, total_bytes, retry_count, max_retries,
            queue_position, created_at, updated_at
        ) VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7, 'queued', 0.0, 0, 0, 0, ?8, ?9, ?10, ?10)
        "#,
    )
    .bind(record.id)
    .bind(&record.title)
    .bind(&record.url)
    .bind(&record.download_path)
    .bind(record.preserve_structure)
    .bind(record.force_overwrite)
    .bind(record.priority)
    .bind(record.max_retries)
    .bind(next_position)
    .bind(now)
    .execute(pool)
    .await?;

    get_by_id(pool, record.id).await
}

pub(super) async fn update_download(
    pool: &Pool<Sqlite>,
    id: DownloadId,
    patch: &DownloadPatch,
) -> Result<(), sqlx::Error> {
    // Fetch-modify-write keeps this simple and safe even though it costs an
    // extra round trip; download metadata updates are not hot-path.
    let Some(mut row) = get_by_id(pool, id).await? else {
        return Ok(());
    };

    if let Some(ref title) = patch.title {
        row.title = title.clone();
    }
    if let Some(ref url) = patch.url {
        row.url = url.clone();
    }
    if let Some(ref save_path) = patch.save_path {
        row.save_path = save_path.clone();
    }
    if let Some(ref download_path) = patch.download_path {
        row.download_path = download_path.clone();
    }
    if let Some(force_overwrite) = patch.force_overwrite {
        row.force_overwrite = force_overwrite;
    }
    if let Some(priority) = patch.priority {
        row.priority = priority;
    }
    if let Some(total_bytes) = patch.total_bytes {
        row.total_bytes = total_bytes;
    }
    if let Some(ref last_error) = patch.last_error {
        row.last_error = last_error.clone();
    }
    if let Some(ref expected_hash) = patch.expected_hash {
        row.expected_hash = expected_hash.clone();
    }
    if let Some(ref actual_hash) = patch.actual_hash {
        row.actual_hash = actual_hash.clone();
    }
    if let Some(retry_count) = patch.retry_count {
        row.retry_count = retry_count;
    }
    if let Some(ref started_at) = patch.started_at {
        row.started_at = *started_at;
    }
    if let Some(ref completed_at) = patch.completed_at {
        row.completed_at = *completed_at;
    }

    let now = unix_timestamp();
    sqlx::query(
        r#"
        UPDATE downloads SET
            title = ?1, url = ?2, save_path = ?3, download_path = ?4, force_overwrite = ?5,
            priority = ?6, total_bytes = ?7, last_error = ?8, expected_hash = ?9, actual_hash = ?10,
            retry_count = ?11, started_at = ?12, completed_at = ?13, updated_at = ?14
        WHERE id = ?15
        "#,
    )
    .bind(&row.title)
    .bind(&row.url)
    .bind(&row.save_path)
    .bind(&row.download_path)
    .bind(row.force_overwrite)
    .bind(row.priority)
    .bind(row.total_bytes)
    .bind(&row.last_error)
    .bind(&row.expected_hash)
    .bind(&row.actual_hash)
    .bind(row.retry_count)
    .bind(row.started_at)
    .bind(row.completed_at)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

pub(super) async fn set_state(
    pool: &Pool<Sqlite>,
    id: DownloadId,
    new_state: DownloadState,
) -> Result<(), sqlx::Error> {
    let now = unix_timestamp();
    let started_at_clause = if new_state == DownloadState::Downloading {
        ", started_at = COALESCE(started_at, ?1)"
    } else {
        ""
    };
    let completed_at_clause = if new_state == DownloadState::Completed {
        ", completed_at = ?1"
    } else {
        ""
    };

    let sql = format!(
        "UPDATE downloads SET state = ?2, updated_at = ?1{}{} WHERE id = ?3",
        started_at_clause, completed_at_clause
    );
    sqlx::query(&sql)
        .bind(now)
        .bind(new_state.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Hot-path progress update. No event log, best-effort (caller swallows errors).
pub(super) async fn update_progress(
    pool: &Pool<Sqlite>,
    id: DownloadId,
    progress: f64,
    downloaded_bytes: i64,
) -> Result<(), sqlx::Error> {
    let now = unix_timestamp();
    sqlx::query(
        "UPDATE downloads SET progress = ?1, downloaded_bytes = ?2, updated_at = ?3 WHERE id = ?4",
    )
    .bind(progress)
    .bind(downloaded_bytes)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn get_by_id(
    pool: &Pool<Sqlite>,
    id: DownloadId,
) -> Result<Option<DownloadRow>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM downloads WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| row_to_download(&r)))
}

pub(super) async fn exists(pool: &Pool<Sqlite>, id: DownloadId) -> Result<bool, sqlx::Error> {
    let n: Option<i64> = sqlx::query_scalar("SELECT id FROM downloads WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(n.is_some())
}

async fn get_by_state_query(
    pool: &Pool<Sqlite>,
    state: DownloadState,
) -> Result<Vec<DownloadRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM downloads WHERE state = ?1 ORDER BY priority DESC, queue_position ASC, created_at ASC",
    )
    .bind(state.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_download).collect())
}

pub(super) async fn get_queued(pool: &Pool<Sqlite>) -> Result<Vec<DownloadRow>, sqlx::Error> {
    get_by_state_query(pool, DownloadState::Queued).await
}

pub(super) async fn get_paused(pool: &Pool<Sqlite>) -> Result<Vec<DownloadRow>, sqlx::Error> {
    get_by_state_query(pool, DownloadState::Paused).await
}

pub(super) async fn get_active(pool: &Pool<Sqlite>) -> Result<Vec<DownloadRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM downloads WHERE state IN ('downloading') ORDER BY updated_at ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_download).collect())
}

pub(super) async fn get_by_state(
    pool: &Pool<Sqlite>,
    state: DownloadState,
) -> Result<Vec<DownloadRow>, sqlx::Error> {
    get_by_state_query(pool, state).await
}

pub(super) async fn get_all(pool: &Pool<Sqlite>) -> Result<Vec<DownloadRow>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_download).collect())
}

pub(super) async fn delete_download(pool: &Pool<Sqlite>, id: DownloadId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM downloads WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

fn row_to_download(row: &sqlx::sqlite::SqliteRow) -> DownloadRow {
    DownloadRow {
        id: row.get("id"),
        title: row.get("title"),
        url: row.get("url"),
        save_path: row.get("save_path"),
        download_path: row.get("download_path"),
        preserve_structure: row.get::<i64, _>("preserve_structure") != 0,
        force_overwrite: row.get::<i64, _>("force_overwrite") != 0,
        priority: row.get("priority"),
        state: DownloadState::parse(&row.get::<String, _>("state")),
        progress: row.get("progress"),
        downloaded_bytes: row.get("downloaded_bytes"),
        total_bytes: row.get("total_bytes"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        last_error: row.get("last_error"),
        expected_hash: row.get("expected_hash"),
        actual_hash: row.get("actual_hash"),
        queue_position: row.get("queue_position"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        updated_at: row.get("updated_at"),
    }
}
