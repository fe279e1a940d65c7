//! CRUD over the `download_chunks` table.

use sqlx::{Pool, Row, Sqlite};

use super::types::{ChunkPatch, ChunkRow, ChunkState, DownloadId};
use crate::segmenter::ChunkRange;

/// Inserts all chunk rows for `download_id` in one transaction. Called once,
/// before any bytes are fetched, with the full partition of `[0, total_bytes)`.
pub(super) async fn create_chunks(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
    ranges: &[ChunkRange],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for (index, range) in ranges.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO download_chunks (download_id, chunk_index, start_byte, end_byte, downloaded_bytes, state, temp_file)
            VALUES (?1, ?2, ?3, ?4, 0, 'pending', NULL)
            "#,
        )
        .bind(download_id)
        .bind(index as i64)
        .bind(range.start as i64)
        .bind(range.end as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub(super) async fn update_chunk(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
    chunk_index: i64,
    patch: &ChunkPatch,
) -> Result<(), sqlx::Error> {
    let Some(mut row) = get_chunk(pool, download_id, chunk_index).await? else {
        return Ok(());
    };
    if let Some(downloaded_bytes) = patch.downloaded_bytes {
        row.downloaded_bytes = downloaded_bytes;
    }
    if let Some(state) = patch.state {
        row.state = state;
    }
    if let Some(ref temp_file) = patch.temp_file {
        row.temp_file = temp_file.clone();
    }

    sqlx::query(
        r#"
        UPDATE download_chunks SET downloaded_bytes = ?1, state = ?2, temp_file = ?3
        WHERE download_id = ?4 AND chunk_index = ?5
        "#,
    )
    .bind(row.downloaded_bytes)
    .bind(row.state.as_str())
    .bind(&row.temp_file)
    .bind(download_id)
    .bind(chunk_index)
    .execute(pool)
    .await?;
    Ok(())
}

async fn get_chunk(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
    chunk_index: i64,
) -> Result<Option<ChunkRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT * FROM download_chunks WHERE download_id = ?1 AND chunk_index = ?2",
    )
    .bind(download_id)
    .bind(chunk_index)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| row_to_chunk(&r)))
}

pub(super) async fn get_chunks(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
) -> Result<Vec<ChunkRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM download_chunks WHERE download_id = ?1 ORDER BY chunk_index ASC",
    )
    .bind(download_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_chunk).collect())
}

pub(super) async fn delete_chunks(
    pool: &Pool<Sqlite>,
    download_id: DownloadId,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM download_chunks WHERE download_id = ?1")
        .bind(download_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> ChunkRow {
    ChunkRow {
        download_id: row.get("download_id"),
        chunk_index: row.get("chunk_index"),
        start_byte: row.get("start_byte"),
        end_byte: row.get("end_byte"),
        downloaded_bytes: row.get("downloaded_bytes"),
        state: ChunkState::parse(&row.get::<String, _>("state")),
        temp_file: row.get("temp_file"),
    }
}
