//! Recovery Coordinator: reconciles store state at startup, exactly once.

use anyhow::Result;
use sqlx::Row;

use crate::store::types::DownloadId;
use crate::store::PersistentStore;

/// Any row left `downloading` from a previous run did not finish cleanly.
/// Reclassify it to `queued` and record a `recovered` event; the manager's
/// dispatch loop will pick it back up. This is the single reconciliation
/// pass the store runs; `paused`, `awaiting`, and terminal rows are left
/// untouched.
pub async fn run(store: &PersistentStore) -> Result<Vec<DownloadId>> {
    let pool = store.pool();
    let now = crate::store::unix_timestamp();

    let stranded: Vec<DownloadId> = sqlx::query("SELECT id FROM downloads WHERE state = 'downloading'")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| r.get::<i64, _>("id"))
        .collect();

    for id in &stranded {
        sqlx::query("UPDATE downloads SET state = 'queued', updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
        store
            .append_event(*id, "recovered", Some(r#"{"previousState":"downloading"}"#))
            .await?;
    }

    if !stranded.is_empty() {
        tracing::info!(count = stranded.len(), "recovered stranded downloads to queued");
    }

    Ok(stranded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{DownloadState, NewDownload};

    #[tokio::test]
    async fn stranded_downloading_rows_become_queued_with_recovered_event() {
        let store = PersistentStore::initialize_in_memory().await.unwrap();
        let rec = NewDownload {
            id: 4,
            title: "x.bin".into(),
            url: None,
            download_path: None,
            preserve_structure: false,
            force_overwrite: false,
            priority: 1,
            max_retries: 3,
        };
        store.add_download(&rec).await.unwrap();
        // Bypass set_state's recorded-event path to simulate a row that was
        // left mid-flight by a crash (no clean transition, no recovered event yet).
        sqlx::query("UPDATE downloads SET state = 'downloading' WHERE id = 4")
            .execute(store.pool())
            .await
            .unwrap();

        let recovered = run(&store).await.unwrap();
        assert_eq!(recovered, vec![4]);

        let row = store.get_by_id(4).await.unwrap().unwrap();
        assert_eq!(row.state, DownloadState::Queued);

        let events = store.get_events(4).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "recovered"));
    }

    #[tokio::test]
    async fn paused_and_terminal_rows_untouched() {
        let store = PersistentStore::initialize_in_memory().await.unwrap();
        for (id, state) in [(1i64, DownloadState::Paused), (2, DownloadState::Completed)] {
            let rec = NewDownload {
                id,
                title: "x".into(),
                url: None,
                download_path: None,
                preserve_structure: false,
                force_overwrite: false,
                priority: 1,
                max_retries: 3,
            };
            store.add_download(&rec).await.unwrap();
            store.set_state(id, state, None).await.unwrap();
        }
        let recovered = run(&store).await.unwrap();
        assert!(recovered.is_empty());
        assert_eq!(store.get_by_id(1).await.unwrap().unwrap().state, DownloadState::Paused);
        assert_eq!(store.get_by_id(2).await.unwrap().unwrap().state, DownloadState::Completed);
    }
}
