//! Integration tests: a local HTTP server with Range support drives the
//! single-stream and chunked downloaders directly (below the manager's
//! HTTPS-only host validation, which is exercised separately by the
//! `manager::strategy` unit tests).

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use dlmgr_core::bandwidth::BandwidthScheduler;
use dlmgr_core::config::{BandwidthConfig, ChunkedConfig, TransportConfig};
use dlmgr_core::downloader::chunked::{self, ChunkedProgressSnapshot, ChunkedRequest};
use dlmgr_core::downloader::single::{self, SingleStreamRequest};
use dlmgr_core::segmenter;
use dlmgr_core::store::types::NewDownload;
use dlmgr_core::store::PersistentStore;
use dlmgr_core::transport::{CancellationHandle, NoQuota};
use tempfile::tempdir;

#[tokio::test]
async fn single_stream_download_completes_and_file_matches() {
    let body: Vec<u8> = (0u8..100).cycle().take(64 * 1024).collect();
    let url = common::range_server::start(body.clone());
    let dir = tempdir().unwrap();
    let final_path = dir.path().join("body.bin");

    let req = SingleStreamRequest {
        url,
        headers: HashMap::new(),
        final_path: final_path.clone(),
        expected_total: Some(body.len() as u64),
        force_overwrite: false,
    };

    let outcome = single::run(
        req,
        TransportConfig::default(),
        Arc::new(NoQuota),
        CancellationHandle::new(),
        Arc::new(|_written| {}),
    )
    .await
    .expect("single-stream download should succeed");

    assert_eq!(outcome.bytes_written, body.len() as u64);
    assert_eq!(outcome.resumed_from, 0);
    let content = std::fs::read(&final_path).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn single_stream_resume_picks_up_from_partial_file() {
    let body: Vec<u8> = (0u8..100).cycle().take(32 * 1024).collect();
    let url = common::range_server::start(body.clone());
    let dir = tempdir().unwrap();
    let final_path = dir.path().join("body.bin");
    let part_path = dlmgr_core::storage::temp_path(&final_path);

    // Seed a `.part` file holding the first quarter of the body, simulating
    // a previous run that was interrupted after writing that much.
    let already = &body[..body.len() / 4];
    std::fs::write(&part_path, already).unwrap();

    let req = SingleStreamRequest {
        url,
        headers: HashMap::new(),
        final_path: final_path.clone(),
        expected_total: Some(body.len() as u64),
        force_overwrite: false,
    };

    let outcome = single::run(
        req,
        TransportConfig::default(),
        Arc::new(NoQuota),
        CancellationHandle::new(),
        Arc::new(|_written| {}),
    )
    .await
    .expect("resumed download should succeed");

    assert_eq!(outcome.resumed_from, already.len() as u64);
    let content = std::fs::read(&final_path).unwrap();
    assert_eq!(content, body);
}

#[tokio::test]
async fn chunked_download_completes_and_merges_in_order() {
    let body: Vec<u8> = (0u8..100).cycle().take(256 * 1024).collect();
    let url = common::range_server::start(body.clone());
    let dir = tempdir().unwrap();
    let final_path = dir.path().join("body.bin");

    let store = PersistentStore::initialize_in_memory().await.unwrap();
    store
        .add_download(&NewDownload {
            id: 1,
            title: "body.bin".into(),
            url: Some(String::new()),
            download_path: None,
            preserve_structure: false,
            force_overwrite: false,
            priority: 0,
            max_retries: 3,
        })
        .await
        .unwrap();

    let bandwidth = Arc::new(BandwidthScheduler::new(BandwidthConfig::default()));

    let req = ChunkedRequest {
        download_id: 1,
        url,
        headers: HashMap::new(),
        final_path: final_path.clone(),
        total_bytes: body.len() as u64,
        chunk_count: 4,
    };

    let on_progress: Arc<dyn Fn(ChunkedProgressSnapshot) + Send + Sync> = Arc::new(|_snapshot| {});

    let outcome = chunked::run(
        req,
        &store,
        &bandwidth,
        &TransportConfig::default(),
        &ChunkedConfig::default(),
        CancellationHandle::new(),
        on_progress,
    )
    .await
    .expect("chunked download should succeed");

    assert_eq!(outcome.bytes_written, body.len() as u64);

    let content = std::fs::read(&final_path).unwrap();
    assert_eq!(content.len(), body.len());
    assert_eq!(content, body);

    // `cleanup_on_complete` (the default) removes the chunk rows once the
    // merge and rename both succeed.
    let chunks = store.get_chunks(1).await.unwrap();
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn chunk_layout_covers_the_whole_file_with_no_gaps() {
    let ranges = segmenter::plan_chunks(1_000_003, 7);
    assert_eq!(ranges.first().unwrap().start, 0);
    assert_eq!(ranges.last().unwrap().end, 1_000_003);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end, pair[1].start, "chunks must be contiguous");
    }
}
