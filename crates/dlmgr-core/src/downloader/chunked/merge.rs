//! Concatenates completed chunk temp files into the final `.part`, in index
//! order, yielding periodically so the dispatch loop stays responsive.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::ChunkedConfig;
use crate::error::EngineError;
use crate::storage::{StorageWriterBuilder};

/// Merges `chunk_paths` (already in index order) into a new `.part` file at
/// `part_path`, then returns the total bytes written. Does not delete the
/// chunk files; the caller removes them once the merge and rename both
/// succeed, per `cleanup_on_complete`.
pub async fn merge_chunks(
    chunk_paths: Vec<PathBuf>,
    part_path: PathBuf,
    total_bytes: u64,
    cfg: ChunkedConfig,
) -> Result<u64, EngineError> {
    tokio::task::spawn_blocking(move || merge_chunks_blocking(&chunk_paths, &part_path, total_bytes, &cfg))
        .await
        .map_err(|e| EngineError::new(crate::error::ErrorKind::Internal, format!("join error: {e}")))?
}

fn merge_chunks_blocking(
    chunk_paths: &[PathBuf],
    part_path: &Path,
    total_bytes: u64,
    cfg: &ChunkedConfig,
) -> Result<u64, EngineError> {
    let mut builder = StorageWriterBuilder::create(part_path)?;
    if cfg.preallocate_file {
        builder.preallocate(total_bytes)?;
    }
    let writer = builder.build();

    let mut read_buf = vec![0u8; cfg.merge_buffer_size_bytes.max(64 * 1024)];
    let mut offset = 0u64;
    let mut ops_since_yield = 0u32;

    for chunk_path in chunk_paths {
        let mut file = std::fs::File::open(chunk_path)?;
        loop {
            let n = file.read(&mut read_buf)?;
            if n == 0 {
                break;
            }
            // Write in mergeBatchSize-sized slices so one giant read doesn't
            // become one giant synchronous write.
            let batch = cfg.merge_batch_size_bytes.max(4096).min(n);
            let mut pos = 0usize;
            while pos < n {
                let take = batch.min(n - pos);
                writer.write_at(offset, &read_buf[pos..pos + take])?;
                offset += take as u64;
                pos += take;

                ops_since_yield += 1;
                if ops_since_yield >= cfg.merge_yield_interval.max(1) {
                    ops_since_yield = 0;
                    std::thread::yield_now();
                }
            }
        }
    }

    // The writer's temp file already lives at `part_path` (created there
    // directly); the caller performs the final `.part -> save_path` rename
    // once the merge and chunk cleanup both succeed.
    writer.sync()?;
    drop(writer);
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn merges_files_in_order_with_correct_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("x.chunk.0");
        let b = dir.path().join("x.chunk.1");
        std::fs::File::create(&a).unwrap().write_all(b"hello ").unwrap();
        std::fs::File::create(&b).unwrap().write_all(b"world").unwrap();

        let part_path = dir.path().join("x.bin.part");
        let mut cfg = ChunkedConfig::default();
        cfg.merge_buffer_size_bytes = 4;
        cfg.merge_batch_size_bytes = 4;
        cfg.merge_yield_interval = 2;
        cfg.preallocate_file = false;

        let total = merge_chunks_blocking(&[a, b], &part_path, 11, &cfg).unwrap();
        assert_eq!(total, 11);
        let merged = std::fs::read(&part_path).unwrap();
        assert_eq!(merged, b"hello world");
    }
}
