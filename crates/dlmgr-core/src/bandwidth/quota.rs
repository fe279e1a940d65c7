//! Per-writer quota bookkeeping.

use std::time::Instant;

/// A registered writer's token bucket for the current tick.
#[derive(Debug, Clone)]
pub struct Quota {
    pub bps: u64,
    pub bytes_used: u64,
    pub last_reset: Instant,
}

impl Quota {
    pub fn new() -> Self {
        Quota {
            bps: 0,
            bytes_used: 0,
            last_reset: Instant::now(),
        }
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a registered bandwidth consumer: a whole single-stream
/// download, or one chunk of a chunked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterKey {
    pub download_id: i64,
    pub chunk_index: Option<i64>,
}

impl WriterKey {
    pub fn whole(download_id: i64) -> Self {
        WriterKey {
            download_id,
            chunk_index: None,
        }
    }

    pub fn chunk(download_id: i64, chunk_index: i64) -> Self {
        WriterKey {
            download_id,
            chunk_index: Some(chunk_index),
        }
    }
}
