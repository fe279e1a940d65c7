//! Chunk range math for the chunked downloader.

mod layout;
mod range;

pub use layout::{choose_chunk_count, should_use_chunked};
pub use range::{plan_chunks, ChunkRange};
