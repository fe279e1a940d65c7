//! Chunk-count selection for the chunked downloader (spec'd layout algorithm).

use crate::config::ChunkedConfig;

/// Chooses the number of chunks for a file of size `total_bytes`.
///
/// `n := clamp(ceil(total_bytes / preferred_chunk_size), min_chunks, max_chunks)`
/// where `preferred_chunk_size` is picked so each chunk is at least
/// `min_chunk_size_bytes`, starting from `default_chunks` as a hint.
pub fn choose_chunk_count(total_bytes: u64, cfg: &ChunkedConfig) -> usize {
    if total_bytes == 0 {
        return 0;
    }

    let hinted_chunk_size = (total_bytes / cfg.default_chunks.max(1) as u64).max(1);
    let preferred_chunk_size = hinted_chunk_size.max(cfg.min_chunk_size_bytes.max(1));

    let n = div_ceil(total_bytes, preferred_chunk_size).max(1) as usize;
    n.clamp(cfg.min_chunks.max(1), cfg.max_chunks.max(cfg.min_chunks.max(1)))
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Whether the chunked downloader should be selected for this download at all.
pub fn should_use_chunked(total_bytes: u64, range_supported: bool, cfg: &ChunkedConfig) -> bool {
    total_bytes >= cfg.size_threshold_bytes && !cfg.force_simple_download && range_supported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_min_chunks_for_small_files() {
        let cfg = ChunkedConfig::default();
        let n = choose_chunk_count(1024 * 1024, &cfg); // 1 MiB, below min_chunk_size*default_chunks
        assert!(n >= cfg.min_chunks);
    }

    #[test]
    fn clamps_to_max_chunks_for_huge_files() {
        let mut cfg = ChunkedConfig::default();
        cfg.min_chunk_size_bytes = 1; // force a huge n before clamping
        let n = choose_chunk_count(10 * 1024 * 1024 * 1024, &cfg);
        assert_eq!(n, cfg.max_chunks);
    }

    #[test]
    fn default_chunks_hint_for_typical_file() {
        let cfg = ChunkedConfig::default();
        // 64 MiB / 8 default chunks = 8 MiB preferred size, >= 2 MiB min -> n == 8
        let n = choose_chunk_count(64 * 1024 * 1024, &cfg);
        assert_eq!(n, 8);
    }

    #[test]
    fn zero_total_bytes_yields_zero_chunks() {
        let cfg = ChunkedConfig::default();
        assert_eq!(choose_chunk_count(0, &cfg), 0);
    }

    #[test]
    fn chunked_not_selected_below_threshold() {
        let cfg = ChunkedConfig::default();
        assert!(!should_use_chunked(1024, true, &cfg));
        assert!(should_use_chunked(cfg.size_threshold_bytes, true, &cfg));
        assert!(!should_use_chunked(cfg.size_threshold_bytes, false, &cfg));
    }
}
