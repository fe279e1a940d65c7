//! Engine configuration: an enumerated struct with documented defaults,
//! loaded from `~/.config/dlmgr/config.toml` (created on first run).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Retry/backoff policy applied by the download manager to whole-job failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Chunked-transfer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkedConfig {
    pub size_threshold_bytes: u64,
    pub default_chunks: usize,
    pub min_chunks: usize,
    pub max_chunks: usize,
    pub min_chunk_size_bytes: u64,
    pub max_concurrent_chunks: usize,
    pub chunk_retries: u32,
    pub check_range_support: bool,
    pub range_support_timeout_ms: u64,
    pub force_simple_download: bool,
    pub cleanup_on_complete: bool,
    pub preserve_on_pause: bool,
    pub merge_buffer_size_bytes: usize,
    pub merge_batch_size_bytes: usize,
    pub merge_yield_interval: u32,
    pub preallocate_file: bool,
    pub adaptive_concurrency: bool,
    pub target_speed_per_chunk_bps: u64,
    pub backpressure_threshold: u32,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            size_threshold_bytes: 10 * 1024 * 1024,
            default_chunks: 8,
            min_chunks: 2,
            max_chunks: 32,
            min_chunk_size_bytes: 2 * 1024 * 1024,
            max_concurrent_chunks: 8,
            chunk_retries: 5,
            check_range_support: true,
            range_support_timeout_ms: 5000,
            force_simple_download: false,
            cleanup_on_complete: true,
            preserve_on_pause: true,
            merge_buffer_size_bytes: 16 * 1024 * 1024,
            merge_batch_size_bytes: 8 * 1024 * 1024,
            merge_yield_interval: 10,
            preallocate_file: true,
            adaptive_concurrency: false,
            target_speed_per_chunk_bps: 256 * 1024,
            backpressure_threshold: 5,
        }
    }
}

/// Bandwidth scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub enabled: bool,
    pub auto_detect: bool,
    pub max_bandwidth_bytes_per_second: u64,
    pub distribution_percentages: Vec<u32>,
    pub update_interval_ms: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_detect: true,
            max_bandwidth_bytes_per_second: 0,
            distribution_percentages: vec![40, 30, 30],
            update_interval_ms: 100,
        }
    }
}

/// HTTP transport timeouts and fixed request headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub user_agent: String,
    pub referer: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            response_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
            user_agent: "dlmgr/1.0".to_string(),
            referer: "https://localhost/".to_string(),
        }
    }
}

/// Security/path constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_hosts: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
        }
    }
}

/// File-size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub max_file_size_bytes: u64,
    pub size_margin_bytes: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024 * 1024,
            size_margin_bytes: 10 * 1024,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent: usize,
    pub stale_timeout_ms: u64,
    pub progress_update_interval_ms: u64,
    pub lock_timeout_ms: u64,
    pub lock_check_interval_ms: u64,
    pub queue_processing_timeout_ms: u64,

    pub retry: RetryConfig,
    pub chunked: ChunkedConfig,
    pub bandwidth: BandwidthConfig,
    pub transport: TransportConfig,
    pub security: SecurityConfig,
    pub files: FilesConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            stale_timeout_ms: 300_000,
            progress_update_interval_ms: 200,
            lock_timeout_ms: 5000,
            lock_check_interval_ms: 25,
            queue_processing_timeout_ms: 60_000,

            retry: RetryConfig::default(),
            chunked: ChunkedConfig::default(),
            bandwidth: BandwidthConfig::default(),
            transport: TransportConfig::default(),
            security: SecurityConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlmgr")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_concurrent, 3);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.retry_delay_ms, 1000);
        assert_eq!(cfg.stale_timeout_ms, 300_000);
        assert_eq!(cfg.progress_update_interval_ms, 200);
        assert_eq!(cfg.chunked.size_threshold_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.chunked.default_chunks, 8);
        assert_eq!(cfg.chunked.min_chunks, 2);
        assert_eq!(cfg.chunked.max_chunks, 32);
        assert_eq!(cfg.chunked.chunk_retries, 5);
        assert_eq!(cfg.bandwidth.distribution_percentages, vec![40, 30, 30]);
        assert_eq!(cfg.files.max_file_size_bytes, 50 * 1024 * 1024 * 1024);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = EngineConfig::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: EngineConfig = toml::from_str(&s).unwrap();
        assert_eq!(back.max_concurrent, cfg.max_concurrent);
    }
}
