//! Strategy selection: resolves everything a dispatch needs to know before
//! the first byte is fetched — target path, existing-file disposition, and
//! whether to run single-stream or chunked.

use std::path::{Path, PathBuf};

use crate::catalog::CatalogStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind};
use crate::events::FileCheck;
use crate::segmenter;
use crate::store::types::DownloadRow;
use crate::transport::{self, HeadInfo};
use crate::url_model;

/// Everything decided before the transfer strategy is invoked.
pub struct PreparedDownload {
    pub save_path: PathBuf,
    pub total_bytes: Option<u64>,
    pub chunked: bool,
    pub chunk_count: usize,
    pub headers: std::collections::HashMap<String, String>,
}

/// What `prepare` decided should happen next.
pub enum Prepared {
    Ready(PreparedDownload),
    /// An existing file of similar size was found and `force_overwrite` is
    /// false: the caller must transition to `awaiting` and stop.
    NeedsConfirmation { save_path: PathBuf, file_check: FileCheck },
}

pub fn app_data_dir() -> Result<PathBuf, EngineError> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlmgr")
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    Ok(xdg_dirs.get_data_home())
}

fn validate_host(url: &str, allowed_hosts: &[String]) -> Result<(), EngineError> {
    let parsed = url::Url::parse(url).map_err(|e| EngineError::input_invalid(format!("invalid url: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(EngineError::input_invalid("only https URLs are accepted"));
    }
    if allowed_hosts.is_empty() {
        return Ok(());
    }
    let host = parsed.host_str().unwrap_or("");
    if allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        Ok(())
    } else {
        Err(EngineError::input_invalid(format!("host not allowed: {host}")))
    }
}

/// Picks the leaf filename: the catalog title when it already looks like a
/// filename (has an extension), otherwise the title with an extension
/// borrowed from the URL or `Content-Disposition`.
fn leaf_name(title: &str, url: &str, content_disposition: Option<&str>) -> String {
    if Path::new(title).extension().is_some() {
        return title.to_string();
    }
    let derived = url_model::derive_filename(url, content_disposition);
    match Path::new(&derived).extension() {
        Some(ext) => format!("{title}.{}", ext.to_string_lossy()),
        None => title.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn prepare(
    row: &DownloadRow,
    url: &str,
    cfg: &EngineConfig,
    catalog: &dyn CatalogStore,
) -> Result<Prepared, EngineError> {
    validate_host(url, &cfg.security.allowed_hosts)?;

    let headers = std::collections::HashMap::new();
    let transport_cfg = cfg.transport.clone();
    let url_owned = url.to_string();
    let headers_for_probe = headers.clone();
    let transport_cfg_probe = transport_cfg.clone();
    let head: Option<HeadInfo> = tokio::task::spawn_blocking(move || {
        transport::probe_head(&url_owned, &headers_for_probe, &transport_cfg_probe).ok()
    })
    .await
    .map_err(|e| EngineError::new(ErrorKind::Internal, format!("join error: {e}")))?;

    let total_bytes = head.as_ref().and_then(|h| h.content_length);
    let content_disposition = head.as_ref().and_then(|h| h.content_disposition.clone());

    let ancestors = if row.preserve_structure {
        catalog.get_file_ancestor_path(row.id)
    } else {
        Vec::new()
    };
    let download_path = row
        .download_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| app_data_dir().unwrap_or_else(|_| PathBuf::from(".")).join("downloads"));
    let filename = leaf_name(&row.title, url, content_disposition.as_deref());
    let save_path = url_model::compute_save_path(&download_path, &ancestors, &filename, row.preserve_structure);

    let roots = url_model::whitelisted_roots(&app_data_dir()?);
    if !url_model::is_within_whitelisted_roots(&save_path, &roots) {
        return Err(EngineError::input_invalid("resolved save path escapes whitelisted roots"));
    }

    if !row.force_overwrite && save_path.exists() {
        if let Ok(meta) = std::fs::metadata(&save_path) {
            let existing_size = meta.len();
            if let Some(expected) = total_bytes {
                let size_difference = existing_size as i64 - expected as i64;
                let margin = cfg.files.size_margin_bytes as i64;
                let similar_size = size_difference.abs() <= margin;
                if similar_size {
                    return Ok(Prepared::NeedsConfirmation {
                        save_path,
                        file_check: FileCheck {
                            existing_size,
                            expected_size: expected,
                            size_difference,
                            similar_size,
                        },
                    });
                }
            } else if existing_size > 0 {
                return Ok(Prepared::NeedsConfirmation {
                    save_path,
                    file_check: FileCheck {
                        existing_size,
                        expected_size: 0,
                        size_difference: existing_size as i64,
                        similar_size: false,
                    },
                });
            }
        }
    }

    if let Some(parent) = save_path.parent() {
        std::fs::create_dir_all(parent).map_err(EngineError::from)?;
    }

    let mut range_supported = head.as_ref().map(|h| h.accept_ranges).unwrap_or(false);
    if !range_supported && cfg.chunked.check_range_support {
        let headers = headers.clone();
        let transport_cfg = transport_cfg.clone();
        let url_owned = url.to_string();
        let timeout_ms = cfg.chunked.range_support_timeout_ms;
        let probe = tokio::task::spawn_blocking(move || {
            transport::check_range_support(
                &url_owned,
                &headers,
                &transport_cfg,
                std::time::Duration::from_millis(timeout_ms),
            )
        })
        .await
        .map_err(|e| EngineError::new(ErrorKind::Internal, format!("join error: {e}")))?;
        range_supported = probe.supported;
    }

    let total_for_layout = total_bytes.unwrap_or(0);
    let chunked = total_bytes.is_some() && segmenter::should_use_chunked(total_for_layout, range_supported, &cfg.chunked);
    let chunk_count = if chunked {
        segmenter::choose_chunk_count(total_for_layout, &cfg.chunked)
    } else {
        0
    };

    Ok(Prepared::Ready(PreparedDownload {
        save_path,
        total_bytes,
        chunked,
        chunk_count,
        headers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_name_keeps_title_with_extension() {
        assert_eq!(leaf_name("debian-12.iso", "https://x/y", None), "debian-12.iso");
    }

    #[test]
    fn leaf_name_borrows_extension_from_url_when_title_has_none() {
        assert_eq!(leaf_name("Debian 12", "https://x/debian.iso", None), "Debian 12.iso");
    }

    #[test]
    fn leaf_name_falls_back_to_bare_title_with_no_extension_anywhere() {
        assert_eq!(leaf_name("Debian 12", "https://x/", None), "Debian 12");
    }

    #[test]
    fn validate_host_rejects_non_https() {
        let err = validate_host("http://example.com/x", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputInvalid);
    }

    #[test]
    fn validate_host_enforces_allowlist() {
        let allowed = vec!["good.example.com".to_string()];
        assert!(validate_host("https://good.example.com/x", &allowed).is_ok());
        assert!(validate_host("https://evil.example.com/x", &allowed).is_err());
    }
}
