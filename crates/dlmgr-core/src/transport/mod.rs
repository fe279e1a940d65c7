//! HTTP Transport: HEAD/GET requests over curl with fixed headers, a
//! connect/response/idle timeout triple, range-support probing, and
//! cooperative cancellation. Runs on a blocking thread; callers invoke these
//! functions via `tokio::task::spawn_blocking`.

mod cancel;
mod probe;

pub use cancel::CancellationHandle;
pub use probe::{probe_head, HeadInfo};

use std::collections::HashMap;
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::TransportConfig;
use crate::error::{EngineError, ErrorKind};
use crate::storage::StorageWriter;

/// Result of `check_range_support`: whether the server honors `Range`
/// requests, plus whatever size it reported along the way.
#[derive(Debug, Clone, Copy)]
pub struct RangeProbe {
    pub supported: bool,
    pub total_bytes: Option<u64>,
}

/// Probes range support with a HEAD request bounded by `range_support_timeout`.
/// A failure of any kind (timeout, connection, non-2xx) degrades to
/// `supported: false` rather than propagating an error — callers fall back
/// to the single-stream downloader.
pub fn check_range_support(
    url: &str,
    extra_headers: &HashMap<String, String>,
    cfg: &TransportConfig,
    range_support_timeout: Duration,
) -> RangeProbe {
    let mut probe_cfg = cfg.clone();
    probe_cfg.response_timeout_ms = range_support_timeout.as_millis() as u64;

    match probe::probe_head(url, extra_headers, &probe_cfg) {
        Ok(info) => RangeProbe {
            supported: info.accept_ranges,
            total_bytes: info.content_length,
        },
        Err(_) => RangeProbe {
            supported: false,
            total_bytes: None,
        },
    }
}

/// Outcome of a completed GET: the HTTP status and how many bytes were
/// written to storage.
#[derive(Debug, Clone, Copy)]
pub struct FetchOutcome {
    pub status: u32,
    pub bytes_written: u64,
}

/// Requests bytes for a writer and, once granted, records the consumption.
/// Implementations (typically a closure over `BandwidthScheduler`) must
/// return promptly with the bytes allowed right now; `0` means "wait".
pub trait QuotaSource {
    fn request(&self, wanted: u64) -> u64;
}

impl<F: Fn(u64) -> u64> QuotaSource for F {
    fn request(&self, wanted: u64) -> u64 {
        self(wanted)
    }
}

/// Unlimited quota: every request is granted in full.
pub struct NoQuota;
impl QuotaSource for NoQuota {
    fn request(&self, wanted: u64) -> u64 {
        wanted
    }
}

fn build_easy(
    url: &str,
    extra_headers: &HashMap<String, String>,
    cfg: &TransportConfig,
    range_header: Option<&str>,
) -> Result<curl::easy::Easy, EngineError> {
    let mut easy = curl::easy::Easy::new();
    let internal = |e: curl::Error| EngineError::new(ErrorKind::Internal, e.to_string());

    easy.url(url)
        .map_err(|e| EngineError::new(ErrorKind::InputInvalid, e.to_string()))?;
    easy.follow_location(false).map_err(internal)?;
    easy.connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .map_err(internal)?;
    easy.low_speed_limit(512).map_err(internal)?;
    easy.low_speed_time(Duration::from_millis(cfg.idle_timeout_ms))
        .map_err(internal)?;
    easy.timeout(Duration::from_millis(
        cfg.response_timeout_ms.max(cfg.idle_timeout_ms),
    ))
    .map_err(internal)?;
    easy.useragent(&cfg.user_agent).map_err(internal)?;
    easy.referer(&cfg.referer).map_err(internal)?;

    if let Some(range) = range_header {
        easy.range(range).map_err(internal)?;
    }

    let mut list = curl::easy::List::new();
    for (k, v) in extra_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim())).map_err(internal)?;
    }
    if !extra_headers.is_empty() {
        easy.http_headers(list).map_err(internal)?;
    }

    Ok(easy)
}

/// Writes `data` into `storage` at `base_offset + cursor`, sliced to respect
/// `quota`. Blocks (sleeping briefly) when the quota is momentarily
/// exhausted, providing the write loop's backpressure against BS shaping.
fn write_with_quota(
    data: &[u8],
    storage: &StorageWriter,
    cursor: &AtomicU64,
    base_offset: u64,
    quota: &dyn QuotaSource,
    cancel: &CancellationHandle,
) -> usize {
    let mut written = 0usize;
    while written < data.len() {
        if cancel.is_cancelled() {
            return written;
        }
        let remaining = (data.len() - written) as u64;
        let granted = quota.request(remaining);
        if granted == 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        let take = granted.min(remaining) as usize;
        let slice = &data[written..written + take];
        let off = cursor.fetch_add(take as u64, Ordering::Relaxed);
        if let Err(e) = storage.write_at(base_offset + off, slice) {
            tracing::warn!("transport write failed: {}", e);
            return written;
        }
        written += take;
    }
    written
}

/// Performs a GET. `range` is `None` for a whole-file fetch, or
/// `Some((start, end_inclusive))` where `end_inclusive = None` requests an
/// open-ended `bytes=start-` (resume-to-end) range. `base_offset` is where
/// the first received byte lands in `storage`. Only `200`/`206` succeed;
/// any other status (including 3xx) is `NetworkFatal`.
pub fn fetch(
    url: &str,
    extra_headers: &HashMap<String, String>,
    cfg: &TransportConfig,
    range: Option<(u64, Option<u64>)>,
    base_offset: u64,
    storage: &StorageWriter,
    quota: &dyn QuotaSource,
    cancel: &CancellationHandle,
) -> Result<FetchOutcome, EngineError> {
    let range_header = range.map(|(start, end)| match end {
        Some(end) => format!("{start}-{end}"),
        None => format!("{start}-"),
    });
    let mut easy = build_easy(url, extra_headers, cfg, range_header.as_deref())?;

    let cursor = AtomicU64::new(0);
    let storage_write_err = std::sync::Mutex::new(false);

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                let _ = str::from_utf8(data);
                true
            })
            .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
        transfer
            .write_function(|data| {
                if cancel.is_cancelled() {
                    return Ok(0);
                }
                let n = write_with_quota(data, storage, &cursor, base_offset, quota, cancel);
                if n < data.len() {
                    *storage_write_err.lock().unwrap() = true;
                }
                Ok(n)
            })
            .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;

        if let Err(e) = transfer.perform() {
            if cancel.is_cancelled() {
                return Err(EngineError::cancelled());
            }
            if *storage_write_err.lock().unwrap() {
                return Err(EngineError::new(
                    ErrorKind::FilesystemFatal,
                    "write to storage failed mid-transfer",
                ));
            }
            return Err(probe::classify_curl_error(&e));
        }
    }

    if cancel.is_cancelled() {
        return Err(EngineError::cancelled());
    }

    let code = easy
        .response_code()
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    if (300..400).contains(&code) {
        return Err(EngineError::new(
            ErrorKind::NetworkFatal,
            format!("redirection not supported (HTTP {code})"),
        ));
    }
    if code != 200 && code != 206 {
        return Err(EngineError::new(ErrorKind::NetworkFatal, format!("HTTP {code}")));
    }
    if range.is_some() && code != 206 {
        return Err(EngineError::new(
            ErrorKind::RangeUnsupported,
            format!("expected 206 for ranged request, got {code}"),
        ));
    }

    Ok(FetchOutcome {
        status: code as u32,
        bytes_written: cursor.load(Ordering::Relaxed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_quota_grants_everything_requested() {
        let q = NoQuota;
        assert_eq!(q.request(1234), 1234);
    }

    #[test]
    fn closure_quota_source_is_usable_directly() {
        let q = |wanted: u64| wanted.min(10);
        assert_eq!(q.request(100), 10);
        assert_eq!(q.request(5), 5);
    }
}
