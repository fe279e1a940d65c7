//! HEAD probing and response header parsing.

use std::collections::HashMap;
use std::str;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::error::{EngineError, ErrorKind};

/// Parsed metadata from a HEAD request, used to decide single-stream vs
/// chunked and to seed resume validation.
#[derive(Debug, Clone, Default)]
pub struct HeadInfo {
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_disposition: Option<String>,
}

/// Issues a HEAD request. Redirects are never followed: a 3xx response is
/// reported as `NetworkFatal`, matching the "redirection not supported"
/// contract rather than the upstream convention of chasing `Location`.
pub fn probe_head(
    url: &str,
    extra_headers: &HashMap<String, String>,
    cfg: &TransportConfig,
) -> Result<HeadInfo, EngineError> {
    let mut header_lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|e| EngineError::new(ErrorKind::InputInvalid, e.to_string()))?;
    easy.nobody(true)
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    easy.follow_location(false)
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    easy.connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    easy.timeout(Duration::from_millis(cfg.response_timeout_ms))
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    easy.useragent(&cfg.user_agent)
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    easy.referer(&cfg.referer)
        .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;

    let mut list = curl::easy::List::new();
    for (k, v) in extra_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    }
    if !extra_headers.is_empty() {
        easy.http_headers(list)
            .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    header_lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(|e| EngineError::new(ErrorKind::Internal, e.to_string()))?;
        transfer
            .perform()
            .map_err(|e| classify_curl_error(&e))?;
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
    if !(200..300).contains(&code) {
        return Err(EngineError::new(
            ErrorKind::NetworkFatal,
            format!("HTTP {code}"),
        ));
    }

    Ok(parse_headers(&header_lines))
}

fn parse_headers(lines: &[String]) -> HeadInfo {
    let mut info = HeadInfo::default();
    for line in lines {
        let line = line.trim();
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            info.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            info.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("etag") {
            info.etag = Some(value.trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            info.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            info.content_disposition = Some(value.to_string());
        }
    }
    info
}

pub(super) fn classify_curl_error(e: &curl::Error) -> EngineError {
    if e.is_operation_timedout() {
        return EngineError::new(ErrorKind::NetworkTransient, "ETIMEDOUT");
    }
    if e.is_couldnt_connect() {
        return EngineError::new(ErrorKind::NetworkTransient, "ECONNREFUSED");
    }
    if e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
        return EngineError::new(ErrorKind::NetworkTransient, "ENOTFOUND");
    }
    if e.is_recv_error() || e.is_read_error() {
        return EngineError::new(ErrorKind::NetworkTransient, "ECONNRESET");
    }
    if e.is_send_error() || e.is_got_nothing() {
        return EngineError::new(ErrorKind::NetworkTransient, "EPIPE");
    }
    EngineError::new(ErrorKind::NetworkTransient, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_length_and_ranges() {
        let lines = vec![
            "HTTP/1.1 200 OK".to_string(),
            "Content-Length: 12345".to_string(),
            "Accept-Ranges: bytes".to_string(),
        ];
        let info = parse_headers(&lines);
        assert_eq!(info.content_length, Some(12345));
        assert!(info.accept_ranges);
    }

    #[test]
    fn parses_etag_and_last_modified() {
        let lines = vec![
            "ETag: \"abc-123\"".to_string(),
            "Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        ];
        let info = parse_headers(&lines);
        assert_eq!(info.etag.as_deref(), Some("abc-123"));
        assert_eq!(info.last_modified.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
    }

    #[test]
    fn no_accept_ranges_header_means_unsupported() {
        let lines = vec!["Content-Length: 999".to_string(), "Accept-Ranges: none".to_string()];
        let info = parse_headers(&lines);
        assert!(!info.accept_ranges);
    }
}
