//! Error taxonomy for the download engine.
//!
//! Every failure that can surface from a download job is classified into one
//! of these kinds so the manager can decide whether to retry, fall back, or
//! surface a terminal `failed`/`interrupted` event. Kinds are chosen by
//! behavior, not by the underlying Rust error type.

use std::fmt;

/// Classification of an engine-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad id, title, path, or host. Fails fast; no store transition.
    InputInvalid,
    /// DNS, connection refused/reset, timeout, premature close. Retried.
    NetworkTransient,
    /// HTTP 3xx/4xx or other non-retryable status.
    NetworkFatal,
    /// Range probe failed; not an error by itself, triggers single-stream fallback.
    RangeUnsupported,
    /// EBUSY/EPERM on unlink or similar; retried once after a delay.
    FilesystemTransient,
    /// EACCES/ENOSPC/invalid path; surfaces as `interrupted`.
    FilesystemFatal,
    /// Resumed partial is larger than expected, or server's total changed; partial discarded.
    CorruptedPartial,
    /// User-initiated cancellation. Terminal, never retried.
    Cancelled,
    /// Store/schema/invariant violation. Logged, marked failed without retry.
    Internal,
}

impl ErrorKind {
    /// Whether the download-level retry policy should consider retrying.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkTransient | ErrorKind::FilesystemTransient
        )
    }
}

/// An engine error: a classified kind plus a human-readable message.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        EngineError {
            kind,
            message: message.into(),
        }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputInvalid, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled")
    }

    /// Maps common network errno-style codes to the short human messages the
    /// host sink expects on an `interrupted` event.
    pub fn user_visible_message(&self) -> String {
        match self.message.as_str() {
            "ENOTFOUND" => "cannot connect".to_string(),
            "ETIMEDOUT" => "timed out".to_string(),
            "ECONNREFUSED" => "refused".to_string(),
            "ECONNRESET" => "reset by server".to_string(),
            "EPIPE" => "connection closed".to_string(),
            "EHOSTUNREACH" => "host unreachable".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        let kind = match e.kind() {
            IoKind::PermissionDenied => ErrorKind::FilesystemFatal,
            IoKind::NotFound => ErrorKind::FilesystemTransient,
            IoKind::Interrupted | IoKind::WouldBlock | IoKind::TimedOut => {
                ErrorKind::FilesystemTransient
            }
            _ => ErrorKind::FilesystemFatal,
        };
        EngineError::new(kind, e.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::new(ErrorKind::Internal, e.to_string())
    }
}

/// Storage-layer failures (`StorageWriter`/`StorageWriterBuilder`) surface as
/// `anyhow::Error`; without a more specific classification available at the
/// call site, these are treated as filesystem-fatal.
impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<std::io::Error>() {
            Ok(io_err) => io_err.into(),
            Err(e) => EngineError::new(ErrorKind::FilesystemFatal, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::NetworkTransient.is_retryable());
        assert!(ErrorKind::FilesystemTransient.is_retryable());
        assert!(!ErrorKind::NetworkFatal.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn user_visible_mapping() {
        let e = EngineError::new(ErrorKind::NetworkTransient, "ECONNRESET".to_string());
        assert_eq!(e.user_visible_message(), "reset by server");
    }
}
