//! The single "processing lock" that serializes dispatch-loop passes.
//!
//! Acquisition is bounded by `lockTimeout`; a caller that cannot get the
//! lock within that window gives up rather than blocking the rest of the
//! engine indefinitely. `lockCheckInterval` is the polling granularity used
//! while waiting.

use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{EngineError, ErrorKind};

pub struct ProcessingLock {
    inner: std::sync::Arc<Mutex<()>>,
    timeout: Duration,
    check_interval: Duration,
}

impl ProcessingLock {
    pub fn new(timeout: Duration, check_interval: Duration) -> Self {
        ProcessingLock {
            inner: std::sync::Arc::new(Mutex::new(())),
            timeout,
            check_interval: check_interval.max(Duration::from_millis(1)),
        }
    }

    /// Waits for the lock, polling at `check_interval` and giving up past
    /// `timeout`. Tokio's `Mutex` already queues fairly, so this is really
    /// a single bounded wait rather than a literal spin loop — the interval
    /// only matters if the lock is handed off faster than we can observe.
    pub async fn acquire(&self) -> Result<OwnedMutexGuard<()>, EngineError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::new(ErrorKind::Internal, "processing lock acquisition timed out"));
            }
            let wait = remaining.min(self.check_interval);
            match tokio::time::timeout(wait, self.inner.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_when_uncontended() {
        let lock = ProcessingLock::new(Duration::from_millis(200), Duration::from_millis(10));
        let _guard = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn times_out_when_held_by_another_waiter() {
        let lock = ProcessingLock::new(Duration::from_millis(50), Duration::from_millis(5));
        let held = lock.acquire().await.unwrap();
        let err = lock.acquire().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        drop(held);
    }
}
