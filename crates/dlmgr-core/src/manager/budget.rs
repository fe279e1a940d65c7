//! Global concurrency ceiling shared by every in-flight download.
//!
//! Both the single-stream and chunked strategies count as exactly one slot
//! each against `maxConcurrent`; a chunk worker does not reserve its own
//! slot (chunk-level concurrency is bounded separately by
//! `chunked.maxConcurrentChunks`).

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct ConcurrencySlots {
    max_total: usize,
    in_use: AtomicUsize,
}

impl ConcurrencySlots {
    pub fn new(max_total: usize) -> Self {
        ConcurrencySlots {
            max_total: max_total.max(1),
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.max_total.saturating_sub(self.in_use.load(Ordering::Relaxed))
    }

    /// Attempts to reserve one slot. Returns `true` if reserved.
    pub fn try_reserve_one(&self) -> bool {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            if current >= self.max_total {
                return false;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release_one(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_round_trip() {
        let slots = ConcurrencySlots::new(3);
        assert!(slots.try_reserve_one());
        assert!(slots.try_reserve_one());
        assert!(slots.try_reserve_one());
        assert!(!slots.try_reserve_one());
        assert_eq!(slots.in_use(), 3);
        slots.release_one();
        assert_eq!(slots.available(), 1);
        assert!(slots.try_reserve_one());
        assert_eq!(slots.in_use(), 3);
    }

    #[test]
    fn release_never_underflows() {
        let slots = ConcurrencySlots::new(1);
        slots.release_one();
        slots.release_one();
        assert_eq!(slots.in_use(), 0);
    }
}
