//! Bandwidth Scheduler: distributes a total bandwidth figure among currently
//! registered writers using a fixed percentage table, recomputed on a timer.

mod quota;

pub use quota::{Quota, WriterKey};

use crate::config::BandwidthConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Inner {
    writers: HashMap<WriterKey, (Quota, u64)>,
    next_position: u64,
    detected_bps: Option<u64>,
    last_tick: Option<Instant>,
}

/// Distributes bandwidth across registered writers. All mutation happens
/// under one internal lock at tick time and at register/unregister; writer
/// reads of their own `bps` may race across a tick boundary but always see a
/// consistent snapshot (never a partially-updated row).
pub struct BandwidthScheduler {
    cfg: BandwidthConfig,
    inner: Mutex<Inner>,
}

const DEFAULT_DETECTED_BPS: u64 = 10 * 1024 * 1024; // 10 MB/s seed after a successful probe.
const EMA_ALPHA: f64 = 0.3;

impl BandwidthScheduler {
    pub fn new(cfg: BandwidthConfig) -> Self {
        BandwidthScheduler {
            cfg,
            inner: Mutex::new(Inner {
                writers: HashMap::new(),
                next_position: 0,
                detected_bps: None,
                last_tick: None,
            }),
        }
    }

    pub fn register(&self, key: WriterKey) {
        let mut inner = self.inner.lock().unwrap();
        let position = inner.next_position;
        inner.next_position += 1;
        inner.writers.insert(key, (Quota::new(), position));
    }

    pub fn unregister(&self, key: WriterKey) {
        self.inner.lock().unwrap().writers.remove(&key);
    }

    /// Call once a successful probe against a well-known origin has
    /// completed, to seed a default estimate before any real transfer has
    /// reported a measurement.
    pub fn seed_default_estimate(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.detected_bps.is_none() {
            inner.detected_bps = Some(DEFAULT_DETECTED_BPS);
        }
    }

    /// Feeds a fresh throughput measurement (bytes/sec) from an active
    /// transfer. Smoothed exponentially and clamped to [0.5x, 2x] of the
    /// current estimate to reject single-sample jumps.
    pub fn update_detected_bandwidth(&self, measured_bps: u64) {
        let mut inner = self.inner.lock().unwrap();
        let next = match inner.detected_bps {
            None => measured_bps,
            Some(current) => {
                let smoothed =
                    (current as f64) * (1.0 - EMA_ALPHA) + (measured_bps as f64) * EMA_ALPHA;
                let lower = (current as f64) * 0.5;
                let upper = (current as f64) * 2.0;
                smoothed.clamp(lower, upper) as u64
            }
        };
        inner.detected_bps = Some(next);
    }

    /// Effective total bandwidth to distribute, or `None` for bypass (allow
    /// all): disabled, or neither a fixed nor a detected figure exists.
    fn effective_total_bps(&self, inner: &Inner) -> Option<u64> {
        if !self.cfg.enabled {
            return None;
        }
        if self.cfg.max_bandwidth_bytes_per_second > 0 {
            return Some(self.cfg.max_bandwidth_bytes_per_second);
        }
        if self.cfg.auto_detect {
            return inner.detected_bps;
        }
        None
    }

    /// Recomputes per-writer shares. No-ops if called again before
    /// `update_interval_ms` has elapsed since the previous tick, or if no
    /// writer is registered.
    pub fn tick(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        if inner.writers.is_empty() {
            return;
        }
        let interval = Duration::from_millis(self.cfg.update_interval_ms);
        if let Some(last) = inner.last_tick {
            if now.duration_since(last) < interval {
                return;
            }
        }
        inner.last_tick = Some(now);

        let total = self.effective_total_bps(&inner);
        let Some(total) = total else {
            // Bypass: drop every bps to 0 so get_quota() falls back to allow-all.
            for (quota, _) in inner.writers.values_mut() {
                quota.bps = 0;
                quota.bytes_used = 0;
                quota.last_reset = now;
            }
            return;
        };

        let mut ordered: Vec<(WriterKey, u64)> = inner
            .writers
            .iter()
            .map(|(k, (_, pos))| (*k, *pos))
            .collect();
        ordered.sort_by_key(|(_, pos)| *pos);

        let pcts = &self.cfg.distribution_percentages;
        let first_n = pcts.len().min(ordered.len());
        let used_first: u32 = pcts.iter().take(first_n).sum();
        let remainder_writers = ordered.len().saturating_sub(first_n);
        let remainder_pct = if remainder_writers > 0 {
            (100u32.saturating_sub(used_first)) as f64 / remainder_writers as f64
        } else {
            0.0
        };

        for (i, (key, _)) in ordered.iter().enumerate() {
            let pct = if i < first_n {
                pcts[i] as f64
            } else {
                remainder_pct
            };
            let bps = ((total as f64) * pct / 100.0).floor() as u64;
            if let Some((quota, _)) = inner.writers.get_mut(key) {
                quota.bps = bps;
                quota.bytes_used = 0;
                quota.last_reset = now;
            }
        }
    }

    /// Bytes this writer may send right now. `None` total bandwidth (bypass)
    /// or a writer with `bps == 0` both return "allow all" via `u64::MAX`.
    pub fn get_quota(&self, key: WriterKey) -> u64 {
        let inner = self.inner.lock().unwrap();
        if self.effective_total_bps(&inner).is_none() {
            return u64::MAX;
        }
        let Some((quota, _)) = inner.writers.get(&key) else {
            return u64::MAX;
        };
        if quota.bps == 0 {
            return u64::MAX;
        }
        let interval_ms = self.cfg.update_interval_ms;
        let budget = (quota.bps as u128 * interval_ms as u128 / 1000) as u64;
        budget.saturating_sub(quota.bytes_used)
    }

    pub fn consume_quota(&self, key: WriterKey, written: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((quota, _)) = inner.writers.get_mut(&key) {
            quota.bytes_used += written;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BandwidthConfig {
        BandwidthConfig {
            enabled: true,
            auto_detect: false,
            max_bandwidth_bytes_per_second: 1000,
            distribution_percentages: vec![40, 30, 30],
            update_interval_ms: 100,
        }
    }

    #[test]
    fn bypass_when_disabled() {
        let mut c = cfg();
        c.enabled = false;
        let sched = BandwidthScheduler::new(c);
        let key = WriterKey::whole(1);
        sched.register(key);
        sched.tick(Instant::now());
        assert_eq!(sched.get_quota(key), u64::MAX);
    }

    #[test]
    fn bypass_with_no_writers_is_noop() {
        let sched = BandwidthScheduler::new(cfg());
        sched.tick(Instant::now()); // must not panic
    }

    #[test]
    fn distribution_follows_fixed_table() {
        let sched = BandwidthScheduler::new(cfg());
        let k1 = WriterKey::whole(1);
        let k2 = WriterKey::whole(2);
        let k3 = WriterKey::whole(3);
        sched.register(k1);
        sched.register(k2);
        sched.register(k3);
        sched.tick(Instant::now());

        // bps for each writer is pct% of 1000 bps, interval is 100ms => budget = bps/10.
        assert_eq!(sched.get_quota(k1), 40); // 400 bps * 0.1
        assert_eq!(sched.get_quota(k2), 30);
        assert_eq!(sched.get_quota(k3), 30);
    }

    #[test]
    fn remainder_split_equally_beyond_third_writer() {
        let sched = BandwidthScheduler::new(cfg());
        let keys: Vec<_> = (1..=5).map(WriterKey::whole).collect();
        for k in &keys {
            sched.register(*k);
        }
        sched.tick(Instant::now());
        // first3: 40/30/30 = 100% used; remaining 2 writers split 0% each.
        assert_eq!(sched.get_quota(keys[3]), 0);
        assert_eq!(sched.get_quota(keys[4]), 0);
    }

    #[test]
    fn consume_quota_reduces_remaining_budget() {
        let sched = BandwidthScheduler::new(cfg());
        let k1 = WriterKey::whole(1);
        sched.register(k1);
        sched.tick(Instant::now());
        let before = sched.get_quota(k1);
        sched.consume_quota(k1, 10);
        assert_eq!(sched.get_quota(k1), before.saturating_sub(10));
    }

    #[test]
    fn tick_is_a_noop_before_interval_elapses() {
        let sched = BandwidthScheduler::new(cfg());
        let k1 = WriterKey::whole(1);
        sched.register(k1);
        let t0 = Instant::now();
        sched.tick(t0);
        sched.consume_quota(k1, 5);
        sched.tick(t0); // same instant, interval not elapsed
        // bytes_used must not have been reset by the second tick.
        assert_eq!(sched.get_quota(k1), 40 - 5);
    }

    #[test]
    fn auto_detect_seeds_default_then_smooths() {
        let mut c = cfg();
        c.max_bandwidth_bytes_per_second = 0;
        c.auto_detect = true;
        let sched = BandwidthScheduler::new(c);
        sched.seed_default_estimate();
        sched.update_detected_bandwidth(20 * 1024 * 1024);
        // Clamped to at most 2x the 10MB/s seed.
        let inner = sched.inner.lock().unwrap();
        assert!(inner.detected_bps.unwrap() <= 20 * 1024 * 1024);
        assert!(inner.detected_bps.unwrap() >= 10 * 1024 * 1024);
    }
}
