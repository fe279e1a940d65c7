//! Transfer strategies: single-stream and chunked, plus the shared bandwidth
//! quota adapter both use to talk to the [`BandwidthScheduler`].

pub mod chunked;
pub mod single;

use std::sync::Arc;

use crate::bandwidth::{BandwidthScheduler, WriterKey};
use crate::transport::QuotaSource;

/// Bridges a registered [`BandwidthScheduler`] writer to the transport
/// layer's [`QuotaSource`]. Every granted byte is also recorded back to the
/// scheduler via `consume_quota` so the next tick sees accurate usage.
pub struct BandwidthQuota {
    scheduler: Arc<BandwidthScheduler>,
    key: WriterKey,
}

impl BandwidthQuota {
    pub fn new(scheduler: Arc<BandwidthScheduler>, key: WriterKey) -> Self {
        BandwidthQuota { scheduler, key }
    }
}

impl QuotaSource for BandwidthQuota {
    fn request(&self, wanted: u64) -> u64 {
        let allowed = self.scheduler.get_quota(self.key);
        let granted = allowed.min(wanted);
        if granted > 0 {
            self.scheduler.consume_quota(self.key, granted);
        }
        granted
    }
}

/// Which strategy a download used, reported in lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Single,
    Chunked,
}
