//! Accounting of forced evictions from the page table.
//!
//! A high replacement rate means more distinct pages are failing than the
//! table can track, which is itself worth an operator notice.

use bucket::{BucketConfig, LeakyBucket};

#[derive(Debug, Default)]
pub struct ReplacementAccountant {
    bucket: LeakyBucket,
    count: u64,
}

impl ReplacementAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note one forced eviction. True when the crossing notice should
    /// fire.
    pub fn record(&mut self, cfg: &BucketConfig, timestamp: u64) -> bool {
        self.count += 1;
        self.bucket.account(cfg, 1, timestamp)
    }

    /// Forced evictions since startup.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn bucket(&self) -> &LeakyBucket {
        &self.bucket
    }
}
