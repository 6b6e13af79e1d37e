//! Leaky-bucket rate accounting.
//!
//! A bucket is fed increments stamped with event time and drains linearly:
//! over one configured window, a full threshold's worth of counts leaks
//! away. Crossings are edge-triggered — when the level reaches the
//! threshold, the bucket reports the crossing once, folds the level into a
//! running total, and starts over. A sustained error rate therefore
//! produces one crossing per threshold-worth of events, not one per event.
//!
//! The accountant feeds buckets with event timestamps, which the caller
//! keeps non-decreasing. A timestamp behind the last update decays nothing;
//! it never fails.


use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Threshold configuration for one bucket.
///
/// A zero `capacity` disables the bucket: it accepts increments but never
/// reports a crossing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Count at which the bucket crosses.
    pub capacity: u32,
    /// Time over which a full threshold's worth of counts drains away.
    pub window: Duration,
    /// Emit a log line when the crossing notice fires.
    pub log: bool,
    /// Operator hook to run on a crossing.
    pub trigger: Option<PathBuf>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            window: Duration::from_secs(24 * 60 * 60),
            log: true,
            trigger: None,
        }
    }
}

/// Decaying counter state. One per tracked page, plus one for the
/// replacement rate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeakyBucket {
    level: u32,
    excess: u32,
    last_update: Option<u64>,
}

impl LeakyBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the bucket and forget the last-update time.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current level, after the most recent decay.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Counts observed this episode, including those folded in by
    /// crossings.
    pub fn total(&self) -> u32 {
        self.level.saturating_add(self.excess)
    }

    /// Advance the bucket to `now`, add `increment`, and report whether the
    /// threshold was crossed by this call.
    pub fn account(&mut self, cfg: &BucketConfig, increment: u32, now: u64) -> bool {
        if cfg.capacity == 0 {
            return false;
        }
        self.age(cfg, now);
        self.level = self.level.saturating_add(increment);
        if self.level >= cfg.capacity {
            self.excess = self.excess.saturating_add(self.level);
            self.level = 0;
            return true;
        }
        false
    }

    /// Human-readable state, e.g. `"10 in 24h"`. Used in log lines and
    /// trigger environments.
    pub fn summary(&self, cfg: &BucketConfig) -> String {
        format!("{} in {}", self.total(), format_window(cfg.window.as_secs()))
    }

    // Drain is applied in whole-window granules so that equal timestamps
    // decay nothing.
    fn age(&mut self, cfg: &BucketConfig, now: u64) {
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            return;
        };
        let window = cfg.window.as_secs();
        let elapsed = now.saturating_sub(last);
        if window == 0 || elapsed < window {
            return;
        }
        let drain = (u128::from(elapsed) * u128::from(cfg.capacity) / u128::from(window))
            .min(u128::from(u32::MAX)) as u32;
        self.level = self.level.saturating_sub(drain);
        self.last_update = Some(now);
        if self.level < cfg.capacity {
            self.excess = 0;
        }
    }
}

fn format_window(secs: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    if secs >= 7 * DAY && secs % DAY == 0 {
        format!("{}d", secs / DAY)
    } else if secs >= HOUR && secs % HOUR == 0 {
        format!("{}h", secs / HOUR)
    } else if secs >= MINUTE && secs % MINUTE == 0 {
        format!("{}m", secs / MINUTE)
    } else {
        format!("{}s", secs)
    }
}
