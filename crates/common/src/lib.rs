
use bucket::BucketConfig;
use serde::{Deserialize, Serialize};
use std::{io, path::PathBuf};
use thiserror::Error;
use types::{OfflinePolicy, ParsePolicyError};

/// Canonical error type shared across the accounting subsystems.
#[derive(Error, Debug)]
pub enum CeError {
    #[error("config: {0}")]
    Config(String),
    #[error("sysfs: {0}")]
    Sysfs(String),
    #[error("trigger: {0}")]
    Trigger(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ParsePolicyError> for CeError {
    fn from(err: ParsePolicyError) -> Self {
        CeError::Config(err.to_string())
    }
}

/// Result alias that carries a `CeError`.
pub type CeResult<T> = Result<T, CeError>;

/// Settings consumed from the `page` section of the daemon configuration.
///
/// The serde names are the exact configuration keys, so a parsed section
/// deserializes straight into this struct.
///
/// # Example
/// ```
/// use common::PageConfig;
/// use types::OfflinePolicy;
///
/// let config = PageConfig::builder()
///     .action(OfflinePolicy::Soft)
///     .max_counters(1024)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct PageConfig {
    /// Per-page corrected-error threshold.
    #[serde(rename = "memory-ce")]
    #[builder(default)]
    pub memory_ce: BucketConfig,
    /// Threshold on how fast tracked pages are being evicted and replaced.
    #[serde(rename = "memory-ce-counter-replacement")]
    #[builder(default)]
    pub replacement: BucketConfig,
    /// What to do with a page that crosses the threshold.
    #[serde(rename = "memory-ce-action")]
    #[builder(default = OfflinePolicy::Off)]
    pub action: OfflinePolicy,
    /// Hook run synchronously right before a soft offline.
    #[serde(rename = "memory-pre-sync-soft-ce-trigger")]
    pub pre_soft_trigger: Option<PathBuf>,
    /// Hook run synchronously right after a soft offline.
    #[serde(rename = "memory-post-sync-soft-ce-trigger")]
    pub post_soft_trigger: Option<PathBuf>,
    /// Upper bound on tracked pages, before rounding to a cluster multiple.
    #[serde(rename = "max-corr-err-counters")]
    #[builder(default = 8192)]
    pub max_counters: usize,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            memory_ce: BucketConfig::default(),
            replacement: BucketConfig::default(),
            action: OfflinePolicy::Off,
            pre_soft_trigger: None,
            post_soft_trigger: None,
            max_counters: 8192,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{CeError, CeResult, PageConfig};
    pub use bucket::{BucketConfig, LeakyBucket};
    pub use types::{ErrorEvent, OfflinePolicy, OfflineState, PhysAddr};
}
