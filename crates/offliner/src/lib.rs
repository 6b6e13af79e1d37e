//! Kernel page offlining.
//!
//! Maps an offline policy plus a page address to writes on the kernel's
//! sysfs offline nodes. The `OfflineBackend` trait is the seam to the
//! actual filesystem; `SysfsBackend` is the production implementation and
//! tests substitute a recording one.
//!
//! Exactly one page is written per action: the page whose error rate
//! crossed the threshold.


use common::{CeError, CeResult};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use types::{OfflinePolicy, PhysAddr};

/// Kernel sysfs node used to take a page out of service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OfflineNode {
    /// Cooperative eviction; may migrate live contents, can fail on pinned
    /// pages.
    Soft,
    /// Forcible removal; may lose the page's contents.
    Hard,
}

impl OfflineNode {
    pub const SOFT_PATH: &'static str = "/sys/devices/system/memory/soft_offline_page";
    pub const HARD_PATH: &'static str = "/sys/devices/system/memory/hard_offline_page";

    pub fn path(self) -> &'static str {
        match self {
            OfflineNode::Soft => Self::SOFT_PATH,
            OfflineNode::Hard => Self::HARD_PATH,
        }
    }

    /// Node a policy writes first, `None` for policies that never write.
    /// `SoftThenHard` probes the soft node; the hard fallback is attempted
    /// opportunistically.
    pub fn for_policy(policy: OfflinePolicy) -> Option<OfflineNode> {
        match policy {
            OfflinePolicy::Soft | OfflinePolicy::SoftThenHard => Some(OfflineNode::Soft),
            OfflinePolicy::Hard => Some(OfflineNode::Hard),
            OfflinePolicy::Off | OfflinePolicy::Account => None,
        }
    }
}

/// Where offline writes land.
pub trait OfflineBackend {
    fn write_page(&mut self, node: OfflineNode, addr: PhysAddr) -> io::Result<()>;

    /// Capability probe used at startup.
    fn is_writable(&self, node: OfflineNode) -> bool;
}

/// Backend writing straight to the kernel interface.
///
/// `root` is prepended to the node paths so tests can point the backend at
/// a scratch directory.
#[derive(Clone, Debug)]
pub struct SysfsBackend {
    root: PathBuf,
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn node_path(&self, node: OfflineNode) -> PathBuf {
        self.root.join(node.path().trim_start_matches('/'))
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineBackend for SysfsBackend {
    fn write_page(&mut self, node: OfflineNode, addr: PhysAddr) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(self.node_path(node))?;
        file.write_all(format!("{:#x}", addr).as_bytes())
    }

    fn is_writable(&self, node: OfflineNode) -> bool {
        OpenOptions::new()
            .write(true)
            .open(self.node_path(node))
            .is_ok()
    }
}

/// Policy-driven page offliner.
///
/// Construction probes the kernel interface: a policy whose node is not
/// writable is downgraded to `Account`, so a misconfigured kernel degrades
/// to pure accounting instead of failing every action.
#[derive(Debug)]
pub struct Offliner<B> {
    policy: OfflinePolicy,
    backend: B,
}

impl<B: OfflineBackend> Offliner<B> {
    pub fn new(policy: OfflinePolicy, backend: B) -> Self {
        let policy = match OfflineNode::for_policy(policy) {
            Some(node) if !backend.is_writable(node) => {
                warn!("kernel does not support the page offline interface, accounting only");
                OfflinePolicy::Account
            }
            _ => policy,
        };
        Self { policy, backend }
    }

    /// Effective policy after the startup probe.
    pub fn policy(&self) -> OfflinePolicy {
        self.policy
    }

    /// Ask the kernel to stop using the page at `addr`.
    ///
    /// A no-op unless the policy acts. For `SoftThenHard` a failed soft
    /// write falls back to the hard node and the hard attempt's outcome is
    /// returned.
    pub fn offline(&mut self, addr: PhysAddr) -> CeResult<()> {
        if !self.policy.acts() {
            return Ok(());
        }
        info!("offlining page {:#x}", addr);
        match self.policy {
            OfflinePolicy::Soft => self.write(OfflineNode::Soft, addr),
            OfflinePolicy::Hard => self.write(OfflineNode::Hard, addr),
            OfflinePolicy::SoftThenHard => match self.write(OfflineNode::Soft, addr) {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(
                        "soft offlining of page {:#x} failed ({}), trying hard offlining",
                        addr, err
                    );
                    self.write(OfflineNode::Hard, addr)
                }
            },
            OfflinePolicy::Off | OfflinePolicy::Account => Ok(()),
        }
    }

    fn write(&mut self, node: OfflineNode, addr: PhysAddr) -> CeResult<()> {
        self.backend
            .write_page(node, addr)
            .map_err(|err| CeError::Sysfs(format!("{}: {}", node.path(), err)))
    }
}
