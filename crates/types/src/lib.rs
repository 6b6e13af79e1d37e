use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of low address bits covered by one page.
pub const PAGE_SHIFT: u32 = 12;

/// Physical page size in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Physical memory address.
/// Examples:
/// - `let raw = PhysAddr(0x12345678);`
/// - `let page = raw.page_base(); // PhysAddr(0x12345000)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// Round down to the start of the containing page.
    pub fn page_base(self) -> PhysAddr {
        PhysAddr(self.0 & !(PAGE_SIZE - 1))
    }

    pub fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

bitflags::bitflags! {
    /// Machine-check status word bits consumed by the accounting path.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MciStatus: u64 {
        /// The address field of the event is valid.
        const ADDR_VALID = 1 << 58;
        /// The misc field of the event is valid.
        const MISC_VALID = 1 << 59;
        /// The error was not corrected by hardware.
        const UNCORRECTED = 1 << 61;
        /// The whole status word is valid.
        const VALID = 1 << 63;
    }
}

/// One machine-check event as delivered by the decoding layer.
///
/// `cpu` is the effective CPU id; `channel` and `dimm` are `None` when the
/// decoder could not attribute the error to a slot.
#[derive(Clone, Debug)]
pub struct ErrorEvent {
    pub addr: u64,
    /// Event time in seconds; buckets decay against this, not wall clock.
    pub timestamp: u64,
    pub cpu: u32,
    pub bank: u8,
    pub status: MciStatus,
    pub socket_id: u32,
    pub channel: Option<u32>,
    pub dimm: Option<u32>,
}

/// DIMM identity attached to threshold notices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DimmLocation {
    pub socket_id: u32,
    pub channel: Option<u32>,
    pub dimm: Option<u32>,
}

/// CPU family reported by the decoding layer, used for per-platform quirks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuFamily {
    Generic,
    SandyBridge,
    SandyBridgeEp,
    IvyBridgeEp,
    HaswellEp,
    SkylakeSp,
}

/// What to do with a page whose corrected error rate crossed the threshold.
///
/// The variants are ordered: anything above `Account` performs kernel
/// writes, which is what `acts()` tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflinePolicy {
    Off,
    Account,
    Soft,
    Hard,
    SoftThenHard,
}

impl OfflinePolicy {
    /// True when the policy issues kernel offline writes.
    pub fn acts(self) -> bool {
        self > OfflinePolicy::Account
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OfflinePolicy::Off => "off",
            OfflinePolicy::Account => "account",
            OfflinePolicy::Soft => "soft",
            OfflinePolicy::Hard => "hard",
            OfflinePolicy::SoftThenHard => "soft-then-hard",
        }
    }
}

impl fmt::Display for OfflinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown offline action `{0}`")]
pub struct ParsePolicyError(pub String);

impl FromStr for OfflinePolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(OfflinePolicy::Off),
            "account" => Ok(OfflinePolicy::Account),
            "soft" => Ok(OfflinePolicy::Soft),
            "hard" => Ok(OfflinePolicy::Hard),
            "soft-then-hard" => Ok(OfflinePolicy::SoftThenHard),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}

/// Whether a tracked page is still handed out by the kernel allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OfflineState {
    #[default]
    Online,
    Offline,
    OfflineFailed,
}

impl OfflineState {
    pub fn as_str(self) -> &'static str {
        match self {
            OfflineState::Online => "online",
            OfflineState::Offline => "offline",
            OfflineState::OfflineFailed => "offline-failed",
        }
    }
}
