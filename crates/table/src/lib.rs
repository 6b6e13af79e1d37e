//! Bounded store of per-page error records.
//!
//! The table maps physical page addresses to records, providing:
//! - O(log n) lookup through an ordered index (in-order iteration falls out
//!   for free, which is what the diagnostic dump wants)
//! - Bounded residency: at most `capacity()` records live at once
//! - Cheap eviction at cluster granularity
//!
//! Records are allocated in fixed-capacity clusters and the clusters, not
//! the records, carry the recency order: touching any member promotes the
//! whole cluster. When the table is full, the least-recently-used cluster
//! is recycled and replacements rotate through its slots one at a time.
//! Records in a recycled cluster stay live and indexed until their slot is
//! rotated over.
//!
//! # Example
//!
//! ```
//! use table::PageTable;
//! use types::PhysAddr;
//!
//! let mut table = PageTable::with_capacity(1024);
//! let rec = table.insert(PhysAddr(0x1000));
//! rec.error_count += 1;
//! assert!(table.contains(PhysAddr(0x1000)));
//! ```

#[cfg(test)]
mod tests;

use bucket::LeakyBucket;
use lru::LruCache;
use std::collections::BTreeMap;
use types::{OfflineState, PhysAddr};

/// Records per cluster. Clusters are sized so one stays within a 4 KiB
/// allocation.
pub const CLUSTER_SLOTS: usize = 56;

/// Accounting state for one tracked faulty page.
#[derive(Clone, Debug)]
pub struct PageRecord {
    pub addr: PhysAddr,
    pub state: OfflineState,
    /// Set on the first threshold crossing of this residency, never
    /// cleared before eviction.
    pub triggered: bool,
    /// Errors attributed to this page during its current residency.
    pub error_count: u64,
    pub bucket: LeakyBucket,
}

impl PageRecord {
    fn new(addr: PhysAddr) -> Self {
        Self {
            addr,
            state: OfflineState::Online,
            triggered: false,
            error_count: 0,
            bucket: LeakyBucket::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Cluster {
    slots: Vec<PageRecord>,
    /// Next slot to hand out; doubles as the rotation cursor once the
    /// cluster is recycled.
    used: usize,
}

#[derive(Clone, Copy, Debug)]
struct SlotRef {
    cluster: usize,
    slot: usize,
}

/// Address-indexed record store with cluster-granularity LRU replacement.
#[derive(Debug)]
pub struct PageTable {
    clusters: Vec<Cluster>,
    index: BTreeMap<u64, SlotRef>,
    /// Recency order over cluster ids; head is most recently used.
    recency: LruCache<usize, ()>,
    /// Cluster currently handing out slots.
    current: Option<usize>,
    capacity: usize,
}

impl PageTable {
    /// Create a table holding at most `max_counters` records, rounded up to
    /// a whole number of clusters.
    ///
    /// # Panics
    ///
    /// Panics if `max_counters` is 0.
    pub fn with_capacity(max_counters: usize) -> Self {
        assert!(max_counters > 0, "max_counters must be > 0");
        let capacity = max_counters.div_ceil(CLUSTER_SLOTS) * CLUSTER_SLOTS;
        Self {
            clusters: Vec::new(),
            index: BTreeMap::new(),
            recency: LruCache::unbounded(),
            current: None,
            capacity,
        }
    }

    /// Record limit after rounding.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn contains(&self, addr: PhysAddr) -> bool {
        self.index.contains_key(&addr.0)
    }

    pub fn lookup(&self, addr: PhysAddr) -> Option<&PageRecord> {
        let sr = self.index.get(&addr.0)?;
        Some(&self.clusters[sr.cluster].slots[sr.slot])
    }

    /// Lookup without promoting recency; callers that count an error should
    /// `touch` first.
    pub fn lookup_mut(&mut self, addr: PhysAddr) -> Option<&mut PageRecord> {
        let sr = *self.index.get(&addr.0)?;
        Some(&mut self.clusters[sr.cluster].slots[sr.slot])
    }

    /// Promote the cluster holding `addr` to most recently used. Idempotent
    /// when the cluster is already first; no-op for unknown addresses.
    pub fn touch(&mut self, addr: PhysAddr) {
        if let Some(sr) = self.index.get(&addr.0) {
            self.recency.promote(&sr.cluster);
        }
    }

    /// Add a fresh record for `addr`.
    ///
    /// The caller guarantees `addr` is page-aligned, absent, and that the
    /// table is not full. A new cluster is allocated when the current one
    /// has no free slot; replacement is never used as long as the table has
    /// room.
    pub fn insert(&mut self, addr: PhysAddr) -> &mut PageRecord {
        debug_assert!(addr.is_page_aligned());
        debug_assert!(!self.contains(addr));
        debug_assert!(!self.is_full());

        let cid = match self.current {
            Some(c) if self.clusters[c].used < CLUSTER_SLOTS => c,
            _ => {
                self.clusters.push(Cluster::default());
                self.clusters.len() - 1
            }
        };
        self.current = Some(cid);

        let cluster = &mut self.clusters[cid];
        let slot = cluster.used;
        cluster.used += 1;
        cluster.slots.push(PageRecord::new(addr));
        self.index.insert(addr.0, SlotRef { cluster: cid, slot });
        self.recency.push(cid, ());
        &mut self.clusters[cid].slots[slot]
    }

    /// Reuse a slot for `addr`, evicting whichever record occupies it.
    ///
    /// The caller guarantees the table is full and `addr` is absent. When
    /// the rotation cluster is exhausted, the least-recently-used cluster
    /// is recycled and rotation starts over at its first slot. The new
    /// residency starts fresh: state, flags, counters and bucket are all
    /// reinitialized.
    pub fn replace(&mut self, addr: PhysAddr) -> &mut PageRecord {
        debug_assert!(addr.is_page_aligned());
        debug_assert!(!self.contains(addr));
        debug_assert!(self.is_full());

        let mut cid = self.current.unwrap_or_default();
        if self.clusters[cid].used >= CLUSTER_SLOTS {
            if let Some((&lru_cid, _)) = self.recency.peek_lru() {
                cid = lru_cid;
                self.clusters[cid].used = 0;
            }
            self.current = Some(cid);
        }

        let cluster = &mut self.clusters[cid];
        let slot = cluster.used;
        cluster.used += 1;
        let evicted = cluster.slots[slot].addr;
        cluster.slots[slot] = PageRecord::new(addr);
        self.index.remove(&evicted.0);
        self.index.insert(addr.0, SlotRef { cluster: cid, slot });
        self.recency.promote(&cid);
        &mut self.clusters[cid].slots[slot]
    }

    /// Records in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &PageRecord> {
        self.index
            .values()
            .map(|sr| &self.clusters[sr.cluster].slots[sr.slot])
    }
}
