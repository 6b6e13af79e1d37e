//! Per-platform event suppression.

use types::{CpuFamily, ErrorEvent};

struct DuplicateApei {
    family: CpuFamily,
    bank: u8,
    cpu: u32,
}

/// On these platforms the firmware-first APEI path fabricates a duplicate
/// of corrected errors already reported by hardware, attributed to a fixed
/// CPU/bank tuple. Dropping that tuple deduplicates. Extending the quirk to
/// another platform is adding a row.
const DUPLICATE_APEI: &[DuplicateApei] = &[DuplicateApei {
    family: CpuFamily::SandyBridgeEp,
    bank: 1,
    cpu: 0,
}];

pub(crate) fn is_duplicate_apei(family: CpuFamily, event: &ErrorEvent) -> bool {
    DUPLICATE_APEI
        .iter()
        .any(|q| q.family == family && q.bank == event.bank && q.cpu == event.cpu)
}
