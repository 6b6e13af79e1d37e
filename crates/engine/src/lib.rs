//! Per-page corrected memory error accounting.
//!
//! [`PageMonitor`] owns every piece of process-wide accounting state: the
//! bounded page table, the replacement-rate accountant, the effective
//! offline policy, and the trigger dispatcher. The embedding daemon builds
//! one monitor at startup and feeds it decoded machine-check events from
//! its single-threaded event loop via [`PageMonitor::account`].
//!
//! For each corrected error the monitor attributes the event to a page
//! record (inserting or evicting as needed), advances the page's leaky
//! bucket, and on a threshold crossing notifies the operator and asks the
//! kernel to offline the page according to the configured policy. A
//! crossing acts at most once per residency: once a page is offline (or
//! the offline failed), further events only keep accounting.

mod quirk;
mod replacement;

pub use replacement::ReplacementAccountant;

use common::{CeResult, PageConfig};
use offliner::{OfflineBackend, Offliner};
use std::io::{self, Write};
use table::PageTable;
use tracing::{info, warn};
use trigger::{Dispatcher, ExecMode, Notice, TriggerRunner, check_hook};
use types::{
    CpuFamily, DimmLocation, ErrorEvent, MciStatus, OfflinePolicy, OfflineState, PhysAddr,
};

/// The accounting engine. Generic over the sysfs backend and the hook
/// runner so tests can observe both side-effect channels.
#[derive(Debug)]
pub struct PageMonitor<B, R> {
    config: PageConfig,
    table: PageTable,
    replacements: ReplacementAccountant,
    offliner: Offliner<B>,
    dispatcher: Dispatcher<R>,
    cpu_family: CpuFamily,
}

impl<B: OfflineBackend, R: TriggerRunner> PageMonitor<B, R> {
    /// Build the monitor: validate configured hooks, probe the kernel
    /// offline interface (downgrading the policy if it is missing), and
    /// size the table.
    ///
    /// # Errors
    ///
    /// Returns `CeError::Trigger` when a configured hook path does not
    /// exist or is not executable; a misconfigured operator hook must not
    /// go unnoticed until the first crossing.
    pub fn new(
        config: PageConfig,
        cpu_family: CpuFamily,
        backend: B,
        runner: R,
    ) -> CeResult<Self> {
        for hook in [
            &config.memory_ce.trigger,
            &config.replacement.trigger,
            &config.pre_soft_trigger,
            &config.post_soft_trigger,
        ]
        .into_iter()
        .flatten()
        {
            check_hook(hook)?;
        }

        let offliner = Offliner::new(config.action, backend);
        let table = PageTable::with_capacity(config.max_counters);
        if table.capacity() != config.max_counters {
            info!(
                "rounded max corrected error counters up from {} to {}",
                config.max_counters,
                table.capacity()
            );
        }

        Ok(Self {
            table,
            replacements: ReplacementAccountant::new(),
            offliner,
            dispatcher: Dispatcher::new(runner),
            cpu_family,
            config,
        })
    }

    /// Effective offline policy after the startup probe.
    pub fn policy(&self) -> OfflinePolicy {
        self.offliner.policy()
    }

    pub fn table(&self) -> &PageTable {
        &self.table
    }

    pub fn replacements(&self) -> &ReplacementAccountant {
        &self.replacements
    }

    /// Account one decoded machine-check event.
    ///
    /// Uncorrected errors, events without a valid address, and known
    /// firmware-first duplicates are dropped without touching any state.
    pub fn account(&mut self, event: &ErrorEvent) {
        let policy = self.offliner.policy();
        if policy == OfflinePolicy::Off {
            return;
        }
        if !event.status.contains(MciStatus::ADDR_VALID)
            || event.status.contains(MciStatus::UNCORRECTED)
        {
            return;
        }
        if quirk::is_duplicate_apei(self.cpu_family, event) {
            return;
        }

        let addr = PhysAddr(event.addr).page_base();
        let t = event.timestamp;

        if self.table.contains(addr) {
            self.table.touch(addr);
        } else if !self.table.is_full() {
            self.table.insert(addr);
        } else {
            self.table.replace(addr);
            if self.replacements.record(&self.config.replacement, t) {
                let summary = self.replacements.bucket().summary(&self.config.replacement);
                self.dispatcher.dispatch(&Notice {
                    message: format!(
                        "Replacements of page correctable error counter exceed threshold {}",
                        summary
                    ),
                    cfg: &self.config.replacement,
                    bucket: self.replacements.bucket(),
                    total_count: self.replacements.count(),
                    last_event: t,
                    dimm: None,
                    hook: self.config.replacement.trigger.as_deref(),
                    args: Vec::new(),
                    mode: ExecMode::Async,
                });
            }
        }

        let Some(rec) = self.table.lookup_mut(addr) else {
            return;
        };
        rec.error_count += 1;
        if !rec.bucket.account(&self.config.memory_ce, 1, t) {
            return;
        }
        // Triggers and offlining happen once per residency; a page that is
        // already offline (or failed to go offline) only keeps counting.
        if rec.state != OfflineState::Online {
            return;
        }

        let summary = rec.bucket.summary(&self.config.memory_ce);
        let dimm = DimmLocation {
            socket_id: event.socket_id,
            channel: event.channel,
            dimm: event.dimm,
        };
        self.dispatcher.dispatch(&Notice {
            message: format!(
                "Corrected memory errors on page {:x} exceed threshold {}",
                addr, summary
            ),
            cfg: &self.config.memory_ce,
            bucket: &rec.bucket,
            total_count: rec.error_count,
            last_event: t,
            dimm: Some(dimm),
            hook: self.config.memory_ce.trigger.as_deref(),
            args: Vec::new(),
            mode: ExecMode::Async,
        });
        rec.triggered = true;

        // The pre/post hooks run synchronously around the offline so an
        // operator script can drain users of the page first. They receive
        // the page address as a positional argument.
        let soft_hooks = matches!(policy, OfflinePolicy::Soft | OfflinePolicy::SoftThenHard);
        let args = vec![addr.0.to_string()];
        if soft_hooks {
            self.dispatcher.dispatch(&Notice {
                message: format!("pre soft trigger run for page {:x}", addr),
                cfg: &self.config.memory_ce,
                bucket: &rec.bucket,
                total_count: rec.error_count,
                last_event: t,
                dimm: Some(dimm),
                hook: self.config.pre_soft_trigger.as_deref(),
                args: args.clone(),
                mode: ExecMode::Sync,
            });
        }

        if policy.acts() {
            match self.offliner.offline(addr) {
                Ok(()) => rec.state = OfflineState::Offline,
                Err(err) => {
                    warn!("offlining page {:#x} failed: {}", addr, err);
                    rec.state = OfflineState::OfflineFailed;
                }
            }
        }

        if soft_hooks {
            self.dispatcher.dispatch(&Notice {
                message: format!("post soft trigger run for page {:x}", addr),
                cfg: &self.config.memory_ce,
                bucket: &rec.bucket,
                total_count: rec.error_count,
                last_event: t,
                dimm: Some(dimm),
                hook: self.config.post_soft_trigger.as_deref(),
                args,
                mode: ExecMode::Sync,
            });
        }
    }

    /// Write one human-readable line per tracked page, in address order.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (i, rec) in self.table.iter().enumerate() {
            if i == 0 {
                writeln!(out, "Per page corrected memory statistics:")?;
            }
            writeln!(
                out,
                "{:x}: total {} seen \"{}\" {}{}",
                rec.addr,
                rec.error_count,
                rec.bucket.summary(&self.config.memory_ce),
                rec.state.as_str(),
                if rec.triggered { " triggered" } else { "" }
            )?;
        }
        Ok(())
    }
}
