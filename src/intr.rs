// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Interrupt dispatch.
//!
//! The stalling ISR reads the interrupt summary, resolves the channel that
//! owns the currently bound context (through a small lookup cache backed by
//! the fifo), and handles each pending cause: notify and semaphore wakeups,
//! trapped methods, class errors, FECS errors and the exception tree down
//! to individual SMs. Host fifo access to the engine is fenced off for the
//! duration of the ISR. Causes that leave the channel unusable post an
//! error notifier and hand the channel to fifo recovery.

use crate::engine::GrEngine;
use crate::error::Result;
use crate::fifo::ErrorNotifier;
use crate::regs;
use bitflags::bitflags;
use log::{debug, error, info, warn};

bitflags! {
    /// Pending causes in the stalling interrupt summary.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GrIntr: u32 {
        /// A notify method completed.
        const NOTIFY = 1 << 0;
        /// A semaphore was released.
        const SEMAPHORE = 1 << 1;
        /// A semaphore acquire timed out.
        const SEMAPHORE_TIMEOUT = 1 << 2;
        /// A method the hardware does not implement was trapped.
        const ILLEGAL_METHOD = 1 << 4;
        /// A method was sent to an unbound class.
        const ILLEGAL_CLASS = 1 << 5;
        /// An illegal notify was requested.
        const ILLEGAL_NOTIFY = 1 << 6;
        /// The ucode trapped a method for software handling.
        const FIRMWARE_METHOD = 1 << 8;
        /// The FECS falcon raised an error.
        const FECS_ERROR = 1 << 19;
        /// A method argument failed class validation.
        const CLASS_ERROR = 1 << 20;
        /// The exception summary has pending bits.
        const EXCEPTION = 1 << 21;
    }
}

/// Number of trapped-method subchannels.
const SUBCH_COUNT: u32 = 8;
/// Method field of the trapped address (word address).
const TRAPPED_ADDR_MTHD_MASK: u32 = 0xfff;
/// Subchannel field shift of the trapped address.
const TRAPPED_ADDR_SUBCH_SHIFT: u32 = 16;

/// FE pending bit of the exception summary.
const EXCEPTION_FE: u32 = 1 << 0;
/// MEMFMT pending bit of the exception summary.
const EXCEPTION_MEMFMT: u32 = 1 << 1;
/// DS pending bit of the exception summary.
const EXCEPTION_DS: u32 = 1 << 4;
/// GPC pending bit of the exception summary.
const EXCEPTION_GPC: u32 = 1 << 24;

/// Entries kept in the instance-pointer lookup cache.
const TLB_ENTRIES: usize = 8;

/// Cache of `instance pointer -> channel id` resolutions.
///
/// Fifo lookups walk the channel table; the ISR calls them on every
/// interrupt with almost always the same context bound, so hits are kept
/// here. Entries are replaced round-robin and evicted when a channel frees
/// its context.
pub(crate) struct ChannelTlb {
    entries: [Option<(u64, u32)>; TLB_ENTRIES],
    next: usize,
}

impl Default for ChannelTlb {
    fn default() -> Self {
        Self {
            entries: [None; TLB_ENTRIES],
            next: 0,
        }
    }
}

impl ChannelTlb {
    fn get(&self, inst_ptr: u64) -> Option<u32> {
        self.entries
            .iter()
            .flatten()
            .find(|&&(p, _)| p == inst_ptr)
            .map(|&(_, c)| c)
    }

    fn insert(&mut self, inst_ptr: u64, chid: u32) {
        if self.get(inst_ptr).is_some() {
            return;
        }
        self.entries[self.next] = Some((inst_ptr, chid));
        self.next = (self.next + 1) % TLB_ENTRIES;
    }

    /// Drops any entry for `inst_ptr`.
    pub fn evict(&mut self, inst_ptr: u64) {
        for entry in self.entries.iter_mut() {
            if matches!(entry, Some((p, _)) if *p == inst_ptr) {
                *entry = None;
            }
        }
    }
}

/// State the ISR gathers once per interrupt.
struct IsrData {
    /// Channel owning the bound context, when resolvable.
    chid: Option<u32>,
    /// Class bound on the trapped subchannel.
    class: u32,
    /// Trapped method byte address.
    method: u32,
    /// Trapped method data (low word).
    data: u32,
}

impl GrEngine<'_> {
    /// Stalling interrupt service routine.
    ///
    /// Returns true when a cause was fatal for the faulting channel and it
    /// was handed to recovery.
    pub fn isr(&self) -> bool {
        let pending = GrIntr::from_bits_truncate(self.mmio.read(regs::GR_INTR));
        if pending.is_empty() {
            return false;
        }
        // Fence host access to the engine while the trap state is read out.
        self.mmio.write(regs::GR_GPFIFO_CTL, 0);
        let isr = self.read_isr_data();
        let mut need_recovery = false;

        if pending.contains(GrIntr::NOTIFY) {
            if let Some(chid) = isr.chid {
                self.fifo.wake_notify(chid);
            }
        }
        if pending.contains(GrIntr::SEMAPHORE) {
            self.fifo.wake_semaphores();
        }
        if pending.contains(GrIntr::SEMAPHORE_TIMEOUT) {
            error!("semaphore timeout on channel {:?}", isr.chid);
            self.post_notifier(&isr, ErrorNotifier::GrSemaphoreTimeout);
            need_recovery = true;
        }
        if pending.contains(GrIntr::ILLEGAL_NOTIFY) {
            error!("illegal notify, method {:#x}", isr.method);
            self.post_notifier(&isr, ErrorNotifier::GrIllegalNotify);
            need_recovery = true;
        }
        if pending.intersects(GrIntr::ILLEGAL_METHOD | GrIntr::FIRMWARE_METHOD)
            && self.handle_trapped_method(&isr).is_err()
        {
            error!(
                "unhandled method {:#x} data {:#x} on class {:#x}",
                isr.method, isr.data, isr.class
            );
            self.post_notifier(&isr, ErrorNotifier::GrErrorSwNotify);
            need_recovery = true;
        }
        if pending.contains(GrIntr::ILLEGAL_CLASS) {
            error!("method on invalid class {:#x}", isr.class);
            self.post_notifier(&isr, ErrorNotifier::GrErrorSwNotify);
            need_recovery = true;
        }
        if pending.contains(GrIntr::CLASS_ERROR) {
            error!(
                "class {:#x} rejected method {:#x} data {:#x}",
                isr.class, isr.method, isr.data
            );
            self.post_notifier(&isr, ErrorNotifier::GrErrorSwNotify);
            need_recovery = true;
        }
        if pending.contains(GrIntr::FECS_ERROR) {
            error!("fecs error interrupt");
            self.dump_falcon_stats();
        }
        if pending.contains(GrIntr::EXCEPTION) && self.handle_exceptions(&isr) {
            self.post_notifier(&isr, ErrorNotifier::GrException);
            need_recovery = true;
        }

        self.mmio.write(regs::GR_INTR, pending.bits());
        if need_recovery {
            if let Some(chid) = isr.chid {
                self.fifo.recover_channel(chid);
            }
        }
        self.mmio.write(
            regs::GR_GPFIFO_CTL,
            regs::GPFIFO_CTL_ACCESS | regs::GPFIFO_CTL_SEMAPHORE_ACCESS,
        );
        need_recovery
    }

    /// Nonstalling interrupt service routine. Returns true when a trap was
    /// pending and semaphore waiters were woken.
    pub fn nonstall_isr(&self) -> bool {
        let pending = self.mmio.read(regs::GR_INTR_NONSTALL);
        if pending & regs::GR_INTR_NONSTALL_TRAP_PENDING == 0 {
            return false;
        }
        self.mmio.write(regs::GR_INTR_NONSTALL, pending);
        self.fifo.wake_semaphores();
        true
    }

    fn read_isr_data(&self) -> IsrData {
        let trapped = self.mmio.read(regs::GR_TRAPPED_ADDR);
        let method = (trapped & TRAPPED_ADDR_MTHD_MASK) << 2;
        let subch = (trapped >> TRAPPED_ADDR_SUBCH_SHIFT) % SUBCH_COUNT;
        let class = self.mmio.read(regs::fe_object_table(subch)) & 0xffff;
        let data = self.mmio.read(regs::GR_TRAPPED_DATA_LO);
        let cur = self.mmio.read(regs::FECS_CURRENT_CTX);
        let chid = if cur & regs::CURRENT_CTX_VALID != 0 {
            let inst_ptr = u64::from(cur & 0x0fff_ffff) << regs::RAM_IN_BASE_SHIFT;
            self.lookup_channel_cached(inst_ptr)
        } else {
            None
        };
        IsrData {
            chid,
            class,
            method,
            data,
        }
    }

    fn lookup_channel_cached(&self, inst_ptr: u64) -> Option<u32> {
        let mut tlb = self.ch_tlb.lock();
        if let Some(chid) = tlb.get(inst_ptr) {
            return Some(chid);
        }
        let chid = self.fifo.lookup_channel(inst_ptr);
        if let Some(chid) = chid {
            tlb.insert(inst_ptr, chid);
        } else {
            warn!("no channel owns bound context {inst_ptr:#x}");
        }
        chid
    }

    fn post_notifier(&self, isr: &IsrData, notifier: ErrorNotifier) {
        if let Some(chid) = isr.chid {
            self.fifo.set_error_notifier(chid, notifier);
        }
    }

    fn handle_trapped_method(&self, isr: &IsrData) -> Result<()> {
        debug!(
            "sw method {:#x} data {:#x} class {:#x}",
            isr.method, isr.data, isr.class
        );
        self.chip
            .handle_sw_method(self.mmio, isr.class, isr.method, isr.data)
    }

    /// Walks the exception summary. Returns true when something fatal for
    /// the current channel was found.
    fn handle_exceptions(&self, isr: &IsrData) -> bool {
        let exception = self.mmio.read(regs::GR_EXCEPTION);
        let mut fatal = false;
        if exception & EXCEPTION_FE != 0 {
            let esr = self.mmio.read(regs::GR_FE_HWW_ESR);
            error!("fe exception, esr {esr:#x}");
            self.mmio.write(regs::GR_FE_HWW_ESR, esr);
            fatal = true;
        }
        if exception & EXCEPTION_MEMFMT != 0 {
            let esr = self.mmio.read(regs::GR_MEMFMT_HWW_ESR);
            error!("memfmt exception, esr {esr:#x}");
            self.mmio.write(regs::GR_MEMFMT_HWW_ESR, esr);
            fatal = true;
        }
        if exception & EXCEPTION_DS != 0 {
            let esr = self.mmio.read(regs::GR_DS_HWW_ESR);
            error!("ds exception, esr {esr:#x}");
            self.mmio.write(regs::GR_DS_HWW_ESR, esr);
            fatal = true;
        }
        if exception & EXCEPTION_GPC != 0 {
            for gpc in 0..self.topology.gpc_count {
                if self.handle_gpc_exception(gpc, isr) {
                    fatal = true;
                }
            }
        }
        fatal
    }

    fn handle_gpc_exception(&self, gpc: u32, isr: &IsrData) -> bool {
        let gpc_offset = self.topology.offset_of_gpc(gpc);
        let exception = self.mmio.read(regs::gpc::GPCCS_GPC_EXCEPTION + gpc_offset);
        if exception == 0 {
            return false;
        }
        let mut fatal = false;
        let tpcs = (exception & regs::gpc::GPC_EXCEPTION_TPC_MASK)
            >> regs::gpc::GPC_EXCEPTION_TPC_SHIFT;
        for tpc in 0..self.topology.tpc_count[gpc as usize] {
            if tpcs & (1 << tpc) != 0 && self.handle_tpc_exception(gpc, tpc, isr) {
                fatal = true;
            }
        }
        fatal
    }

    fn handle_tpc_exception(&self, gpc: u32, tpc: u32, isr: &IsrData) -> bool {
        let offset = self.topology.offset_of(gpc, tpc);
        let exception = self.mmio.read(regs::gpc::TPCCS_TPC_EXCEPTION + offset);
        let mut fatal = false;
        if exception & regs::gpc::TPC_EXCEPTION_TEX_PENDING != 0 {
            // TEX exceptions are informational; nothing to reset.
            info!("tex exception on {gpc}/{tpc}");
        }
        if exception & regs::gpc::TPC_EXCEPTION_SM_PENDING != 0 {
            fatal = self.handle_sm_exception(gpc, tpc, isr);
        }
        fatal
    }

    /// Captures the SM's error registers, stops it, and decides whether
    /// the channel can survive. With a debugger attached the exception is
    /// delivered to the debugger instead of tearing the channel down.
    fn handle_sm_exception(&self, gpc: u32, tpc: u32, isr: &IsrData) -> bool {
        let offset = self.topology.offset_of(gpc, tpc);
        let global_esr = self.mmio.read(regs::sm::HWW_GLOBAL_ESR + offset);
        let warp_esr = self
            .chip
            .mask_hww_warp_esr(self.mmio.read(regs::sm::HWW_WARP_ESR + offset));
        error!("sm exception on {gpc}/{tpc}: global {global_esr:#x} warp {warp_esr:#x}");
        self.record_sm_error_state(gpc, tpc);

        let attached = self.sm_debugger_attached();
        if let Err(err) = self.lock_down_sm(gpc, tpc, global_esr, !attached) {
            error!("SM {gpc}/{tpc} did not lock down: {err}");
            return true;
        }
        // Acknowledge the status registers now that they are shadowed.
        self.mmio.write(regs::sm::HWW_GLOBAL_ESR + offset, global_esr);
        self.mmio.write(regs::sm::HWW_WARP_ESR + offset, 0);
        if attached {
            if let Some(chid) = isr.chid {
                self.fifo.post_debugger_event(chid);
            }
            return false;
        }
        self.resume_sm(gpc, tpc);
        warp_esr != 0 || global_esr != 0
    }
}
