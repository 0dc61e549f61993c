// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! SM debugger support: stop/resume triggers, lock-down waits and the
//! per-SM error-state shadow.
//!
//! A debugger stops SMs with the stop trigger and then waits for each SM to
//! report lock-down. The wait tolerates outstanding warp errors the caller
//! asked to ignore, and fails fast when an MMU fault is pending while the
//! SM is not in debugger mode (the SM will never lock down then). Error
//! state captured at exception time is kept per SM and can be rewritten or
//! cleared by the debugger, going straight to the registers when the
//! channel is resident and through its patch buffer otherwise.

use crate::channel::ChannelContext;
use crate::engine::GrEngine;
use crate::error::{GrError, Result, TimeoutKind};
use crate::platform::PollTimer;
use crate::regs::sm;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, info, warn};

/// Snapshot of one SM's error registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmErrorState {
    /// Global error status.
    pub hww_global_esr: u32,
    /// Warp error status.
    pub hww_warp_esr: u32,
    /// Global error report mask.
    pub hww_global_esr_report_mask: u32,
    /// Warp error report mask.
    pub hww_warp_esr_report_mask: u32,
}

/// Debugger bookkeeping, one per engine.
pub(crate) struct DbgState {
    /// Per-SM error snapshots, indexed by flat SM id.
    pub error_states: Vec<SmErrorState>,
    /// Attached debugger sessions.
    pub sessions: u32,
}

impl DbgState {
    pub fn new(sm_count: usize) -> Self {
        Self {
            error_states: vec![SmErrorState::default(); sm_count],
            sessions: 0,
        }
    }

    /// Forgets all captured error state.
    pub fn reset_error_states(&mut self) {
        for state in self.error_states.iter_mut() {
            *state = SmErrorState::default();
        }
    }
}

impl GrEngine<'_> {
    /// Whether any debugger session is attached.
    pub fn sm_debugger_attached(&self) -> bool {
        self.dbg.lock().sessions > 0
    }

    /// Registers a debugger session.
    pub fn debugger_attach(&self) {
        let mut dbg = self.dbg.lock();
        dbg.sessions += 1;
        info!("debugger attached ({} sessions)", dbg.sessions);
    }

    /// Drops a debugger session.
    pub fn debugger_detach(&self) {
        let mut dbg = self.dbg.lock();
        dbg.sessions = dbg.sessions.saturating_sub(1);
    }

    /// Turns debugger mode on or off for every SM whose bit is set in
    /// `sms`.
    pub fn set_sm_debug_mode(&self, sms: u64, enable: bool) -> Result<()> {
        let value = if enable { sm::DBGR_CONTROL0_DEBUGGER_MODE } else { 0 };
        for sm_id in 0..self.topology.total_tpc_count() {
            if sms & (1 << sm_id) == 0 {
                continue;
            }
            let (gpc, tpc) = self
                .topology
                .gpc_tpc_of_sm(sm_id)
                .ok_or(GrError::Resource)?;
            let offset = self.topology.offset_of(gpc, tpc);
            self.mmio
                .modify(sm::DBGR_CONTROL0 + offset, sm::DBGR_CONTROL0_DEBUGGER_MODE, value);
        }
        Ok(())
    }

    /// Fires the stop trigger on one SM and waits for lock-down.
    pub fn lock_down_sm(
        &self,
        gpc: u32,
        tpc: u32,
        global_esr_mask: u32,
        check_errors: bool,
    ) -> Result<()> {
        let offset = self.topology.offset_of(gpc, tpc);
        debug!("locking down SM {gpc}/{tpc}");
        self.mmio.modify(
            sm::DBGR_CONTROL0 + offset,
            sm::DBGR_CONTROL0_STOP_TRIGGER,
            sm::DBGR_CONTROL0_STOP_TRIGGER,
        );
        self.wait_for_sm_lock_down(gpc, tpc, global_esr_mask, check_errors)
    }

    /// Waits for one SM to report lock-down.
    ///
    /// With `check_errors`, an SM with no unexpected error outstanding
    /// counts as done even without the locked-down bit (it had nothing to
    /// stop for). Errors covered by `global_esr_mask` are expected.
    pub fn wait_for_sm_lock_down(
        &self,
        gpc: u32,
        tpc: u32,
        global_esr_mask: u32,
        check_errors: bool,
    ) -> Result<()> {
        let offset = self.topology.offset_of(gpc, tpc);
        let mut timer = PollTimer::new(self.platform, true);
        loop {
            let status = self.mmio.read(sm::DBGR_STATUS0 + offset);
            let locked = status & sm::DBGR_STATUS0_LOCKED_DOWN != 0;
            let warp_esr = self
                .chip
                .mask_hww_warp_esr(self.mmio.read(sm::HWW_WARP_ESR + offset));
            let global_esr = self.mmio.read(sm::HWW_GLOBAL_ESR + offset);
            let no_error = warp_esr == 0 && global_esr & !global_esr_mask == 0;
            if locked || (check_errors && no_error) {
                debug!("SM {gpc}/{tpc} locked down, global_esr {global_esr:#x}");
                return Ok(());
            }
            let dbgr_mode = self.mmio.read(sm::DBGR_CONTROL0 + offset)
                & sm::DBGR_CONTROL0_DEBUGGER_MODE
                != 0;
            if !dbgr_mode && self.fifo.mmu_fault_pending() {
                warn!("SM {gpc}/{tpc}: MMU fault pending, SM will not lock down");
                return Err(GrError::MmuFault);
            }
            timer.check(TimeoutKind::LockDown)?;
            timer.wait();
        }
    }

    /// Releases one stopped SM.
    ///
    /// The stop trigger must be de-asserted in its own write before the
    /// run trigger is raised; the SM ignores a run trigger that arrives
    /// while stop is still asserted.
    pub fn resume_sm(&self, gpc: u32, tpc: u32) {
        let offset = self.topology.offset_of(gpc, tpc);
        self.mmio
            .modify(sm::DBGR_CONTROL0 + offset, sm::DBGR_CONTROL0_STOP_TRIGGER, 0);
        self.mmio.modify(
            sm::DBGR_CONTROL0 + offset,
            sm::DBGR_CONTROL0_RUN_TRIGGER,
            sm::DBGR_CONTROL0_RUN_TRIGGER,
        );
    }

    /// Stops every SM and waits for all of them to lock down.
    pub fn suspend_all_sms(&self, global_esr_mask: u32, check_errors: bool) -> Result<()> {
        self.mmio.modify(
            sm::GPCS_TPCS_DBGR_CONTROL0,
            sm::DBGR_CONTROL0_STOP_TRIGGER,
            sm::DBGR_CONTROL0_STOP_TRIGGER,
        );
        for gpc in 0..self.topology.gpc_count {
            for tpc in 0..self.topology.tpc_count[gpc as usize] {
                self.wait_for_sm_lock_down(gpc, tpc, global_esr_mask, check_errors)?;
            }
        }
        Ok(())
    }

    /// Releases every SM at once. Stop is de-asserted before run, as in
    /// [`GrEngine::resume_sm`].
    pub fn resume_all_sms(&self) {
        self.mmio.modify(
            sm::GPCS_TPCS_DBGR_CONTROL0,
            sm::DBGR_CONTROL0_STOP_TRIGGER,
            0,
        );
        self.mmio.modify(
            sm::GPCS_TPCS_DBGR_CONTROL0,
            sm::DBGR_CONTROL0_RUN_TRIGGER,
            sm::DBGR_CONTROL0_RUN_TRIGGER,
        );
    }

    /// Captures the error registers of one SM into the shadow.
    pub(crate) fn record_sm_error_state(&self, gpc: u32, tpc: u32) {
        let offset = self.topology.offset_of(gpc, tpc);
        let sm_id = self.topology.sm_id_of(gpc, tpc) as usize;
        let state = SmErrorState {
            hww_global_esr: self.mmio.read(sm::HWW_GLOBAL_ESR + offset),
            hww_warp_esr: self.mmio.read(sm::HWW_WARP_ESR + offset),
            hww_global_esr_report_mask: self.mmio.read(sm::HWW_GLOBAL_ESR_REPORT_MASK + offset),
            hww_warp_esr_report_mask: self.mmio.read(sm::HWW_WARP_ESR_REPORT_MASK + offset),
        };
        let mut dbg = self.dbg.lock();
        if let Some(slot) = dbg.error_states.get_mut(sm_id) {
            *slot = state;
        }
    }

    /// Reads back the shadow for one SM.
    pub fn sm_error_state(&self, sm_id: u32) -> Result<SmErrorState> {
        self.dbg
            .lock()
            .error_states
            .get(sm_id as usize)
            .copied()
            .ok_or(GrError::Resource)
    }

    /// Overwrites one SM's error state, pushing the report masks to the
    /// hardware when `ch` is resident and into its patch buffer otherwise.
    pub fn update_sm_error_state(
        &self,
        ch: &mut ChannelContext,
        sm_id: u32,
        state: SmErrorState,
    ) -> Result<()> {
        let (gpc, tpc) = self
            .topology
            .gpc_tpc_of_sm(sm_id)
            .ok_or(GrError::Resource)?;
        let offset = self.topology.offset_of(gpc, tpc);
        self.disable_ctxsw()?;
        let result = (|| {
            if let Some(slot) = self.dbg.lock().error_states.get_mut(sm_id as usize) {
                *slot = state;
            }
            if self.is_ctx_resident(ch) {
                self.mmio
                    .write(sm::HWW_GLOBAL_ESR_REPORT_MASK + offset, state.hww_global_esr_report_mask);
                self.mmio
                    .write(sm::HWW_WARP_ESR_REPORT_MASK + offset, state.hww_warp_esr_report_mask);
            } else {
                let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
                let patch = ch.patch.as_mut().ok_or(GrError::ContextMismatch)?;
                patch.begin();
                patch.write(
                    sm::HWW_GLOBAL_ESR_REPORT_MASK + offset,
                    state.hww_global_esr_report_mask,
                )?;
                patch.write(
                    sm::HWW_WARP_ESR_REPORT_MASK + offset,
                    state.hww_warp_esr_report_mask,
                )?;
                patch.end(&mut image.lock(), ch.asid)?;
            }
            Ok(())
        })();
        self.enable_ctxsw()?;
        result
    }

    /// Clears one SM's error shadow; when `ch` is resident the hardware
    /// status registers are cleared too.
    pub fn clear_sm_error_state(&self, ch: &ChannelContext, sm_id: u32) -> Result<()> {
        let (gpc, tpc) = self
            .topology
            .gpc_tpc_of_sm(sm_id)
            .ok_or(GrError::Resource)?;
        let offset = self.topology.offset_of(gpc, tpc);
        self.disable_ctxsw()?;
        if let Some(slot) = self.dbg.lock().error_states.get_mut(sm_id as usize) {
            *slot = SmErrorState::default();
        }
        if self.is_ctx_resident(ch) {
            self.mmio.write(sm::HWW_GLOBAL_ESR + offset, 0);
            self.mmio.write(sm::HWW_WARP_ESR + offset, 0);
        }
        self.enable_ctxsw()
    }

    /// Debugger pre-inspection stop: parks non-resident channels off the
    /// runlist and locks down the SMs for a resident one. Returns the
    /// resident channel id, if any.
    pub fn suspend_contexts(&self, chs: &[ChannelContext]) -> Result<Option<u32>> {
        self.disable_ctxsw()?;
        let mut resident = None;
        for ch in chs {
            if self.is_ctx_resident(ch) {
                resident = Some(ch.chid);
            } else {
                self.fifo.disable_channel(ch.chid);
            }
        }
        let result = if resident.is_some() {
            self.suspend_all_sms(0, false)
        } else {
            Ok(())
        };
        self.enable_ctxsw()?;
        result.map(|_| resident)
    }

    /// Inverse of [`GrEngine::suspend_contexts`].
    pub fn resume_contexts(&self, chs: &[ChannelContext]) -> Result<()> {
        self.disable_ctxsw()?;
        let mut any_resident = false;
        for ch in chs {
            if self.is_ctx_resident(ch) {
                any_resident = true;
            } else {
                self.fifo.enable_channel(ch.chid);
            }
        }
        if any_resident {
            self.resume_all_sms();
        }
        self.enable_ctxsw()
    }
}
