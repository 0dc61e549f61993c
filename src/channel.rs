// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-channel and per-TSG context state.
//!
//! A channel owns its instance block, patch buffer and HWPM buffer; the main
//! context image is shared across the channels of a TSG. These types are
//! plain state carriers: the engine's `alloc_obj_ctx` path populates them
//! and the ISR consults them.

use crate::mem::{AsId, GpuBuffer, SharedBuffer};
use crate::patch::PatchContext;
use crate::regs::{ctxsw_prog, ram_in};

/// Zcull binding of a channel.
#[derive(Debug, Clone, Copy)]
pub struct ZcullCtx {
    /// One of the `ctxsw_prog::ZCULL_MODE_*` values.
    pub mode: u32,
    /// Separate-buffer GPU address, when the mode uses one.
    pub gpu_va: u64,
}

impl Default for ZcullCtx {
    fn default() -> Self {
        Self {
            mode: ctxsw_prog::ZCULL_MODE_NO_CTXSW,
            gpu_va: 0,
        }
    }
}

/// Time-sliced group sharing one graphics context.
#[derive(Default)]
pub struct TsgContext {
    /// Group id.
    pub tsgid: u32,
    /// Shared main context image, allocated by the first channel to bind.
    pub gr_ctx: Option<SharedBuffer>,
}

impl TsgContext {
    /// Creates an empty group.
    pub fn new(tsgid: u32) -> Self {
        Self {
            tsgid,
            gr_ctx: None,
        }
    }
}

/// Everything the engine tracks about one channel.
pub struct ChannelContext {
    /// Channel id.
    pub chid: u32,
    /// Address space the channel's buffers are mapped in.
    pub asid: AsId,
    /// Instance block (RAM_IN layout).
    pub inst: GpuBuffer,
    /// Bound object class, zero before `alloc_obj_ctx`.
    pub class: u32,
    /// Main context image (shared within a TSG).
    pub gr_ctx: Option<SharedBuffer>,
    /// Patch buffer.
    pub patch: Option<PatchContext>,
    /// HWPM context buffer.
    pub pm_ctx: Option<GpuBuffer>,
    /// One of the `ctxsw_prog::PM_MODE_*` values.
    pub pm_mode: u32,
    /// Zcull binding.
    pub zcull: ZcullCtx,
    /// Whether the global buffers are mapped in this channel's VA space.
    pub global_mapped: bool,
    /// Whether the golden image has been copied into `gr_ctx`.
    pub golden_loaded: bool,
}

impl ChannelContext {
    /// Creates a channel around its instance block.
    pub fn new(chid: u32, asid: AsId, inst: GpuBuffer) -> Self {
        Self {
            chid,
            asid,
            inst,
            class: 0,
            gr_ctx: None,
            patch: None,
            pm_ctx: None,
            pm_mode: ctxsw_prog::PM_MODE_NO_CTXSW,
            zcull: ZcullCtx::default(),
            global_mapped: false,
            golden_loaded: false,
        }
    }

    /// Physical address of the instance block, as exchanged with FECS.
    pub fn inst_ptr(&self) -> u64 {
        self.inst.phys_addr
    }

    /// Whether a context image has been bound.
    pub fn has_ctx(&self) -> bool {
        self.gr_ctx.is_some()
    }

    /// Points the instance block's graphics WFI words at the context image.
    pub fn commit_inst(&mut self, gr_ctx_va: u64) {
        let target = ram_in::GR_WFI_MODE_VIRTUAL | ((gr_ctx_va as u32) & !0xfff);
        self.inst.write32(ram_in::GR_WFI_TARGET_W * 4, target);
        self.inst
            .write32(ram_in::GR_WFI_PTR_HI_W * 4, (gr_ctx_va >> 32) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{GpuAllocator, SysmemAllocator};

    #[test]
    fn commit_inst_writes_wfi_words() {
        let alloc = SysmemAllocator::new();
        let inst = alloc.alloc_sys(0x1000).unwrap();
        let mut ch = ChannelContext::new(3, 1, inst);
        ch.commit_inst(0x1_2345_6000);
        assert_eq!(
            ch.inst.read32(ram_in::GR_WFI_TARGET_W * 4),
            ram_in::GR_WFI_MODE_VIRTUAL | 0x2345_6000
        );
        assert_eq!(ch.inst.read32(ram_in::GR_WFI_PTR_HI_W * 4), 1);
    }

    #[test]
    fn new_channel_has_no_context() {
        let alloc = SysmemAllocator::new();
        let inst = alloc.alloc_sys(0x1000).unwrap();
        let ch = ChannelContext::new(0, 0, inst);
        assert!(!ch.has_ctx());
        assert_eq!(ch.zcull.mode, ctxsw_prog::ZCULL_MODE_NO_CTXSW);
        assert_eq!(ch.pm_mode, ctxsw_prog::PM_MODE_NO_CTXSW);
    }
}
