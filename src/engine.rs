// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The context-switch engine core.
//!
//! [`GrEngine`] owns the serialised state shared by every component (FECS
//! access, golden image, ZBC tables, SM debug state, the ISR's channel
//! cache) and borrows its collaborators as trait objects. Component methods
//! are spread across the sibling modules; this module holds construction,
//! bring-up, the idle waits and the per-channel object-context lifecycle.

use crate::channel::{ChannelContext, TsgContext};
use crate::error::{GrError, Result, TimeoutKind};
use crate::fifo::FifoOps;
use crate::hal::ChipOps;
use crate::intr::ChannelTlb;
use crate::mem::{GpuAllocator, GpuBuffer, MapFlags};
use crate::mmio::Mmio;
use crate::platform::{Platform, PollTimer};
use crate::regs;
use crate::sm_debug::DbgState;
use crate::topology::Topology;
use crate::zbc::ZbcTables;
use alloc::vec::Vec;
use log::{debug, info};
use spin::mutex::SpinMutex;

/// The per-GPU global context buffers, shared by every channel.
pub(crate) struct GlobalBuffers {
    /// Circular buffer.
    pub circular: GpuBuffer,
    /// Page pool.
    pub pagepool: GpuBuffer,
    /// Attribute buffer.
    pub attribute: GpuBuffer,
    /// Priv access whitelist consulted by the ucode.
    pub priv_access_map: GpuBuffer,
}

/// Mutable engine-wide context state, behind one lock.
#[derive(Default)]
pub(crate) struct CtxVars {
    /// CPU copy of the golden context image, once saved.
    pub golden: Option<Vec<u32>>,
    /// Main image size in bytes, from size discovery.
    pub golden_size: usize,
    /// Zcull save region size in bytes.
    pub zcull_size: usize,
    /// HWPM save region size in bytes.
    pub pm_size: usize,
    /// Global buffers, once allocated.
    pub globals: Option<GlobalBuffers>,
    /// Nesting depth of `disable_ctxsw` brackets.
    pub ctxsw_disable_count: u32,
    /// Sorted HWPM register addresses, built on first lookup.
    pub pm_map: Option<Vec<u32>>,
}

/// Extra patches applied when a compute class binds: texture lock bypass.
static COMPUTE_PATCHES: &[(u32, u32)] = &[(0x0041_9ec8, 0x0000_0000), (0x0041_9ea8, 0x0000_0000)];

/// The graphics context-switch engine.
pub struct GrEngine<'d> {
    pub(crate) mmio: &'d dyn Mmio,
    pub(crate) platform: &'d dyn Platform,
    pub(crate) fifo: &'d dyn FifoOps,
    pub(crate) allocator: &'d dyn GpuAllocator,
    pub(crate) chip: &'d dyn ChipOps,
    pub(crate) topology: Topology,
    /// Serialises every FECS method submission.
    pub(crate) fecs_mutex: SpinMutex<()>,
    pub(crate) ctx: SpinMutex<CtxVars>,
    pub(crate) zbc: SpinMutex<ZbcTables>,
    pub(crate) dbg: SpinMutex<DbgState>,
    pub(crate) ch_tlb: SpinMutex<ChannelTlb>,
}

impl<'d> GrEngine<'d> {
    /// Builds an engine over its collaborators. SM error bookkeeping is
    /// sized from the topology.
    pub fn new(
        mmio: &'d dyn Mmio,
        platform: &'d dyn Platform,
        fifo: &'d dyn FifoOps,
        allocator: &'d dyn GpuAllocator,
        chip: &'d dyn ChipOps,
        topology: Topology,
    ) -> Self {
        let sm_count = topology.total_tpc_count() as usize;
        Self {
            mmio,
            platform,
            fifo,
            allocator,
            chip,
            topology,
            fecs_mutex: SpinMutex::new(()),
            ctx: SpinMutex::new(CtxVars::default()),
            zbc: SpinMutex::new(ZbcTables::default()),
            dbg: SpinMutex::new(DbgState::new(sm_count)),
            ch_tlb: SpinMutex::new(ChannelTlb::default()),
        }
    }

    /// Brings the engine up: boots the falcons, sizes the context images,
    /// allocates the global buffers and seeds the ZBC tables.
    pub fn init_support(
        &self,
        fecs_fw: &crate::falcon::Firmware,
        gpccs_fw: &crate::falcon::Firmware,
    ) -> Result<()> {
        info!("gr: bring-up start");
        self.load_ctxsw_ucode(fecs_fw, gpccs_fw)?;
        self.wait_ctxsw_ready()?;
        self.arm_fecs_watchdog()?;
        self.init_ctx_state()?;
        self.alloc_global_ctx_buffers()?;
        self.setup_hw();
        self.load_zbc_defaults()?;
        info!("gr: bring-up complete");
        Ok(())
    }

    /// Programs the non-context hardware state: interrupt enables and
    /// floorsweeping-dependent registers.
    pub(crate) fn setup_hw(&self) {
        // Clear then enable everything; the ISR filters.
        self.mmio.write(regs::GR_INTR, u32::MAX);
        self.mmio.write(regs::GR_EXCEPTION_EN, u32::MAX);
        self.chip.init_fs_state(self.mmio, &self.topology);
    }

    /// Waits for the engine to drain: not busy and no context switch in
    /// flight.
    pub fn wait_idle(&self) -> Result<()> {
        let mut timer = PollTimer::new(self.platform, true);
        loop {
            let busy = self.mmio.read(regs::GR_ENGINE_STATUS) & regs::ENGINE_STATUS_BUSY != 0;
            let ctxsw = self.mmio.read(regs::FECS_CTXSW_STATUS_1) & regs::CTXSW_STATUS_ACTIVE != 0;
            if !busy && !ctxsw {
                return Ok(());
            }
            timer.check(TimeoutKind::EngineIdle)?;
            timer.wait();
        }
    }

    /// Waits for the frontend alone to drain.
    pub fn wait_fe_idle(&self) -> Result<()> {
        let mut timer = PollTimer::new(self.platform, true);
        loop {
            if self.mmio.read(regs::GR_FE_STATUS) & regs::FE_STATUS_BUSY == 0 {
                return Ok(());
            }
            timer.check(TimeoutKind::FeIdle)?;
            timer.wait();
        }
    }

    /// Whether `ch`'s context is the one currently bound in FECS.
    pub fn is_ctx_resident(&self, ch: &ChannelContext) -> bool {
        let cur = self.mmio.read(regs::FECS_CURRENT_CTX);
        cur & regs::CURRENT_CTX_VALID != 0
            && u64::from(cur & 0x0fff_ffff) == ch.inst_ptr() >> regs::RAM_IN_BASE_SHIFT
    }

    /// Binds an object class to `ch`, building its context on first use.
    ///
    /// The first bind on a GPU also creates the golden image. Channels of a
    /// TSG share one context image; the first of them allocates it.
    pub fn alloc_obj_ctx(
        &self,
        ch: &mut ChannelContext,
        mut tsg: Option<&mut TsgContext>,
        class: u32,
    ) -> Result<()> {
        if !self.chip.is_valid_class(class) {
            return Err(GrError::InvalidClass(class));
        }
        ch.class = class;

        if ch.gr_ctx.is_none() {
            let shared = match tsg.as_deref_mut() {
                Some(t) if t.gr_ctx.is_some() => t.gr_ctx.clone(),
                _ => None,
            };
            let image = match shared {
                Some(image) => image,
                None => {
                    let image = self.alloc_gr_ctx()?;
                    if let Some(t) = tsg.as_deref_mut() {
                        t.gr_ctx = Some(image.clone());
                    }
                    image
                }
            };
            {
                let mut img = image.lock();
                let va = self.allocator.map(&mut img, ch.asid, MapFlags::Cacheable)?;
                ch.commit_inst(va);
            }
            ch.gr_ctx = Some(image);
        } else {
            let image = ch.gr_ctx.clone().ok_or(GrError::Resource)?;
            let va = image.lock().require_va(ch.asid)?;
            ch.commit_inst(va);
        }

        if ch.patch.is_none() {
            ch.patch = Some(self.alloc_patch_ctx(ch.asid)?);
        }

        if !ch.global_mapped {
            self.map_global_ctx_buffers(ch)?;
            self.commit_global_ctx_buffers(ch, true)?;
        }

        if self.chip.is_compute_class(class) {
            let image = ch.gr_ctx.clone().ok_or(GrError::Resource)?;
            let mut img = image.lock();
            let patch = ch.patch.as_mut().ok_or(GrError::Resource)?;
            patch.begin();
            for &(addr, value) in COMPUTE_PATCHES {
                patch.write(addr, value)?;
            }
            patch.end(&mut img, ch.asid)?;
        }

        self.ensure_golden_image(ch)?;
        if !ch.golden_loaded {
            self.load_golden_image(ch)?;
            ch.golden_loaded = true;
        }
        debug!("gr: channel {} bound class {class:#x}", ch.chid);
        Ok(())
    }

    /// Releases everything `alloc_obj_ctx` built for `ch`. Tolerates
    /// partially constructed contexts.
    pub fn free_channel_ctx(&self, ch: &mut ChannelContext) {
        self.unmap_global_ctx_buffers(ch);
        if let Some(mut patch) = ch.patch.take() {
            self.allocator.unmap(patch.buffer_mut(), ch.asid);
        }
        if let Some(mut pm) = ch.pm_ctx.take() {
            self.allocator.unmap(&mut pm, ch.asid);
        }
        if let Some(image) = ch.gr_ctx.take() {
            self.allocator.unmap(&mut image.lock(), ch.asid);
        }
        ch.class = 0;
        ch.golden_loaded = false;
        self.ch_tlb.lock().evict(ch.inst_ptr());
    }
}
