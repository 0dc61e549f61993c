// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Golden context image creation and per-channel loading.
//!
//! The first channel to bind an object class donates its context buffer:
//! the engine walks the hardware through a scripted init sequence, has the
//! ucode save the resulting state, and keeps a CPU copy (the golden image).
//! Every later channel starts from that copy instead of re-running the
//! sequence. The golden copy itself always carries zcull disabled; live
//! channels get their own zcull and HWPM bindings applied on load or
//! through the explicit update entry points.

use crate::channel::ChannelContext;
use crate::engine::{CtxVars, GrEngine};
use crate::error::{GrError, Result, TimeoutKind};
use crate::mailbox::{CmpOp, FecsMethodOp, MailboxSpec};
use crate::platform::PollTimer;
use crate::regs::{self, ctxsw_prog};
use arrayvec::ArrayVec;
use log::info;

/// Register writes one commit pass can produce.
type CtxWrites = ArrayVec<(u32, u32), 8>;

/// Encodes an instance pointer the way FECS methods expect it.
fn fecs_current_ctx_data(inst_ptr: u64) -> u32 {
    ((inst_ptr >> regs::RAM_IN_BASE_SHIFT) as u32)
        | regs::CURRENT_CTX_TARGET_SYS_MEM
        | regs::CURRENT_CTX_VALID
}

impl GrEngine<'_> {
    /// Builds the golden image if it does not exist yet, using `ch`'s
    /// context buffer. Serialised with every other context operation.
    pub fn ensure_golden_image(&self, ch: &mut ChannelContext) -> Result<()> {
        let mut ctx = self.ctx.lock();
        if ctx.golden.is_some() {
            return Ok(());
        }
        info!("building golden context image on channel {}", ch.chid);
        let on_sim = self.platform.is_simulation();
        if !on_sim {
            self.set_fe_power_mode(true)?;
        }
        let result = self.build_golden_locked(&mut ctx, ch);
        if !on_sim {
            // Mirror of the force-on above; runs on the error path too.
            let restored = self.set_fe_power_mode(false);
            result.and(restored)
        } else {
            result
        }
    }

    fn build_golden_locked(&self, ctx: &mut CtxVars, ch: &mut ChannelContext) -> Result<()> {
        self.mmio
            .write(regs::FECS_CTXSW_RESET_CTL, regs::CTXSW_RESET_ASSERT);
        self.platform.delay_us(10);
        self.mmio
            .write(regs::FECS_CTXSW_RESET_CTL, regs::CTXSW_RESET_DEASSERT);
        self.mmio.write(regs::GR_SCC_INIT, regs::SCC_INIT_RAM_TRIGGER);

        self.bind_fecs_context(ch)?;

        for op in self.chip.sw_ctx_load() {
            self.mmio.write(op.addr, op.value);
        }
        self.mmio
            .write(regs::GR_FE_GO_IDLE_TIMEOUT, regs::FE_GO_IDLE_TIMEOUT_DISABLED);
        self.commit_global_locked(ctx, ch, false)?;
        self.commit_timeslice(ch, false)?;
        self.chip.init_fs_state(self.mmio, &self.topology);
        self.run_sw_bundle_init()?;
        self.mmio
            .write(regs::GR_FE_GO_IDLE_TIMEOUT, regs::FE_GO_IDLE_TIMEOUT_PROD);
        self.wait_idle()?;
        self.run_mme_method_init();
        // Per-SM error bookkeeping restarts with the new image.
        self.dbg.lock().reset_error_states();

        self.submit_fecs_method(
            FecsMethodOp {
                method: regs::fecs_method::WFI_GOLDEN_SAVE,
                data: fecs_current_ctx_data(ch.inst_ptr()),
                mailbox: MailboxSpec {
                    id: 0,
                    data: 0,
                    clr: !0,
                    ok: (CmpOp::Equal, regs::MAILBOX_VALUE_PASS),
                    fail: (CmpOp::Equal, regs::MAILBOX_VALUE_FAIL),
                },
            },
            false,
        )?;

        let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
        let mut golden = image.lock().words.clone();
        // The golden copy never context-switches zcull; live bindings are
        // applied per channel on load.
        golden[(ctxsw_prog::MAIN_IMAGE_ZCULL_O / 4) as usize] = ctxsw_prog::ZCULL_MODE_NO_CTXSW;
        golden[(ctxsw_prog::MAIN_IMAGE_ZCULL_PTR_O / 4) as usize] = 0;
        ctx.golden = Some(golden);

        self.mmio.write(regs::FECS_CURRENT_CTX, 0);
        info!("golden context image ready ({} bytes)", ctx.golden_size);
        Ok(())
    }

    /// Points FECS at `ch`'s instance block.
    fn bind_fecs_context(&self, ch: &ChannelContext) -> Result<()> {
        self.submit_fecs_method(
            FecsMethodOp {
                method: regs::fecs_method::BIND_POINTER,
                data: fecs_current_ctx_data(ch.inst_ptr()),
                mailbox: MailboxSpec {
                    id: 0,
                    data: 0,
                    clr: 0x30,
                    ok: (CmpOp::And, 0x10),
                    fail: (CmpOp::And, 0x20),
                },
            },
            false,
        )
        .map(|_| ())
    }

    /// Requests FE clocks forced on (or back to automatic) and waits for
    /// the handshake.
    fn set_fe_power_mode(&self, force: bool) -> Result<()> {
        let mode = if force {
            regs::FE_PWR_MODE_FORCE_ON
        } else {
            regs::FE_PWR_MODE_AUTO
        };
        self.mmio
            .write(regs::GR_FE_PWR_MODE, mode | regs::FE_PWR_MODE_REQ_SEND);
        let mut timer = PollTimer::new(self.platform, false);
        loop {
            if self.mmio.read(regs::GR_FE_PWR_MODE) & regs::FE_PWR_MODE_REQ_SEND == 0 {
                return Ok(());
            }
            timer.check(TimeoutKind::FeHandshake)?;
            timer.wait();
        }
    }

    /// Streams the chip's bundle-init table through the pipe.
    fn run_sw_bundle_init(&self) -> Result<()> {
        for bundle in self.chip.sw_bundle_init() {
            self.mmio.write(regs::GR_PIPE_BUNDLE_DATA, bundle.value);
            self.mmio.write(regs::GR_PIPE_BUNDLE_ADDRESS, bundle.addr);
            if bundle.addr >= regs::BUNDLE_GO_IDLE_THRESHOLD {
                self.wait_idle()?;
            }
        }
        self.wait_fe_idle()
    }

    /// Replays the method-init table into the MME shadow RAM. Consecutive
    /// entries with identical data elide the data write.
    fn run_mme_method_init(&self) {
        let mut last_data = None;
        for op in self.chip.sw_method_init() {
            if last_data != Some(op.value) {
                self.mmio.write(regs::GR_MME_SHADOW_RAW_DATA, op.value);
                last_data = Some(op.value);
            }
            self.mmio.write(
                regs::GR_MME_SHADOW_RAW_INDEX,
                op.addr | regs::MME_SHADOW_RAW_INDEX_WRITE_TRIGGER,
            );
        }
    }

    /// Copies the golden image into `ch`'s context buffer and stamps the
    /// per-channel header fields.
    pub fn load_golden_image(&self, ch: &mut ChannelContext) -> Result<()> {
        let ctx = self.ctx.lock();
        let golden = ctx.golden.as_ref().ok_or(GrError::ContextMismatch)?;
        let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
        {
            let mut img = image.lock();
            let n = golden.len().min(img.words.len());
            img.words[..n].copy_from_slice(&golden[..n]);
            img.write32(ctxsw_prog::MAIN_IMAGE_NUM_SAVE_OPS_O, 0);
            img.write32(ctxsw_prog::MAIN_IMAGE_NUM_RESTORE_OPS_O, 0);

            let globals = ctx.globals.as_ref().ok_or(GrError::Resource)?;
            match globals.priv_access_map.gpu_va(ch.asid) {
                Some(va) => {
                    img.write32(ctxsw_prog::MAIN_IMAGE_PRIV_ACCESS_MAP_ADDR_LO_O, va as u32);
                    img.write32(
                        ctxsw_prog::MAIN_IMAGE_PRIV_ACCESS_MAP_ADDR_HI_O,
                        (va >> 32) as u32,
                    );
                    img.write32(
                        ctxsw_prog::MAIN_IMAGE_PRIV_ACCESS_MAP_CONFIG_O,
                        ctxsw_prog::PRIV_ACCESS_MAP_MODE_USE_MAP,
                    );
                }
                None => img.write32(
                    ctxsw_prog::MAIN_IMAGE_PRIV_ACCESS_MAP_CONFIG_O,
                    ctxsw_prog::PRIV_ACCESS_MAP_MODE_ALLOW_ALL,
                ),
            }

            if self.platform.is_silicon() {
                let misc = img.read32(ctxsw_prog::MAIN_IMAGE_MISC_OPTIONS_O);
                img.write32(
                    ctxsw_prog::MAIN_IMAGE_MISC_OPTIONS_O,
                    misc & !ctxsw_prog::MISC_OPTIONS_VERIF_FEATURES_M,
                );
            }

            if let Some(patch) = ch.patch.as_ref() {
                let va = patch.gpu_va(ch.asid)?;
                img.write32(ctxsw_prog::MAIN_IMAGE_PATCH_COUNT_O, patch.count());
                img.write32(ctxsw_prog::MAIN_IMAGE_PATCH_ADR_LO_O, va as u32);
                img.write32(ctxsw_prog::MAIN_IMAGE_PATCH_ADR_HI_O, (va >> 32) as u32);
            }

            if ch.pm_mode == ctxsw_prog::PM_MODE_CTXSW {
                let pm = ch.pm_ctx.as_ref().ok_or(GrError::ContextMismatch)?;
                let va = pm.require_va(ch.asid)?;
                img.write32(ctxsw_prog::MAIN_IMAGE_PM_PTR_O, (va >> 8) as u32);
            }
            img.write32(ctxsw_prog::MAIN_IMAGE_PM_O, ch.pm_mode);

            img.write32(ctxsw_prog::MAIN_IMAGE_ZCULL_O, ch.zcull.mode);
            img.write32(
                ctxsw_prog::MAIN_IMAGE_ZCULL_PTR_O,
                (ch.zcull.gpu_va >> 8) as u32,
            );
        }
        drop(ctx);

        // Simulators restore from the image only when told to explicitly.
        if self.platform.is_simulation() {
            self.submit_fecs_method(
                FecsMethodOp {
                    method: regs::fecs_method::RESTORE_GOLDEN,
                    data: fecs_current_ctx_data(ch.inst_ptr()),
                    mailbox: MailboxSpec {
                        id: 0,
                        data: 0,
                        clr: !0,
                        ok: (CmpOp::Equal, regs::MAILBOX_VALUE_PASS),
                        fail: (CmpOp::Equal, regs::MAILBOX_VALUE_FAIL),
                    },
                },
                true,
            )?;
        }
        Ok(())
    }

    /// Programs the global buffer addresses, either through `ch`'s patch
    /// buffer or straight to the registers.
    pub(crate) fn commit_global_ctx_buffers(
        &self,
        ch: &mut ChannelContext,
        patched: bool,
    ) -> Result<()> {
        let writes = {
            let ctx = self.ctx.lock();
            self.global_buffer_writes(&ctx, ch)?
        };
        self.route_ctx_writes(ch, patched, &writes)
    }

    fn commit_global_locked(
        &self,
        ctx: &CtxVars,
        ch: &mut ChannelContext,
        patched: bool,
    ) -> Result<()> {
        let writes = self.global_buffer_writes(ctx, ch)?;
        self.route_ctx_writes(ch, patched, &writes)
    }

    /// Programs the scheduling timeslices.
    pub(crate) fn commit_timeslice(&self, ch: &mut ChannelContext, patched: bool) -> Result<()> {
        let mut writes = CtxWrites::new();
        writes.push((regs::GR_FE_PD_TIMESLICE, 0x0000_0800));
        writes.push((regs::GR_PD_AB_DIST_CFG0, 0x0000_0100));
        self.route_ctx_writes(ch, patched, &writes)
    }

    fn global_buffer_writes(&self, ctx: &CtxVars, ch: &ChannelContext) -> Result<CtxWrites> {
        let globals = ctx.globals.as_ref().ok_or(GrError::Resource)?;
        let cb = globals.circular.require_va(ch.asid)?;
        let pagepool = globals.pagepool.require_va(ch.asid)?;
        let attr = globals.attribute.require_va(ch.asid)?;
        let mut writes = CtxWrites::new();
        writes.push((regs::GR_SCC_BUNDLE_CB_BASE, (cb >> 8) as u32));
        writes.push((
            regs::GR_SCC_BUNDLE_CB_SIZE,
            (globals.circular.size() / 256) as u32 | 1 << 31,
        ));
        writes.push((regs::GR_GPCS_SETUP_BUNDLE_CB_BASE, (cb >> 8) as u32));
        writes.push((regs::GR_SCC_PAGEPOOL_BASE, (pagepool >> 8) as u32));
        writes.push((
            regs::GR_SCC_PAGEPOOL,
            (globals.pagepool.size() / 256) as u32 | 1 << 31,
        ));
        writes.push((regs::GR_GPCS_SETUP_ATTRIB_CB_BASE, (attr >> 12) as u32));
        Ok(writes)
    }

    fn route_ctx_writes(
        &self,
        ch: &mut ChannelContext,
        patched: bool,
        writes: &[(u32, u32)],
    ) -> Result<()> {
        if patched {
            let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
            let patch = ch.patch.as_mut().ok_or(GrError::ContextMismatch)?;
            patch.begin();
            for &(addr, value) in writes {
                patch.write(addr, value)?;
            }
            patch.end(&mut image.lock(), ch.asid)
        } else {
            for &(addr, value) in writes {
                self.mmio.write(addr, value);
            }
            Ok(())
        }
    }

    /// Binds (or unbinds) a zcull buffer to `ch`, updating its context
    /// image when one is already live.
    pub fn bind_zcull(&self, ch: &mut ChannelContext, mode: u32, gpu_va: u64) -> Result<()> {
        ch.zcull.mode = mode;
        ch.zcull.gpu_va = gpu_va;
        if ch.gr_ctx.is_none() || !ch.golden_loaded {
            // Applied when the golden image is loaded.
            return Ok(());
        }
        self.disable_ctxsw()?;
        let result = (|| {
            let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
            let mut img = image.lock();
            img.write32(ctxsw_prog::MAIN_IMAGE_ZCULL_O, mode);
            img.write32(ctxsw_prog::MAIN_IMAGE_ZCULL_PTR_O, (gpu_va >> 8) as u32);
            Ok(())
        })();
        self.enable_ctxsw()?;
        result
    }

    /// Switches HWPM context-switching on or off for `ch`, allocating the
    /// HWPM buffer on first enable.
    pub fn update_hwpm_ctxsw_mode(&self, ch: &mut ChannelContext, enable: bool) -> Result<()> {
        let desired = if enable {
            ctxsw_prog::PM_MODE_CTXSW
        } else {
            ctxsw_prog::PM_MODE_NO_CTXSW
        };
        if ch.pm_mode == desired {
            return Ok(());
        }
        if ch.gr_ctx.is_none() {
            return Err(GrError::ContextMismatch);
        }
        self.disable_ctxsw()?;
        let result = (|| {
            if enable {
                self.alloc_pm_ctx(ch)?;
            }
            let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
            let mut img = image.lock();
            img.write32(ctxsw_prog::MAIN_IMAGE_PM_O, desired);
            if enable {
                let pm = ch.pm_ctx.as_ref().ok_or(GrError::ContextMismatch)?;
                let va = pm.require_va(ch.asid)?;
                img.write32(ctxsw_prog::MAIN_IMAGE_PM_PTR_O, (va >> 8) as u32);
            } else {
                img.write32(ctxsw_prog::MAIN_IMAGE_PM_PTR_O, 0);
            }
            ch.pm_mode = desired;
            Ok(())
        })();
        self.enable_ctxsw()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::Harness;
    use crate::hal::{ChipOps, CLASS_GRAPHICS};
    use crate::mem::GpuAllocator;
    use alloc::vec;

    fn arm_ctxsw_ctrl(h: &Harness, count: usize) {
        for _ in 0..count {
            h.mmio.on_write(
                regs::FECS_METHOD_PUSH,
                regs::fecs_ctxsw_mailbox(1),
                regs::MAILBOX_VALUE_PASS,
            );
        }
    }

    /// Channel with image, patch and globals ready, golden already present.
    fn loaded_setup(h: &Harness) -> (crate::engine::GrEngine<'_>, crate::channel::ChannelContext) {
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        h.arm_golden_path();
        let mut ch = h.channel(0, 1);
        gr.alloc_obj_ctx(&mut ch, None, CLASS_GRAPHICS).unwrap();
        (gr, ch)
    }

    #[test]
    fn golden_image_is_built_once() {
        let h = Harness::new();
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        h.arm_golden_path();
        let mut a = h.channel(0, 1);
        gr.alloc_obj_ctx(&mut a, None, CLASS_GRAPHICS).unwrap();
        assert!(gr.ctx.lock().golden.is_some());
        // BIND + GOLDEN_SAVE, nothing else.
        assert_eq!(h.mmio.write_count(regs::FECS_METHOD_PUSH), 2);
        assert_eq!(h.mmio.get(regs::FECS_CURRENT_CTX), 0);

        // A second channel reuses the copy without touching the ucode.
        let mut b = h.channel(1, 2);
        gr.alloc_obj_ctx(&mut b, None, CLASS_GRAPHICS).unwrap();
        assert_eq!(h.mmio.write_count(regs::FECS_METHOD_PUSH), 2);
    }

    #[test]
    fn channels_load_byte_identical_images() {
        let h = Harness::new();
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        h.arm_golden_path();
        let mut a = h.channel(1, 1);
        let mut b = h.channel(2, 2);
        gr.alloc_obj_ctx(&mut a, None, CLASS_GRAPHICS).unwrap();
        gr.alloc_obj_ctx(&mut b, None, CLASS_GRAPHICS).unwrap();
        let ia = a.gr_ctx.clone().unwrap();
        let ib = b.gr_ctx.clone().unwrap();
        assert_eq!(ia.lock().words, ib.lock().words);
    }

    #[test]
    fn fe_power_handshake_is_skipped_on_simulation() {
        let h = Harness::new();
        // Not silicon, but bounded polls so a hang would still fail.
        let mut platform = crate::platform::fake::FakePlatform::default();
        platform.silicon = false;
        platform.simulation = true;
        let gr = crate::engine::GrEngine::new(
            &h.mmio,
            &platform,
            &h.fifo,
            &h.allocator,
            &h.chip,
            crate::topology::Topology::new(
                vec![1],
                vec![1],
                1,
                1,
                1,
                crate::topology::Strides::default(),
            )
            .unwrap(),
        );
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        h.arm_golden_path();
        // Simulation loads the golden image through the ucode.
        h.mmio.on_write_value(
            regs::FECS_METHOD_PUSH,
            regs::fecs_method::RESTORE_GOLDEN,
            regs::fecs_ctxsw_mailbox(0),
            regs::MAILBOX_VALUE_PASS,
        );
        let mut ch = h.channel(0, 1);
        gr.alloc_obj_ctx(&mut ch, None, CLASS_GRAPHICS).unwrap();
        assert_eq!(h.mmio.write_count(regs::GR_FE_PWR_MODE), 0);
    }

    #[test]
    fn fe_power_handshake_runs_on_silicon() {
        let h = Harness::new();
        let (_gr, _ch) = loaded_setup(&h);
        // Force-on then back to auto.
        assert_eq!(
            h.mmio.writes_to(regs::GR_FE_PWR_MODE),
            vec![
                regs::FE_PWR_MODE_FORCE_ON | regs::FE_PWR_MODE_REQ_SEND,
                regs::FE_PWR_MODE_AUTO | regs::FE_PWR_MODE_REQ_SEND,
            ]
        );
    }

    #[test]
    fn bundle_table_is_streamed_in_order() {
        let h = Harness::new();
        let (_gr, _ch) = loaded_setup(&h);
        let addrs: alloc::vec::Vec<u32> = h
            .chip
            .sw_bundle_init()
            .iter()
            .map(|b| b.addr)
            .collect();
        assert_eq!(h.mmio.writes_to(regs::GR_PIPE_BUNDLE_ADDRESS), addrs);
    }

    #[test]
    fn mme_method_init_elides_repeated_data() {
        let h = Harness::new();
        let (_gr, _ch) = loaded_setup(&h);
        // Three methods, but the last two share one data value.
        assert_eq!(h.mmio.write_count(regs::GR_MME_SHADOW_RAW_INDEX), 3);
        assert_eq!(h.mmio.write_count(regs::GR_MME_SHADOW_RAW_DATA), 2);
    }

    #[test]
    fn load_golden_stamps_headers() {
        let h = Harness::new();
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        // Hand-craft a golden copy with the verif bit set and a pattern.
        let mut golden = vec![0u32; 0x2000 / 4];
        golden[0] = ctxsw_prog::MAIN_IMAGE_MAGIC_VALUE;
        golden[(ctxsw_prog::MAIN_IMAGE_MISC_OPTIONS_O / 4) as usize] =
            ctxsw_prog::MISC_OPTIONS_VERIF_FEATURES_M;
        golden[0x400] = 0xdead_beef;
        gr.ctx.lock().golden = Some(golden);

        let mut ch = h.channel(0, 1);
        {
            let image = gr.alloc_gr_ctx().unwrap();
            gr.allocator
                .map(&mut image.lock(), 1, crate::mem::MapFlags::Cacheable)
                .unwrap();
            ch.gr_ctx = Some(image);
        }
        ch.patch = Some(gr.alloc_patch_ctx(1).unwrap());
        gr.map_global_ctx_buffers(&mut ch).unwrap();
        ch.patch.as_mut().unwrap().begin();
        ch.patch.as_mut().unwrap().write(0x10, 0x20).unwrap();

        gr.load_golden_image(&mut ch).unwrap();
        let image = ch.gr_ctx.clone().unwrap();
        let img = image.lock();
        assert_eq!(
            img.read32(ctxsw_prog::MAIN_IMAGE_MAGIC_O),
            ctxsw_prog::MAIN_IMAGE_MAGIC_VALUE
        );
        assert_eq!(img.words[0x400], 0xdead_beef);
        assert_eq!(img.read32(ctxsw_prog::MAIN_IMAGE_NUM_SAVE_OPS_O), 0);
        assert_eq!(img.read32(ctxsw_prog::MAIN_IMAGE_NUM_RESTORE_OPS_O), 0);
        // Verif features are stripped on silicon.
        assert_eq!(img.read32(ctxsw_prog::MAIN_IMAGE_MISC_OPTIONS_O), 0);
        assert_eq!(
            img.read32(ctxsw_prog::MAIN_IMAGE_PRIV_ACCESS_MAP_CONFIG_O),
            ctxsw_prog::PRIV_ACCESS_MAP_MODE_USE_MAP
        );
        assert_eq!(img.read32(ctxsw_prog::MAIN_IMAGE_PATCH_COUNT_O), 1);
        assert_eq!(
            img.read32(ctxsw_prog::MAIN_IMAGE_PM_O),
            ctxsw_prog::PM_MODE_NO_CTXSW
        );
    }

    #[test]
    fn pm_ctxsw_mode_without_buffer_fails_load() {
        let h = Harness::new();
        let (gr, mut ch) = loaded_setup(&h);
        ch.pm_mode = ctxsw_prog::PM_MODE_CTXSW;
        assert!(matches!(
            gr.load_golden_image(&mut ch),
            Err(GrError::ContextMismatch)
        ));
    }

    #[test]
    fn hwpm_enable_allocates_buffer_and_updates_image() {
        let h = Harness::new();
        let (gr, mut ch) = loaded_setup(&h);
        arm_ctxsw_ctrl(&h, 2);
        gr.update_hwpm_ctxsw_mode(&mut ch, true).unwrap();
        assert!(ch.pm_ctx.is_some());
        assert_eq!(ch.pm_mode, ctxsw_prog::PM_MODE_CTXSW);
        let image = ch.gr_ctx.clone().unwrap();
        assert_eq!(
            image.lock().read32(ctxsw_prog::MAIN_IMAGE_PM_O),
            ctxsw_prog::PM_MODE_CTXSW
        );
        assert!(image.lock().read32(ctxsw_prog::MAIN_IMAGE_PM_PTR_O) != 0);
        // No-op when already enabled.
        gr.update_hwpm_ctxsw_mode(&mut ch, true).unwrap();
        assert!(h.mmio.triggers_drained());
    }

    #[test]
    fn zcull_bind_updates_live_image() {
        let h = Harness::new();
        let (gr, mut ch) = loaded_setup(&h);
        arm_ctxsw_ctrl(&h, 2);
        gr.bind_zcull(&mut ch, ctxsw_prog::ZCULL_MODE_SEPARATE_BUFFER, 0x4000_0000)
            .unwrap();
        let image = ch.gr_ctx.clone().unwrap();
        let img = image.lock();
        assert_eq!(
            img.read32(ctxsw_prog::MAIN_IMAGE_ZCULL_O),
            ctxsw_prog::ZCULL_MODE_SEPARATE_BUFFER
        );
        assert_eq!(img.read32(ctxsw_prog::MAIN_IMAGE_ZCULL_PTR_O), 0x4000_0000 >> 8);
    }

    #[test]
    fn commit_global_buffers_can_patch() {
        let h = Harness::new();
        let (gr, mut ch) = loaded_setup(&h);
        let before = ch.patch.as_ref().unwrap().count();
        gr.commit_global_ctx_buffers(&mut ch, true).unwrap();
        // Six address/size writes landed in the patch buffer.
        assert_eq!(ch.patch.as_ref().unwrap().count(), before + 6);
        assert_eq!(h.mmio.write_count(regs::GR_SCC_BUNDLE_CB_BASE), 1);
    }
}
