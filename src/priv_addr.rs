// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Priv address decoding and context-image offset translation.
//!
//! Debugger register operations name priv addresses, which may be unicast
//! or broadcast aliases of replicated GPC/TPC/PPC/ROP/LTC/FBPA blocks.
//! This module decodes an address into its domain, expands broadcast
//! aliases into the enabled unicast instances, and, for channels that are
//! not resident on the engine, translates a unicast address into the byte
//! offset of its saved copy inside the context image (or the HWPM buffer).
//!
//! The context image is walked through its headers: a magic-stamped main
//! header giving the GPC count, then a system segment, then one segment per
//! GPC whose local header gives its TPC and PPC counts. Registers appear
//! inside a segment in the order of the chip's save lists.

use crate::channel::ChannelContext;
use crate::engine::GrEngine;
use crate::error::{GrError, Result};
use crate::mem::GpuBuffer;
use crate::regs::ctxsw_prog;
use alloc::vec::Vec;
use bitflags::bitflags;
use log::trace;

/// Register save lists, in context-image order.
pub struct CtxswRegLists {
    /// System (non-replicated) registers, absolute addresses.
    pub sys: &'static [u32],
    /// Per-GPC registers, offsets within a GPC block.
    pub gpc: &'static [u32],
    /// Per-TPC registers, offsets within a TPC block.
    pub tpc: &'static [u32],
    /// Per-PPC registers, offsets within a PPC block.
    pub ppc: &'static [u32],
    /// Registers saved into the HWPM buffer, absolute addresses.
    pub pm_sys: &'static [u32],
}

/// Replicated block a priv address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    /// Non-replicated register.
    Sys,
    /// Per-GPC register outside the TPC/PPC sub-blocks.
    Gpc,
    /// Per-TPC register.
    Tpc,
    /// Per-PPC register.
    Ppc,
    /// Per-ROP register.
    Be,
    /// Per-LTC register.
    Ltcs,
    /// Per-FBPA register.
    Fbpa,
}

bitflags! {
    /// Broadcast dimensions of a decoded address.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BroadcastFlags: u32 {
        /// All GPCs.
        const GPC = 1 << 0;
        /// All TPCs of the addressed GPC(s).
        const TPC = 1 << 1;
        /// All ROPs.
        const BE = 1 << 2;
        /// All LTCs.
        const LTCS = 1 << 3;
        /// All FBPAs.
        const FBPA = 1 << 4;
    }
}

/// A decoded priv address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivAddr {
    /// Block kind.
    pub addr_type: AddrType,
    /// GPC index (unicast GPC-relative kinds only).
    pub gpc: u32,
    /// TPC/PPC/ROP/LTC/FBPA index within its parent.
    pub idx: u32,
    /// Register offset within the innermost block, or the absolute
    /// address for [`AddrType::Sys`].
    pub sub: u32,
    /// Broadcast dimensions.
    pub broadcast: BroadcastFlags,
}

fn in_range(addr: u32, base: u32, span: u32) -> bool {
    addr >= base && addr < base + span
}

const fn align256(x: u32) -> u32 {
    (x + 255) & !255
}

impl GrEngine<'_> {
    /// Classifies a priv address.
    pub fn decode_priv_addr(&self, addr: u32) -> PrivAddr {
        let t = &self.topology;
        let s = &t.strides;
        let none = BroadcastFlags::empty();

        if in_range(addr, s.ltc_base, t.ltc_count * s.ltc_stride) {
            let rem = addr - s.ltc_base;
            return PrivAddr {
                addr_type: AddrType::Ltcs,
                gpc: 0,
                idx: rem / s.ltc_stride,
                sub: rem % s.ltc_stride,
                broadcast: none,
            };
        }
        if in_range(addr, s.ltc_shared_base, s.ltc_stride) {
            return PrivAddr {
                addr_type: AddrType::Ltcs,
                gpc: 0,
                idx: 0,
                sub: addr - s.ltc_shared_base,
                broadcast: BroadcastFlags::LTCS,
            };
        }
        if in_range(addr, s.fbpa_base, t.fbpa_count * s.fbpa_stride) {
            let rem = addr - s.fbpa_base;
            return PrivAddr {
                addr_type: AddrType::Fbpa,
                gpc: 0,
                idx: rem / s.fbpa_stride,
                sub: rem % s.fbpa_stride,
                broadcast: none,
            };
        }
        if in_range(addr, s.fbpa_shared_base, s.fbpa_stride) {
            return PrivAddr {
                addr_type: AddrType::Fbpa,
                gpc: 0,
                idx: 0,
                sub: addr - s.fbpa_shared_base,
                broadcast: BroadcastFlags::FBPA,
            };
        }
        if in_range(addr, s.rop_base, t.rop_count * s.rop_stride) {
            let rem = addr - s.rop_base;
            return PrivAddr {
                addr_type: AddrType::Be,
                gpc: 0,
                idx: rem / s.rop_stride,
                sub: rem % s.rop_stride,
                broadcast: none,
            };
        }
        if in_range(addr, s.rop_shared_base, s.rop_stride) {
            return PrivAddr {
                addr_type: AddrType::Be,
                gpc: 0,
                idx: 0,
                sub: addr - s.rop_shared_base,
                broadcast: BroadcastFlags::BE,
            };
        }
        if in_range(addr, s.gpc_base, t.gpc_count * s.gpc_stride) {
            let rem = addr - s.gpc_base;
            let gpc = rem / s.gpc_stride;
            return self.decode_gpc_local(gpc, rem % s.gpc_stride, none);
        }
        if in_range(addr, s.gpc_shared_base, s.gpc_stride) {
            return self.decode_gpc_local(0, addr - s.gpc_shared_base, BroadcastFlags::GPC);
        }
        PrivAddr {
            addr_type: AddrType::Sys,
            gpc: 0,
            idx: 0,
            sub: addr,
            broadcast: none,
        }
    }

    fn decode_gpc_local(&self, gpc: u32, off: u32, broadcast: BroadcastFlags) -> PrivAddr {
        let s = &self.topology.strides;
        if in_range(
            off,
            s.tpc_in_gpc_base,
            self.topology.max_tpc_per_gpc * s.tpc_in_gpc_stride,
        ) {
            let rem = off - s.tpc_in_gpc_base;
            return PrivAddr {
                addr_type: AddrType::Tpc,
                gpc,
                idx: rem / s.tpc_in_gpc_stride,
                sub: rem % s.tpc_in_gpc_stride,
                broadcast,
            };
        }
        if in_range(off, s.tpc_in_gpc_shared_base, s.tpc_in_gpc_stride) {
            return PrivAddr {
                addr_type: AddrType::Tpc,
                gpc,
                idx: 0,
                sub: off - s.tpc_in_gpc_shared_base,
                broadcast: broadcast | BroadcastFlags::TPC,
            };
        }
        let max_ppc = self.topology.ppc_count.iter().copied().max().unwrap_or(0);
        if in_range(off, s.ppc_in_gpc_base, max_ppc * s.ppc_in_gpc_stride) {
            let rem = off - s.ppc_in_gpc_base;
            return PrivAddr {
                addr_type: AddrType::Ppc,
                gpc,
                idx: rem / s.ppc_in_gpc_stride,
                sub: rem % s.ppc_in_gpc_stride,
                broadcast,
            };
        }
        PrivAddr {
            addr_type: AddrType::Gpc,
            gpc,
            idx: 0,
            sub: off,
            broadcast,
        }
    }

    fn tpc_unicast(&self, gpc: u32, tpc: u32, sub: u32) -> u32 {
        let s = &self.topology.strides;
        s.gpc_base + gpc * s.gpc_stride + s.tpc_in_gpc_base + tpc * s.tpc_in_gpc_stride + sub
    }

    fn gpc_unicast(&self, gpc: u32, sub: u32) -> u32 {
        let s = &self.topology.strides;
        s.gpc_base + gpc * s.gpc_stride + sub
    }

    fn ppc_unicast(&self, gpc: u32, ppc: u32, sub: u32) -> u32 {
        let s = &self.topology.strides;
        s.gpc_base + gpc * s.gpc_stride + s.ppc_in_gpc_base + ppc * s.ppc_in_gpc_stride + sub
    }

    /// Expands `addr` into the unicast addresses of every enabled
    /// instance it names. Unicast addresses expand to themselves.
    pub fn create_priv_addr_table(&self, addr: u32) -> Vec<u32> {
        let t = &self.topology;
        let s = &t.strides;
        let d = self.decode_priv_addr(addr);
        let mut table = Vec::new();
        match (d.addr_type, d.broadcast) {
            (AddrType::Tpc, b) if b.contains(BroadcastFlags::GPC | BroadcastFlags::TPC) => {
                for gpc in 0..t.gpc_count {
                    for tpc in 0..t.tpc_count[gpc as usize] {
                        table.push(self.tpc_unicast(gpc, tpc, d.sub));
                    }
                }
            }
            (AddrType::Tpc, b) if b.contains(BroadcastFlags::GPC) => {
                for gpc in 0..t.gpc_count {
                    if d.idx < t.tpc_count[gpc as usize] {
                        table.push(self.tpc_unicast(gpc, d.idx, d.sub));
                    }
                }
            }
            (AddrType::Tpc, b) if b.contains(BroadcastFlags::TPC) => {
                for tpc in 0..t.tpc_count[d.gpc as usize] {
                    table.push(self.tpc_unicast(d.gpc, tpc, d.sub));
                }
            }
            (AddrType::Gpc, b) if b.contains(BroadcastFlags::GPC) => {
                for gpc in 0..t.gpc_count {
                    table.push(self.gpc_unicast(gpc, d.sub));
                }
            }
            (AddrType::Ppc, b) if b.contains(BroadcastFlags::GPC) => {
                for gpc in 0..t.gpc_count {
                    if d.idx < t.ppc_count[gpc as usize] {
                        table.push(self.ppc_unicast(gpc, d.idx, d.sub));
                    }
                }
            }
            (AddrType::Be, b) if b.contains(BroadcastFlags::BE) => {
                for rop in 0..t.rop_count {
                    table.push(s.rop_base + rop * s.rop_stride + d.sub);
                }
            }
            (AddrType::Ltcs, b) if b.contains(BroadcastFlags::LTCS) => {
                for ltc in 0..t.ltc_count {
                    table.push(s.ltc_base + ltc * s.ltc_stride + d.sub);
                }
            }
            (AddrType::Fbpa, b) if b.contains(BroadcastFlags::FBPA) => {
                for fbpa in 0..t.fbpa_count {
                    table.push(s.fbpa_base + fbpa * s.fbpa_stride + d.sub);
                }
            }
            _ => table.push(addr),
        }
        table
    }

    /// Byte offset of `addr`'s saved copy inside a context image.
    ///
    /// `addr` must be unicast; broadcast aliases are expanded by the
    /// caller. LTC/FBPA/ROP registers are not context-switched and always
    /// miss.
    pub fn offset_in_context_image(&self, image: &GpuBuffer, addr: u32) -> Result<u32> {
        if image.read32(ctxsw_prog::MAIN_IMAGE_MAGIC_O) != ctxsw_prog::MAIN_IMAGE_MAGIC_VALUE {
            return Err(GrError::ContextMismatch);
        }
        let lists = self.chip.reg_lists();
        let d = self.decode_priv_addr(addr);
        let sys_data = ctxsw_prog::FECS_HEADER_BYTES + ctxsw_prog::LOCAL_HEADER_BYTES;

        if d.addr_type == AddrType::Sys {
            if image.read32(ctxsw_prog::FECS_HEADER_BYTES + ctxsw_prog::LOCAL_MAGIC_O)
                != ctxsw_prog::LOCAL_MAGIC_VALUE
            {
                return Err(GrError::ContextMismatch);
            }
            let idx = lists
                .sys
                .iter()
                .position(|&a| a == addr)
                .ok_or(GrError::PrivAddrNotFound(addr))?;
            return Ok(sys_data + idx as u32 * 4);
        }
        if !matches!(d.addr_type, AddrType::Gpc | AddrType::Tpc | AddrType::Ppc) {
            return Err(GrError::PrivAddrNotFound(addr));
        }

        let num_gpcs = image.read32(ctxsw_prog::MAIN_IMAGE_NUM_GPCS_O);
        if d.gpc >= num_gpcs {
            return Err(GrError::PrivAddrNotFound(addr));
        }
        // Walk the per-GPC segments; their sizes depend on each header.
        let mut seg = align256(sys_data + lists.sys.len() as u32 * 4);
        for _ in 0..d.gpc {
            let (_, _, size) = self.gpc_segment_layout(image, seg)?;
            seg += size;
        }
        let (num_tpcs, _num_ppcs, _) = self.gpc_segment_layout(image, seg)?;
        let data = seg + ctxsw_prog::LOCAL_HEADER_BYTES;
        let gpc_words = lists.gpc.len() as u32;
        let tpc_words = lists.tpc.len() as u32;

        let offset = match d.addr_type {
            AddrType::Gpc => {
                let idx = lists
                    .gpc
                    .iter()
                    .position(|&a| a == d.sub)
                    .ok_or(GrError::PrivAddrNotFound(addr))?;
                data + idx as u32 * 4
            }
            AddrType::Tpc => {
                if d.idx >= num_tpcs {
                    return Err(GrError::PrivAddrNotFound(addr));
                }
                let idx = lists
                    .tpc
                    .iter()
                    .position(|&a| a == d.sub)
                    .ok_or(GrError::PrivAddrNotFound(addr))?;
                data + (gpc_words + d.idx * tpc_words + idx as u32) * 4
            }
            AddrType::Ppc => {
                let idx = lists
                    .ppc
                    .iter()
                    .position(|&a| a == d.sub)
                    .ok_or(GrError::PrivAddrNotFound(addr))?;
                data + (gpc_words + num_tpcs * tpc_words) * 4
                    + (d.idx * lists.ppc.len() as u32 + idx as u32) * 4
            }
            _ => return Err(GrError::PrivAddrNotFound(addr)),
        };
        trace!("priv {addr:#x} -> image offset {offset:#x}");
        Ok(offset)
    }

    /// Reads one GPC segment header: `(num_tpcs, num_ppcs, segment_size)`.
    fn gpc_segment_layout(&self, image: &GpuBuffer, seg: u32) -> Result<(u32, u32, u32)> {
        if image.read32(seg + ctxsw_prog::LOCAL_MAGIC_O) != ctxsw_prog::LOCAL_MAGIC_VALUE {
            return Err(GrError::ContextMismatch);
        }
        let num_tpcs = image.read32(seg + ctxsw_prog::LOCAL_IMAGE_NUM_TPCS_O);
        let num_ppcs = image.read32(seg + ctxsw_prog::LOCAL_IMAGE_PPC_INFO_O) & 0xff;
        let lists = self.chip.reg_lists();
        let data_words = lists.gpc.len() as u32
            + num_tpcs * lists.tpc.len() as u32
            + num_ppcs * lists.ppc.len() as u32;
        Ok((
            num_tpcs,
            num_ppcs,
            ctxsw_prog::LOCAL_HEADER_BYTES + align256(data_words * 4),
        ))
    }

    /// Byte offset of `addr`'s saved copy in the HWPM buffer.
    pub fn offset_in_pm_buffer(&self, addr: u32) -> Result<u32> {
        let mut ctx = self.ctx.lock();
        let map = ctx.pm_map.get_or_insert_with(|| {
            let mut map: Vec<u32> = self.chip.reg_lists().pm_sys.to_vec();
            map.sort_unstable();
            map
        });
        match map.binary_search(&addr) {
            Ok(idx) => Ok(idx as u32 * 4),
            Err(_) => Err(GrError::PrivAddrNotFound(addr)),
        }
    }

    fn is_pm_addr(&self, addr: u32) -> bool {
        self.chip.reg_lists().pm_sys.contains(&addr)
    }
}

/// Direction of one context register operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOpKind {
    /// Read the current value.
    Read32,
    /// Write a new value.
    Write32,
}

/// One debugger register operation.
#[derive(Debug, Clone, Copy)]
pub struct CtxRegOp {
    /// Direction.
    pub kind: RegOpKind,
    /// Priv address, unicast or broadcast.
    pub addr: u32,
    /// Value to write, or the value read back.
    pub value: u32,
    /// Failure recorded for this op, if any.
    pub status: Option<GrError>,
}

impl CtxRegOp {
    /// A read of `addr`.
    pub fn read(addr: u32) -> Self {
        Self {
            kind: RegOpKind::Read32,
            addr,
            value: 0,
            status: None,
        }
    }

    /// A write of `value` to `addr`.
    pub fn write(addr: u32, value: u32) -> Self {
        Self {
            kind: RegOpKind::Write32,
            addr,
            value,
            status: None,
        }
    }
}

impl GrEngine<'_> {
    /// Executes debugger register operations against `ch`'s context.
    ///
    /// Broadcast addresses are expanded; writes go to every instance,
    /// reads return the first. A resident context is accessed through the
    /// registers, a saved one through its context image and HWPM buffer.
    /// Failures are per-op: the batch continues and the number of failed
    /// ops is returned.
    pub fn exec_ctx_ops(&self, ch: &mut ChannelContext, ops: &mut [CtxRegOp]) -> Result<u32> {
        self.disable_ctxsw()?;
        let resident = self.is_ctx_resident(ch);
        let mut failed = 0;
        for op in ops.iter_mut() {
            op.status = None;
            let targets = self.create_priv_addr_table(op.addr);
            let mut result = Ok(());
            for (i, &unicast) in targets.iter().enumerate() {
                result = if resident {
                    match op.kind {
                        RegOpKind::Read32 => {
                            if i == 0 {
                                op.value = self.mmio.read(unicast);
                            }
                            Ok(())
                        }
                        RegOpKind::Write32 => {
                            self.mmio.write(unicast, op.value);
                            Ok(())
                        }
                    }
                } else {
                    self.saved_ctx_rw(ch, unicast, op, i == 0)
                };
                if result.is_err() {
                    break;
                }
            }
            if let Err(err) = result {
                op.status = Some(err);
                failed += 1;
            }
        }
        self.enable_ctxsw()?;
        Ok(failed)
    }

    fn saved_ctx_rw(
        &self,
        ch: &mut ChannelContext,
        addr: u32,
        op: &mut CtxRegOp,
        first: bool,
    ) -> Result<()> {
        if self.is_pm_addr(addr) {
            if ch.pm_mode != ctxsw_prog::PM_MODE_CTXSW {
                return Err(GrError::ContextMismatch);
            }
            let offset = self.offset_in_pm_buffer(addr)?;
            let pm = ch.pm_ctx.as_mut().ok_or(GrError::ContextMismatch)?;
            match op.kind {
                RegOpKind::Read32 => {
                    if first {
                        op.value = pm.read32(offset);
                    }
                }
                RegOpKind::Write32 => pm.write32(offset, op.value),
            }
            return Ok(());
        }
        let image = ch.gr_ctx.clone().ok_or(GrError::ContextMismatch)?;
        let mut img = image.lock();
        let offset = self.offset_in_context_image(&img, addr)?;
        match op.kind {
            RegOpKind::Read32 => {
                if first {
                    op.value = img.read32(offset);
                }
            }
            RegOpKind::Write32 => img.write32(offset, op.value),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::Harness;
    use crate::regs;

    fn arm_ctxsw_ctrl(h: &Harness, count: usize) {
        for _ in 0..count {
            h.mmio.on_write(
                regs::FECS_METHOD_PUSH,
                regs::fecs_ctxsw_mailbox(1),
                regs::MAILBOX_VALUE_PASS,
            );
        }
    }

    /// Stamps valid headers into `image` for the harness topology (two
    /// GPCs with 2 and 1 TPCs, one PPC each).
    fn stamp_headers(gr: &crate::engine::GrEngine, image: &mut GpuBuffer) {
        image.write32(ctxsw_prog::MAIN_IMAGE_MAGIC_O, ctxsw_prog::MAIN_IMAGE_MAGIC_VALUE);
        image.write32(ctxsw_prog::MAIN_IMAGE_NUM_GPCS_O, gr.topology.gpc_count);
        image.write32(
            ctxsw_prog::FECS_HEADER_BYTES + ctxsw_prog::LOCAL_MAGIC_O,
            ctxsw_prog::LOCAL_MAGIC_VALUE,
        );
        let sys_len = gr.chip.reg_lists().sys.len() as u32;
        let mut seg = align256(
            ctxsw_prog::FECS_HEADER_BYTES + ctxsw_prog::LOCAL_HEADER_BYTES + sys_len * 4,
        );
        for gpc in 0..gr.topology.gpc_count {
            image.write32(seg + ctxsw_prog::LOCAL_MAGIC_O, ctxsw_prog::LOCAL_MAGIC_VALUE);
            image.write32(
                seg + ctxsw_prog::LOCAL_IMAGE_NUM_TPCS_O,
                gr.topology.tpc_count[gpc as usize],
            );
            image.write32(
                seg + ctxsw_prog::LOCAL_IMAGE_PPC_INFO_O,
                gr.topology.ppc_count[gpc as usize],
            );
            let (_, _, size) = gr.gpc_segment_layout(image, seg).unwrap();
            seg += size;
        }
    }

    #[test]
    fn decode_classifies_domains() {
        let h = Harness::new();
        let gr = h.engine();
        let d = gr.decode_priv_addr(regs::GR_FE_PD_TIMESLICE);
        assert_eq!(d.addr_type, AddrType::Sys);

        // TPC 1 of GPC 0: DBGR_CONTROL0.
        let addr = gr.tpc_unicast(0, 1, 0x610);
        let d = gr.decode_priv_addr(addr);
        assert_eq!(d.addr_type, AddrType::Tpc);
        assert_eq!((d.gpc, d.idx, d.sub), (0, 1, 0x610));
        assert!(d.broadcast.is_empty());

        // Broadcast alias of the same register.
        let d = gr.decode_priv_addr(crate::regs::sm::GPCS_TPCS_DBGR_CONTROL0);
        assert_eq!(d.addr_type, AddrType::Tpc);
        assert_eq!(d.sub, 0x610);
        assert!(d.broadcast.contains(BroadcastFlags::GPC | BroadcastFlags::TPC));

        let d = gr.decode_priv_addr(gr.topology.strides.ltc_shared_base + 0x20);
        assert_eq!(d.addr_type, AddrType::Ltcs);
        assert!(d.broadcast.contains(BroadcastFlags::LTCS));
    }

    #[test]
    fn broadcast_expansion_covers_enabled_units() {
        let h = Harness::new();
        let gr = h.engine();
        // 2 + 1 TPCs across the two GPCs.
        let table = gr.create_priv_addr_table(crate::regs::sm::GPCS_TPCS_DBGR_CONTROL0);
        assert_eq!(
            table,
            alloc::vec![
                gr.tpc_unicast(0, 0, 0x610),
                gr.tpc_unicast(0, 1, 0x610),
                gr.tpc_unicast(1, 0, 0x610),
            ]
        );
        // Unicast expands to itself.
        assert_eq!(
            gr.create_priv_addr_table(regs::GR_FE_PD_TIMESLICE),
            alloc::vec![regs::GR_FE_PD_TIMESLICE]
        );
        // LTC broadcast covers both LTCs.
        let s = &gr.topology.strides;
        assert_eq!(
            gr.create_priv_addr_table(s.ltc_shared_base + 0x20),
            alloc::vec![s.ltc_base + 0x20, s.ltc_base + s.ltc_stride + 0x20]
        );
    }

    #[test]
    fn image_lookup_walks_segments() {
        let h = Harness::new();
        let gr = h.engine();
        let mut image = GpuBuffer::new(0x4000, 0);
        stamp_headers(&gr, &mut image);

        // Sys register: third entry of the sys list.
        let off = gr
            .offset_in_context_image(&image, regs::GR_PD_AB_DIST_CFG0)
            .unwrap();
        assert_eq!(off, 512 + 2 * 4);

        // TPC register in GPC 1 (second segment, after GPC 0's 2 TPCs).
        let lists = gr.chip.reg_lists();
        let addr = gr.tpc_unicast(1, 0, 0x610);
        let off = gr.offset_in_context_image(&image, addr).unwrap();
        let sys_end = align256(512 + lists.sys.len() as u32 * 4);
        let gpc0_size = gr.gpc_segment_layout(&image, sys_end).unwrap().2;
        let gpc1_data = sys_end + gpc0_size + 256;
        let tpc_idx = lists.tpc.iter().position(|&a| a == 0x610).unwrap() as u32;
        assert_eq!(off, gpc1_data + (lists.gpc.len() as u32 + tpc_idx) * 4);
    }

    #[test]
    fn image_lookup_rejects_bad_magic_and_unknown_regs() {
        let h = Harness::new();
        let gr = h.engine();
        let mut image = GpuBuffer::new(0x4000, 0);
        assert!(matches!(
            gr.offset_in_context_image(&image, regs::GR_PD_AB_DIST_CFG0),
            Err(GrError::ContextMismatch)
        ));
        stamp_headers(&gr, &mut image);
        assert!(matches!(
            gr.offset_in_context_image(&image, 0x0040_0700),
            Err(GrError::PrivAddrNotFound(0x0040_0700))
        ));
        // TPC index beyond the segment's count.
        let addr = gr.tpc_unicast(1, 1, 0x610);
        assert!(gr.offset_in_context_image(&image, addr).is_err());
    }

    #[test]
    fn pm_lookup_uses_sorted_map() {
        let h = Harness::new();
        let gr = h.engine();
        assert_eq!(gr.offset_in_pm_buffer(0x001b_8004).unwrap(), 4);
        assert!(matches!(
            gr.offset_in_pm_buffer(0x001b_9999),
            Err(GrError::PrivAddrNotFound(_))
        ));
    }

    #[test]
    fn exec_ops_route_to_saved_image_when_not_resident() {
        let h = Harness::new();
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        h.arm_golden_path();
        let mut ch = h.channel(0, 1);
        gr.alloc_obj_ctx(&mut ch, None, crate::hal::CLASS_GRAPHICS)
            .unwrap();
        {
            let image = ch.gr_ctx.clone().unwrap();
            stamp_headers(&gr, &mut image.lock());
        }
        arm_ctxsw_ctrl(&h, 2);
        let live_writes = h.mmio.write_count(regs::GR_PD_AB_DIST_CFG0);
        let mut ops = [
            CtxRegOp::write(regs::GR_PD_AB_DIST_CFG0, 0x77),
            CtxRegOp::read(regs::GR_PD_AB_DIST_CFG0),
        ];
        assert_eq!(gr.exec_ctx_ops(&mut ch, &mut ops).unwrap(), 0);
        assert_eq!(ops[1].value, 0x77);
        // The live register was never touched.
        assert_eq!(h.mmio.write_count(regs::GR_PD_AB_DIST_CFG0), live_writes);
    }

    #[test]
    fn exec_ops_write_registers_when_resident() {
        let h = Harness::new();
        let gr = h.engine();
        let mut ch = h.channel(0, 1);
        let ptr = (ch.inst_ptr() >> regs::RAM_IN_BASE_SHIFT) as u32;
        h.mmio
            .set(regs::FECS_CURRENT_CTX, ptr | regs::CURRENT_CTX_VALID);
        arm_ctxsw_ctrl(&h, 2);
        // Broadcast write fans out to all three TPCs.
        let mut ops = [CtxRegOp::write(crate::regs::sm::GPCS_TPCS_DBGR_CONTROL0, 0x5)];
        assert_eq!(gr.exec_ctx_ops(&mut ch, &mut ops).unwrap(), 0);
        for (gpc, tpc) in [(0, 0), (0, 1), (1, 0)] {
            assert_eq!(h.mmio.get(gr.tpc_unicast(gpc, tpc, 0x610)), 0x5);
        }
    }

    #[test]
    fn exec_ops_record_per_op_failures() {
        let h = Harness::new();
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        gr.alloc_global_ctx_buffers().unwrap();
        h.arm_golden_path();
        let mut ch = h.channel(0, 1);
        gr.alloc_obj_ctx(&mut ch, None, crate::hal::CLASS_GRAPHICS)
            .unwrap();
        {
            let image = ch.gr_ctx.clone().unwrap();
            stamp_headers(&gr, &mut image.lock());
        }
        arm_ctxsw_ctrl(&h, 2);
        let mut ops = [
            // HWPM register while HWPM ctxsw is off.
            CtxRegOp::read(0x001b_8000),
            CtxRegOp::write(regs::GR_PD_AB_DIST_CFG0, 0x1),
        ];
        assert_eq!(gr.exec_ctx_ops(&mut ch, &mut ops).unwrap(), 1);
        assert_eq!(ops[0].status, Some(GrError::ContextMismatch));
        assert!(ops[1].status.is_none());
    }
}
