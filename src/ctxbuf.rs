// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Context buffer allocation and per-channel mapping.
//!
//! The engine owns one set of global buffers (circular buffer, page pool,
//! attribute buffer, priv access map) shared by all channels; each channel
//! additionally gets its own context image, patch buffer and, on demand, an
//! HWPM buffer. Sizes come from size discovery and the chip strategy.

use crate::channel::ChannelContext;
use crate::engine::{GlobalBuffers, GrEngine};
use crate::error::{GrError, Result};
use crate::mem::{shared, AsId, MapFlags, SharedBuffer};
use crate::patch::PatchContext;
use log::debug;

/// Patch buffer capacity, in (addr, value) entries.
pub const PATCH_CTX_ENTRIES: usize = 64;

impl GrEngine<'_> {
    /// Allocates the global context buffers. Idempotent.
    pub fn alloc_global_ctx_buffers(&self) -> Result<()> {
        let sizes = self.chip.global_buffer_sizes(&self.topology);
        let mut ctx = self.ctx.lock();
        if ctx.globals.is_some() {
            return Ok(());
        }
        let mut priv_access_map = self.allocator.alloc_sys(sizes.priv_access_map)?;
        // An all-ones map permits every priv address until a real whitelist
        // is loaded.
        for word in priv_access_map.words.iter_mut() {
            *word = !0;
        }
        ctx.globals = Some(GlobalBuffers {
            circular: self.allocator.alloc_sys(sizes.circular)?,
            pagepool: self.allocator.alloc_sys(sizes.pagepool)?,
            attribute: self.allocator.alloc_sys(sizes.attribute)?,
            priv_access_map,
        });
        debug!(
            "global ctx buffers: cb {:#x} pagepool {:#x} attr {:#x}",
            sizes.circular, sizes.pagepool, sizes.attribute
        );
        Ok(())
    }

    /// Maps the global buffers into `ch`'s address space.
    pub(crate) fn map_global_ctx_buffers(&self, ch: &mut ChannelContext) -> Result<()> {
        let mut ctx = self.ctx.lock();
        let globals = ctx.globals.as_mut().ok_or(GrError::Resource)?;
        self.allocator
            .map(&mut globals.circular, ch.asid, MapFlags::Cacheable)?;
        self.allocator
            .map(&mut globals.pagepool, ch.asid, MapFlags::Cacheable)?;
        self.allocator
            .map(&mut globals.attribute, ch.asid, MapFlags::Cacheable)?;
        self.allocator
            .map(&mut globals.priv_access_map, ch.asid, MapFlags::Uncacheable)?;
        ch.global_mapped = true;
        Ok(())
    }

    /// Unmaps the global buffers from `ch`'s address space.
    pub(crate) fn unmap_global_ctx_buffers(&self, ch: &mut ChannelContext) {
        if !ch.global_mapped {
            return;
        }
        let mut ctx = self.ctx.lock();
        if let Some(globals) = ctx.globals.as_mut() {
            self.allocator.unmap(&mut globals.circular, ch.asid);
            self.allocator.unmap(&mut globals.pagepool, ch.asid);
            self.allocator.unmap(&mut globals.attribute, ch.asid);
            self.allocator.unmap(&mut globals.priv_access_map, ch.asid);
        }
        ch.global_mapped = false;
    }

    /// Allocates a main context image sized by size discovery.
    pub(crate) fn alloc_gr_ctx(&self) -> Result<SharedBuffer> {
        let size = self.ctx.lock().golden_size;
        if size == 0 {
            return Err(GrError::Resource);
        }
        Ok(shared(self.allocator.alloc_sys(size)?))
    }

    /// Allocates and maps a patch buffer in `asid`.
    pub(crate) fn alloc_patch_ctx(&self, asid: AsId) -> Result<PatchContext> {
        let mut buf = self.allocator.alloc_sys(PATCH_CTX_ENTRIES * 8)?;
        self.allocator.map(&mut buf, asid, MapFlags::Cacheable)?;
        Ok(PatchContext::new(buf))
    }

    /// Allocates and maps `ch`'s HWPM buffer on first use.
    pub(crate) fn alloc_pm_ctx(&self, ch: &mut ChannelContext) -> Result<()> {
        if ch.pm_ctx.is_some() {
            return Ok(());
        }
        let size = self.ctx.lock().pm_size;
        if size == 0 {
            return Err(GrError::Resource);
        }
        let mut buf = self.allocator.alloc_sys(size)?;
        self.allocator.map(&mut buf, ch.asid, MapFlags::Cacheable)?;
        ch.pm_ctx = Some(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::tests::Harness;

    #[test]
    fn global_buffers_allocate_once() {
        let h = Harness::new();
        let gr = h.engine();
        gr.alloc_global_ctx_buffers().unwrap();
        let first = gr.ctx.lock().globals.as_ref().unwrap().circular.phys_addr;
        gr.alloc_global_ctx_buffers().unwrap();
        assert_eq!(
            gr.ctx.lock().globals.as_ref().unwrap().circular.phys_addr,
            first
        );
    }

    #[test]
    fn priv_access_map_defaults_to_allow_all() {
        let h = Harness::new();
        let gr = h.engine();
        gr.alloc_global_ctx_buffers().unwrap();
        let ctx = gr.ctx.lock();
        let map = &ctx.globals.as_ref().unwrap().priv_access_map;
        assert!(map.words.iter().all(|&w| w == !0));
    }

    #[test]
    fn mapping_is_per_channel() {
        let h = Harness::new();
        let gr = h.engine();
        gr.alloc_global_ctx_buffers().unwrap();
        let mut a = h.channel(0, 1);
        let mut b = h.channel(1, 2);
        gr.map_global_ctx_buffers(&mut a).unwrap();
        gr.map_global_ctx_buffers(&mut b).unwrap();
        gr.unmap_global_ctx_buffers(&mut a);
        let ctx = gr.ctx.lock();
        let globals = ctx.globals.as_ref().unwrap();
        assert_eq!(globals.circular.gpu_va(1), None);
        assert!(globals.circular.gpu_va(2).is_some());
    }

    #[test]
    fn gr_ctx_requires_discovered_size() {
        let h = Harness::new();
        let gr = h.engine();
        assert!(gr.alloc_gr_ctx().is_err());
        h.seed_ctx_sizes(&gr);
        assert!(gr.alloc_gr_ctx().is_ok());
    }

    #[test]
    fn pm_ctx_allocates_once() {
        let h = Harness::new();
        let gr = h.engine();
        h.seed_ctx_sizes(&gr);
        let mut ch = h.channel(0, 1);
        gr.alloc_pm_ctx(&mut ch).unwrap();
        let first = ch.pm_ctx.as_ref().unwrap().phys_addr;
        gr.alloc_pm_ctx(&mut ch).unwrap();
        assert_eq!(ch.pm_ctx.as_ref().unwrap().phys_addr, first);
        assert!(ch.pm_ctx.as_ref().unwrap().gpu_va(1).is_some());
    }
}
