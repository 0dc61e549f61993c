// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! GPU-visible memory buffers and address-space mapping.
//!
//! Context images, patch buffers and the global circular buffers are all
//! [`GpuBuffer`]s: CPU-accessible word storage paired with a physical
//! address and zero or more per-address-space GPU virtual mappings.
//! Allocation goes through the [`GpuAllocator`] trait so the engine never
//! owns a memory manager.

use crate::error::{GrError, Result};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::mutex::SpinMutex;

/// Identifier of a GPU virtual address space (one per TSG/channel group).
pub type AsId = u32;

/// Cacheability hint for a GPU mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapFlags {
    /// Normal cacheable mapping.
    Cacheable,
    /// Bypass L2.
    Uncacheable,
}

/// A CPU-writable, GPU-mappable buffer.
pub struct GpuBuffer {
    /// Backing storage, in 32-bit words.
    pub words: Vec<u32>,
    /// Physical address of the backing pages.
    pub phys_addr: u64,
    mappings: Vec<(AsId, u64)>,
}

impl GpuBuffer {
    /// Creates a zeroed buffer of `size` bytes at `phys_addr`.
    pub fn new(size: usize, phys_addr: u64) -> Self {
        Self {
            words: vec![0; size.div_ceil(4)],
            phys_addr,
            mappings: Vec::new(),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.words.len() * 4
    }

    /// Reads the 32-bit word at byte offset `off`.
    pub fn read32(&self, off: u32) -> u32 {
        self.words[(off / 4) as usize]
    }

    /// Writes the 32-bit word at byte offset `off`.
    pub fn write32(&mut self, off: u32, value: u32) {
        self.words[(off / 4) as usize] = value;
    }

    /// Records a GPU virtual mapping in address space `asid`.
    pub fn add_mapping(&mut self, asid: AsId, gpu_va: u64) {
        self.mappings.push((asid, gpu_va));
    }

    /// Drops the mapping in address space `asid`, returning its VA.
    pub fn remove_mapping(&mut self, asid: AsId) -> Option<u64> {
        let i = self.mappings.iter().position(|&(a, _)| a == asid)?;
        Some(self.mappings.remove(i).1)
    }

    /// GPU virtual address of this buffer in address space `asid`.
    pub fn gpu_va(&self, asid: AsId) -> Option<u64> {
        self.mappings
            .iter()
            .find(|&&(a, _)| a == asid)
            .map(|&(_, va)| va)
    }

    /// GPU virtual address in `asid`, erroring when unmapped.
    pub fn require_va(&self, asid: AsId) -> Result<u64> {
        self.gpu_va(asid).ok_or(GrError::Resource)
    }
}

/// Buffer shared between the channels of a TSG.
pub type SharedBuffer = Arc<SpinMutex<GpuBuffer>>;

/// Wraps a buffer for TSG sharing.
pub fn shared(buf: GpuBuffer) -> SharedBuffer {
    Arc::new(SpinMutex::new(buf))
}

/// Allocation and mapping services the engine depends on.
pub trait GpuAllocator {
    /// Allocates `size` bytes of GPU-accessible system memory.
    fn alloc_sys(&self, size: usize) -> Result<GpuBuffer>;

    /// Maps `buf` into address space `asid` and records the mapping.
    fn map(&self, buf: &mut GpuBuffer, asid: AsId, flags: MapFlags) -> Result<u64>;

    /// Unmaps `buf` from address space `asid`. Unmapped buffers are ignored.
    fn unmap(&self, buf: &mut GpuBuffer, asid: AsId);
}

/// Simple system-memory allocator with bump-allocated physical pages and a
/// per-address-space bump VA mapper.
pub struct SysmemAllocator {
    state: SpinMutex<SysmemState>,
}

struct SysmemState {
    next_phys: u64,
    next_va: alloc::collections::BTreeMap<AsId, u64>,
}

/// Base of the VA range handed out per address space.
const VA_BASE: u64 = 0x0000_2000_0000;
/// Base of the physical range handed out.
const PHYS_BASE: u64 = 0x0001_0000_0000;

impl SysmemAllocator {
    /// Creates an allocator with empty address spaces.
    pub fn new() -> Self {
        Self {
            state: SpinMutex::new(SysmemState {
                next_phys: PHYS_BASE,
                next_va: alloc::collections::BTreeMap::new(),
            }),
        }
    }
}

impl Default for SysmemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuAllocator for SysmemAllocator {
    fn alloc_sys(&self, size: usize) -> Result<GpuBuffer> {
        if size == 0 {
            return Err(GrError::Resource);
        }
        let mut state = self.state.lock();
        let phys = state.next_phys;
        state.next_phys += (size as u64).next_multiple_of(0x1000);
        Ok(GpuBuffer::new(size, phys))
    }

    fn map(&self, buf: &mut GpuBuffer, asid: AsId, _flags: MapFlags) -> Result<u64> {
        if let Some(va) = buf.gpu_va(asid) {
            return Ok(va);
        }
        let mut state = self.state.lock();
        let next = state.next_va.entry(asid).or_insert(VA_BASE);
        let va = *next;
        *next += (buf.size() as u64).next_multiple_of(0x1000);
        buf.add_mapping(asid, va);
        Ok(va)
    }

    fn unmap(&self, buf: &mut GpuBuffer, asid: AsId) {
        buf.remove_mapping(asid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_round_up_to_words() {
        let buf = GpuBuffer::new(10, 0);
        assert_eq!(buf.size(), 12);
    }

    #[test]
    fn mapping_is_per_address_space() {
        let alloc = SysmemAllocator::new();
        let mut buf = alloc.alloc_sys(0x1000).unwrap();
        let va1 = alloc.map(&mut buf, 1, MapFlags::Cacheable).unwrap();
        let va2 = alloc.map(&mut buf, 2, MapFlags::Cacheable).unwrap();
        assert_eq!(buf.gpu_va(1), Some(va1));
        assert_eq!(buf.gpu_va(2), Some(va2));
        alloc.unmap(&mut buf, 1);
        assert_eq!(buf.gpu_va(1), None);
        assert_eq!(buf.gpu_va(2), Some(va2));
    }

    #[test]
    fn map_is_idempotent_per_asid() {
        let alloc = SysmemAllocator::new();
        let mut buf = alloc.alloc_sys(0x1000).unwrap();
        let va1 = alloc.map(&mut buf, 1, MapFlags::Cacheable).unwrap();
        let va2 = alloc.map(&mut buf, 1, MapFlags::Cacheable).unwrap();
        assert_eq!(va1, va2);
    }

    #[test]
    fn distinct_buffers_get_distinct_phys() {
        let alloc = SysmemAllocator::new();
        let a = alloc.alloc_sys(0x1000).unwrap();
        let b = alloc.alloc_sys(0x1000).unwrap();
        assert_ne!(a.phys_addr, b.phys_addr);
    }

    #[test]
    fn zero_size_alloc_fails() {
        let alloc = SysmemAllocator::new();
        assert!(alloc.alloc_sys(0).is_err());
    }
}
