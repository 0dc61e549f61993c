// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Floorsweeping topology and priv-register stride arithmetic.
//!
//! The register space replicates per-GPC and per-TPC blocks at fixed
//! strides. [`Topology`] carries the enumerated unit counts and the chip's
//! strides and centralises every `base + gpc * stride + tpc * stride`
//! computation; nothing else in the engine does stride math by hand.

use crate::error::{GrError, Result};
use alloc::vec::Vec;

/// Maximum GPCs a topology may describe.
pub const MAX_GPC_COUNT: usize = 32;

/// Per-unit strides and base offsets of the priv register space.
#[derive(Debug, Clone, Copy)]
pub struct Strides {
    /// Byte offset of GPC 0's register block.
    pub gpc_base: u32,
    /// Distance between consecutive GPC blocks.
    pub gpc_stride: u32,
    /// Byte offset of TPC 0 within a GPC block.
    pub tpc_in_gpc_base: u32,
    /// Distance between consecutive TPC blocks.
    pub tpc_in_gpc_stride: u32,
    /// Byte offset of the TPC-broadcast block within a GPC block.
    pub tpc_in_gpc_shared_base: u32,
    /// Byte offset of PPC 0 within a GPC block.
    pub ppc_in_gpc_base: u32,
    /// Distance between consecutive PPC blocks.
    pub ppc_in_gpc_stride: u32,
    /// Byte offset of the ROP/BE 0 block.
    pub rop_base: u32,
    /// Distance between consecutive ROP/BE blocks.
    pub rop_stride: u32,
    /// Byte offset of the broadcast GPC block.
    pub gpc_shared_base: u32,
    /// Byte offset of the broadcast ROP block.
    pub rop_shared_base: u32,
    /// Byte offset of LTC 0's register block.
    pub ltc_base: u32,
    /// Distance between consecutive LTC blocks.
    pub ltc_stride: u32,
    /// Byte offset of the broadcast LTC block.
    pub ltc_shared_base: u32,
    /// Byte offset of FBPA 0's register block.
    pub fbpa_base: u32,
    /// Distance between consecutive FBPA blocks.
    pub fbpa_stride: u32,
    /// Byte offset of the broadcast FBPA block.
    pub fbpa_shared_base: u32,
}

impl Default for Strides {
    fn default() -> Self {
        Self {
            gpc_base: 0x0050_0000,
            gpc_stride: 0x8000,
            tpc_in_gpc_base: 0x4000,
            tpc_in_gpc_stride: 0x800,
            tpc_in_gpc_shared_base: 0x1800,
            ppc_in_gpc_base: 0x3000,
            ppc_in_gpc_stride: 0x200,
            rop_base: 0x0041_0000,
            rop_stride: 0x400,
            gpc_shared_base: 0x0041_8000,
            rop_shared_base: 0x0040_8800,
            ltc_base: 0x0014_0000,
            ltc_stride: 0x2000,
            ltc_shared_base: 0x0017_e000,
            fbpa_base: 0x0090_0000,
            fbpa_stride: 0x4000,
            fbpa_shared_base: 0x009b_0000,
        }
    }
}

/// Enumerated unit counts plus stride tables.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Number of enabled GPCs.
    pub gpc_count: u32,
    /// TPCs per GPC, indexed by GPC.
    pub tpc_count: Vec<u32>,
    /// PPCs per GPC, indexed by GPC.
    pub ppc_count: Vec<u32>,
    /// Number of ROP/BE units.
    pub rop_count: u32,
    /// Number of LTC units.
    pub ltc_count: u32,
    /// Number of FBPA units.
    pub fbpa_count: u32,
    /// Largest TPC count across GPCs.
    pub max_tpc_per_gpc: u32,
    /// Stride table.
    pub strides: Strides,
}

impl Topology {
    /// Builds a topology from unit counts, validating them.
    pub fn new(
        tpc_count: Vec<u32>,
        ppc_count: Vec<u32>,
        rop_count: u32,
        ltc_count: u32,
        fbpa_count: u32,
        strides: Strides,
    ) -> Result<Self> {
        let gpc_count = tpc_count.len() as u32;
        if gpc_count == 0 || gpc_count as usize > MAX_GPC_COUNT || ppc_count.len() != tpc_count.len()
        {
            return Err(GrError::ZeroGpcCount);
        }
        let max_tpc_per_gpc = tpc_count.iter().copied().max().unwrap_or(0);
        if max_tpc_per_gpc == 0 {
            return Err(GrError::ZeroGpcCount);
        }
        Ok(Self {
            gpc_count,
            tpc_count,
            ppc_count,
            rop_count,
            ltc_count,
            fbpa_count,
            max_tpc_per_gpc,
            strides,
        })
    }

    /// Total TPCs across all GPCs.
    pub fn total_tpc_count(&self) -> u32 {
        self.tpc_count.iter().sum()
    }

    /// Byte offset to add to a GPC-relative register for (`gpc`, `tpc`).
    pub fn offset_of(&self, gpc: u32, tpc: u32) -> u32 {
        let s = &self.strides;
        gpc * s.gpc_stride + tpc * s.tpc_in_gpc_stride
    }

    /// Byte offset to add to a GPC-relative register for `gpc` alone.
    pub fn offset_of_gpc(&self, gpc: u32) -> u32 {
        gpc * self.strides.gpc_stride
    }

    /// Absolute base of (`gpc`, `ppc`)'s PPC register block.
    pub fn ppc_base(&self, gpc: u32, ppc: u32) -> u32 {
        let s = &self.strides;
        s.gpc_base + gpc * s.gpc_stride + s.ppc_in_gpc_base + ppc * s.ppc_in_gpc_stride
    }

    /// Flat SM index assigned to (`gpc`, `tpc`).
    ///
    /// SM ids run GPC-major over the enabled units, matching the order the
    /// per-SM configuration is programmed during fs-state init.
    pub fn sm_id_of(&self, gpc: u32, tpc: u32) -> u32 {
        let mut id = 0;
        for g in 0..gpc {
            id += self.tpc_count[g as usize];
        }
        id + tpc
    }

    /// Inverse of [`Topology::sm_id_of`]: `(gpc, tpc)` for a flat SM index.
    pub fn gpc_tpc_of_sm(&self, sm_id: u32) -> Option<(u32, u32)> {
        let mut rest = sm_id;
        for (g, &tpcs) in self.tpc_count.iter().enumerate() {
            if rest < tpcs {
                return Some((g as u32, rest));
            }
            rest -= tpcs;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn topo() -> Topology {
        Topology::new(vec![2, 1], vec![1, 1], 2, 2, 1, Strides::default()).unwrap()
    }

    #[test]
    fn rejects_empty_topology() {
        assert!(matches!(
            Topology::new(vec![], vec![], 0, 0, 0, Strides::default()),
            Err(GrError::ZeroGpcCount)
        ));
        assert!(matches!(
            Topology::new(vec![0], vec![0], 1, 1, 1, Strides::default()),
            Err(GrError::ZeroGpcCount)
        ));
    }

    #[test]
    fn offsets_follow_strides() {
        let t = topo();
        assert_eq!(t.offset_of(0, 0), 0);
        assert_eq!(t.offset_of(1, 0), 0x8000);
        assert_eq!(t.offset_of(0, 1), 0x800);
        assert_eq!(t.offset_of(1, 1), 0x8800);
    }

    #[test]
    fn sm_ids_are_gpc_major() {
        let t = topo();
        assert_eq!(t.sm_id_of(0, 0), 0);
        assert_eq!(t.sm_id_of(0, 1), 1);
        assert_eq!(t.sm_id_of(1, 0), 2);
        assert_eq!(t.gpc_tpc_of_sm(1), Some((0, 1)));
        assert_eq!(t.gpc_tpc_of_sm(2), Some((1, 0)));
        assert_eq!(t.gpc_tpc_of_sm(3), None);
    }

    #[test]
    fn total_tpc_count_sums_gpcs() {
        assert_eq!(topo().total_tpc_count(), 3);
    }
}
