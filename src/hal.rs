// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Chip-specific behaviour behind the [`ChipOps`] strategy trait.
//!
//! The engine core is chip-agnostic; everything that varies between GPU
//! generations (supported classes, the register/bundle replay tables used
//! while building the golden image, ZBC table programming, software-method
//! handling) lives in a [`ChipOps`] implementation. [`BaseChip`] covers the
//! first-generation part.

use crate::error::{GrError, Result};
use crate::mmio::Mmio;
use crate::priv_addr::CtxswRegLists;
use crate::regs;
use crate::topology::Topology;
use crate::zbc::{ZbcColorEntry, ZbcDepthEntry};

/// One register write in a context-load replay table.
#[derive(Debug, Clone, Copy)]
pub struct RegOp {
    /// Register to write.
    pub addr: u32,
    /// Value to write.
    pub value: u32,
}

/// One bundle in the pipe bundle-init table.
#[derive(Debug, Clone, Copy)]
pub struct BundleOp {
    /// Bundle address.
    pub addr: u32,
    /// Bundle data.
    pub value: u32,
}

/// Sizes of the per-GPU global context buffers.
#[derive(Debug, Clone, Copy)]
pub struct GlobalBufferSizes {
    /// Circular buffer bytes.
    pub circular: usize,
    /// Page pool bytes.
    pub pagepool: usize,
    /// Attribute buffer bytes.
    pub attribute: usize,
    /// Priv access map bytes.
    pub priv_access_map: usize,
}

/// Per-chip strategy consulted by the engine core.
pub trait ChipOps {
    /// Whether `class` may be bound to the engine.
    fn is_valid_class(&self, class: u32) -> bool;

    /// Whether `class` is a compute class (gets the texlock patches).
    fn is_compute_class(&self, class: u32) -> bool;

    /// Register replay table applied before the golden save.
    fn sw_ctx_load(&self) -> &[RegOp];

    /// Bundle-init table streamed through the pipe during golden init.
    fn sw_bundle_init(&self) -> &[BundleOp];

    /// Method-init table replayed into the MME shadow RAM.
    fn sw_method_init(&self) -> &[RegOp];

    /// Registers the ucode saves into the context and HWPM images, in
    /// image order.
    fn reg_lists(&self) -> &CtxswRegLists;

    /// Programs floorsweeping-dependent state (SM ids and unit counts).
    fn init_fs_state(&self, mmio: &dyn Mmio, topo: &Topology);

    /// Sizes of the global context buffers for `topo`.
    fn global_buffer_sizes(&self, topo: &Topology) -> GlobalBufferSizes;

    /// Programs one color entry into hardware slot `index`.
    fn add_zbc_color_hw(&self, mmio: &dyn Mmio, index: u32, entry: &ZbcColorEntry);

    /// Programs one depth entry into hardware slot `index`.
    fn add_zbc_depth_hw(&self, mmio: &dyn Mmio, index: u32, entry: &ZbcDepthEntry);

    /// Hands the updated ZBC tables to the PMU for save/restore across
    /// railgate. No-op where there is no PMU involvement.
    fn pmu_save_zbc(&self, _entries_color: u32, _entries_depth: u32) {}

    /// Filters warp error bits the chip considers non-fatal.
    fn mask_hww_warp_esr(&self, esr: u32) -> u32 {
        esr
    }

    /// Handles a trapped method in software. Returns an error when the
    /// method is not recognised, which escalates to channel recovery.
    fn handle_sw_method(&self, mmio: &dyn Mmio, class: u32, method: u32, data: u32) -> Result<()>;
}

/// Graphics class handled by [`BaseChip`].
pub const CLASS_GRAPHICS: u32 = 0xa297;
/// Compute class handled by [`BaseChip`].
pub const CLASS_COMPUTE: u32 = 0xa0c0;
/// Inline-to-memory class.
pub const CLASS_INLINE_TO_MEMORY: u32 = 0xa040;
/// 2D class.
pub const CLASS_TWOD: u32 = 0x902d;
/// Copy-engine class.
pub const CLASS_DMA_COPY: u32 = 0xa0b5;

/// Software method: override shader exception report masks.
pub const METHOD_SET_SHADER_EXCEPTIONS: u32 = 0x1528;
/// Method data requesting exception reporting off.
pub const SHADER_EXCEPTIONS_DISABLE: u32 = 0;

static SW_CTX_LOAD: &[RegOp] = &[
    RegOp { addr: 0x0040_4604, value: 0x0000_0014 },
    RegOp { addr: 0x0040_5830, value: 0x0200_0000 },
    RegOp { addr: 0x0040_6024, value: 0x0000_0fff },
    RegOp { addr: 0x0040_8040, value: 0x0000_0101 },
];

static SW_BUNDLE_INIT: &[BundleOp] = &[
    BundleOp { addr: 0x0000_0064, value: 0x0000_0001 },
    BundleOp { addr: 0x0000_0171, value: 0x0000_0002 },
    BundleOp { addr: 0x0000_0958, value: 0x0000_0000 },
    // Past the go-idle threshold: forces an idle wait mid-stream.
    BundleOp { addr: 0x0000_fe65, value: 0x0000_0000 },
];

static SW_METHOD_INIT: &[RegOp] = &[
    RegOp { addr: 0x0000_0074, value: 0x0000_0000 },
    RegOp { addr: 0x0000_0075, value: 0x0000_0001 },
    RegOp { addr: 0x0000_0077, value: 0x0000_0001 },
];

static REG_LISTS: CtxswRegLists = CtxswRegLists {
    sys: &[
        regs::GR_FE_GO_IDLE_TIMEOUT,
        regs::GR_FE_PD_TIMESLICE,
        regs::GR_PD_AB_DIST_CFG0,
        regs::GR_SCC_BUNDLE_CB_BASE,
        regs::GR_SCC_BUNDLE_CB_SIZE,
    ],
    // Offsets within a GPC block.
    gpc: &[0x2c90, 0x2c94],
    // Offsets within a TPC block.
    tpc: &[0x0508, 0x050c, 0x0610, 0x0648, 0x0650, 0x0658, 0x065c],
    // Offsets within a PPC block.
    ppc: &[0x0000, 0x0004],
    pm_sys: &[0x001b_8000, 0x001b_8004, 0x001b_800c],
};

/// First-generation chip behaviour.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseChip;

impl ChipOps for BaseChip {
    fn is_valid_class(&self, class: u32) -> bool {
        matches!(
            class,
            CLASS_GRAPHICS | CLASS_COMPUTE | CLASS_INLINE_TO_MEMORY | CLASS_TWOD | CLASS_DMA_COPY
        )
    }

    fn is_compute_class(&self, class: u32) -> bool {
        class == CLASS_COMPUTE
    }

    fn sw_ctx_load(&self) -> &[RegOp] {
        SW_CTX_LOAD
    }

    fn sw_bundle_init(&self) -> &[BundleOp] {
        SW_BUNDLE_INIT
    }

    fn sw_method_init(&self) -> &[RegOp] {
        SW_METHOD_INIT
    }

    fn reg_lists(&self) -> &CtxswRegLists {
        &REG_LISTS
    }

    fn init_fs_state(&self, mmio: &dyn Mmio, topo: &Topology) {
        for gpc in 0..topo.gpc_count {
            for tpc in 0..topo.tpc_count[gpc as usize] {
                let sm_id = topo.sm_id_of(gpc, tpc);
                // sm_id low bits, gpc/tpc counts packed above.
                let cfg = sm_id
                    | (topo.tpc_count[gpc as usize] << 8)
                    | (topo.gpc_count << 16);
                mmio.write(regs::sm::CFG + topo.offset_of(gpc, tpc), cfg);
            }
        }
    }

    fn global_buffer_sizes(&self, topo: &Topology) -> GlobalBufferSizes {
        let tpcs = topo.total_tpc_count() as usize;
        GlobalBufferSizes {
            circular: 0x800 * 16 * tpcs,
            pagepool: 0x1000 * 8,
            attribute: 0x440 * 128 * tpcs,
            priv_access_map: 0x1000,
        }
    }

    fn add_zbc_color_hw(&self, mmio: &dyn Mmio, index: u32, entry: &ZbcColorEntry) {
        mmio.write(regs::ZBC_TABLE_INDEX, index);
        for (c, &word) in entry.color_ds.iter().enumerate() {
            mmio.write(regs::zbc_color_ds(c as u32), word);
        }
        for (c, &word) in entry.color_l2.iter().enumerate() {
            mmio.write(regs::zbc_color_l2(c as u32), word);
        }
        mmio.write(regs::ZBC_COLOR_FMT, entry.format);
    }

    fn add_zbc_depth_hw(&self, mmio: &dyn Mmio, index: u32, entry: &ZbcDepthEntry) {
        mmio.write(regs::ZBC_TABLE_INDEX, index);
        mmio.write(regs::ZBC_DEPTH_VALUE, entry.depth);
        mmio.write(regs::ZBC_L2_DEPTH, entry.depth);
        mmio.write(regs::ZBC_DEPTH_FMT, entry.format);
    }

    fn handle_sw_method(&self, mmio: &dyn Mmio, class: u32, method: u32, data: u32) -> Result<()> {
        if (class == CLASS_GRAPHICS || class == CLASS_COMPUTE)
            && method == METHOD_SET_SHADER_EXCEPTIONS
        {
            let mask = if data == SHADER_EXCEPTIONS_DISABLE {
                0
            } else {
                u32::MAX
            };
            mmio.write(regs::sm::GPCS_TPCS_HWW_WARP_ESR_REPORT_MASK, mask);
            mmio.write(regs::sm::GPCS_TPCS_HWW_GLOBAL_ESR_REPORT_MASK, mask);
            return Ok(());
        }
        Err(GrError::InvalidClass(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::fake::FakeMmio;
    use crate::topology::Strides;
    use alloc::vec;

    #[test]
    fn class_validation() {
        let chip = BaseChip;
        assert!(chip.is_valid_class(CLASS_GRAPHICS));
        assert!(chip.is_valid_class(CLASS_COMPUTE));
        assert!(!chip.is_valid_class(0xdead));
        assert!(chip.is_compute_class(CLASS_COMPUTE));
        assert!(!chip.is_compute_class(CLASS_GRAPHICS));
    }

    #[test]
    fn fs_state_programs_each_sm() {
        let chip = BaseChip;
        let mmio = FakeMmio::new();
        let topo = Topology::new(vec![2, 1], vec![1, 1], 1, 1, 1, Strides::default()).unwrap();
        chip.init_fs_state(&mmio, &topo);
        assert_eq!(mmio.get(regs::sm::CFG) & 0xff, 0);
        assert_eq!(mmio.get(regs::sm::CFG + topo.offset_of(0, 1)) & 0xff, 1);
        assert_eq!(mmio.get(regs::sm::CFG + topo.offset_of(1, 0)) & 0xff, 2);
    }

    #[test]
    fn shader_exception_method_writes_masks() {
        let chip = BaseChip;
        let mmio = FakeMmio::new();
        chip.handle_sw_method(&mmio, CLASS_COMPUTE, METHOD_SET_SHADER_EXCEPTIONS, 1)
            .unwrap();
        assert_eq!(mmio.get(regs::sm::GPCS_TPCS_HWW_WARP_ESR_REPORT_MASK), u32::MAX);
        assert!(chip
            .handle_sw_method(&mmio, CLASS_TWOD, METHOD_SET_SHADER_EXCEPTIONS, 1)
            .is_err());
        assert!(chip.handle_sw_method(&mmio, CLASS_GRAPHICS, 0x42, 0).is_err());
    }
}
