// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Register map of the graphics engine.
//!
//! The register file is treated as an opaque 32-bit addressable space behind
//! the [`Mmio`](crate::mmio::Mmio) trait; only the offsets and the handful of
//! field values the engine actually programs are named here. Bit layouts
//! beyond these are out of scope.

/// FECS context-switch mailbox `i` (0..8).
pub const fn fecs_ctxsw_mailbox(i: u32) -> u32 {
    0x0040_9800 + i * 4
}

/// Write-to-clear companion of [`fecs_ctxsw_mailbox`].
pub const fn fecs_ctxsw_mailbox_clear(i: u32) -> u32 {
    0x0040_9840 + i * 4
}

/// Number of FECS mailboxes.
pub const FECS_MAILBOX_COUNT: u32 = 8;

/// FECS method argument register.
pub const FECS_METHOD_DATA: u32 = 0x0040_9500;
/// FECS method push (trigger) register.
pub const FECS_METHOD_PUSH: u32 = 0x0040_9504;
/// Currently bound context (instance pointer + valid bit).
pub const FECS_CURRENT_CTX: u32 = 0x0040_9b00;
/// FECS falcon CPU control.
pub const FECS_CPUCTL: u32 = 0x0040_9100;
/// FECS falcon DMA control (also exposes the scrub-pending bits).
pub const FECS_DMACTL: u32 = 0x0040_910c;
/// FECS IMEM port control (offset/block/auto-increment).
pub const FECS_IMEMC: u32 = 0x0040_9180;
/// FECS IMEM data port.
pub const FECS_IMEMD: u32 = 0x0040_9184;
/// FECS IMEM tag register.
pub const FECS_IMEMT: u32 = 0x0040_9188;
/// FECS DMEM port control.
pub const FECS_DMEMC: u32 = 0x0040_91c0;
/// FECS DMEM data port.
pub const FECS_DMEMD: u32 = 0x0040_91c4;
/// FECS configuration (IMEM size field in 256-byte blocks).
pub const FECS_CFG: u32 = 0x0040_9604;
/// Context-state reset control for both falcons.
pub const FECS_CTXSW_RESET_CTL: u32 = 0x0040_9614;
/// FECS context-switch status (engine busy / ctxsw-in-progress bits).
pub const FECS_CTXSW_STATUS_1: u32 = 0x0040_9400;
/// FECS falcon diagnostic: engine control.
pub const FECS_FALCON_ENGCTL: u32 = 0x0040_90a4;
/// FECS falcon diagnostic: current PC.
pub const FECS_FALCON_CURCTX_PC: u32 = 0x0040_90b0;

/// GPCCS falcon CPU control.
pub const GPCCS_CPUCTL: u32 = 0x0041_a100;
/// GPCCS falcon DMA control.
pub const GPCCS_DMACTL: u32 = 0x0041_a10c;
/// GPCCS IMEM port control (broadcast to all GPCs).
pub const GPCCS_IMEMC: u32 = 0x0041_a180;
/// GPCCS IMEM data port.
pub const GPCCS_IMEMD: u32 = 0x0041_a184;
/// GPCCS IMEM tag register.
pub const GPCCS_IMEMT: u32 = 0x0041_a188;
/// GPCCS DMEM port control.
pub const GPCCS_DMEMC: u32 = 0x0041_a1c0;
/// GPCCS DMEM data port.
pub const GPCCS_DMEMD: u32 = 0x0041_a1c4;
/// GPC0 configuration (GPCCS IMEM size field).
pub const GPC0_CFG: u32 = 0x0050_2604;

/// `require_ctx(0)` value written to a falcon DMACTL before start.
pub const DMACTL_REQUIRE_CTX_FALSE: u32 = 0;
/// Scrub-pending mask in a falcon DMACTL (IMEM | DMEM scrubbing).
pub const DMACTL_SCRUB_PENDING: u32 = 0x6;
/// `startcpu` bit of a falcon CPUCTL.
pub const CPUCTL_STARTCPU: u32 = 1;
/// IMEM/DMEM port config: offset 0, block 0, auto-increment on write.
pub const MEMC_AINCW: u32 = 1 << 24;

/// Method push values understood by the FECS ucode.
pub mod fecs_method {
    /// Bind the instance block in METHOD_DATA as the current context.
    pub const BIND_POINTER: u32 = 0x3;
    /// Save the current context as the golden image (waits for idle).
    pub const WFI_GOLDEN_SAVE: u32 = 0x9;
    /// Restore the golden image into the bound context (sim only).
    pub const RESTORE_GOLDEN: u32 = 0x15;
    /// Discover the size of the main context image.
    pub const DISCOVER_IMAGE_SIZE: u32 = 0x10;
    /// Discover the size of the zcull save region.
    pub const DISCOVER_ZCULL_IMAGE_SIZE: u32 = 0x16;
    /// Discover the size of the HWPM save region.
    pub const DISCOVER_PM_IMAGE_SIZE: u32 = 0x25;
    /// Stop processing context switches.
    pub const STOP_CTXSW: u32 = 0x38;
    /// Resume processing context switches.
    pub const START_CTXSW: u32 = 0x39;
    /// Halt the frontend pipeline.
    pub const HALT_PIPELINE: u32 = 0x4;
    /// Arm the FECS watchdog.
    pub const SET_WATCHDOG_TIMEOUT: u32 = 0x21;
}

/// Mailbox value the ucode posts on method success.
pub const MAILBOX_VALUE_PASS: u32 = 0x1;
/// Mailbox value the ucode posts on method failure.
pub const MAILBOX_VALUE_FAIL: u32 = 0x2;
/// Mailbox 0 value posted once falcon boot has completed.
pub const UCODE_HANDSHAKE_INIT_COMPLETE: u32 = 0xa5a5_a5a5;
/// `valid` bit of [`FECS_CURRENT_CTX`].
pub const CURRENT_CTX_VALID: u32 = 1 << 31;
/// Aperture field of [`FECS_CURRENT_CTX`] selecting system memory.
pub const CURRENT_CTX_TARGET_SYS_MEM: u32 = 1 << 28;
/// Instance pointers are exchanged with FECS shifted by this.
pub const RAM_IN_BASE_SHIFT: u32 = 12;

/// Top-level graphics interrupt status / reset.
pub const GR_INTR: u32 = 0x0040_0100;
/// Nonstall interrupt status / reset.
pub const GR_INTR_NONSTALL: u32 = 0x0040_0120;
/// Nonstall trap-pending bit.
pub const GR_INTR_NONSTALL_TRAP_PENDING: u32 = 1 << 1;
/// Exception summary register.
pub const GR_EXCEPTION: u32 = 0x0040_0108;
/// Per-GPC exception enable.
pub const GR_EXCEPTION_EN: u32 = 0x0040_0138;
/// Trapped method address/subchannel.
pub const GR_TRAPPED_ADDR: u32 = 0x0040_0704;
/// Trapped method data (low word).
pub const GR_TRAPPED_DATA_LO: u32 = 0x0040_0708;
/// Trapped method data (high word).
pub const GR_TRAPPED_DATA_HI: u32 = 0x0040_070c;
/// Frontend object table entry for subchannel `i` (0..4).
pub const fn fe_object_table(i: u32) -> u32 {
    0x0040_0710 + i * 4
}
/// Host fifo access control for the graphics engine.
pub const GR_GPFIFO_CTL: u32 = 0x0040_0500;
/// `access` enable bit of [`GR_GPFIFO_CTL`].
pub const GPFIFO_CTL_ACCESS: u32 = 1 << 0;
/// `semaphore_access` enable bit of [`GR_GPFIFO_CTL`].
pub const GPFIFO_CTL_SEMAPHORE_ACCESS: u32 = 1 << 16;

/// Frontend power mode request register.
pub const GR_FE_PWR_MODE: u32 = 0x0040_4170;
/// Request field value: send.
pub const FE_PWR_MODE_REQ_SEND: u32 = 1 << 4;
/// Mode field value: force clocks on.
pub const FE_PWR_MODE_FORCE_ON: u32 = 2;
/// Mode field value: automatic clock gating.
pub const FE_PWR_MODE_AUTO: u32 = 0;
/// Request field value read back when the handshake is done.
pub const FE_PWR_MODE_REQ_DONE: u32 = 0;
/// Frontend go-idle timeout.
pub const GR_FE_GO_IDLE_TIMEOUT: u32 = 0x0040_4154;
/// Disable the go-idle countdown.
pub const FE_GO_IDLE_TIMEOUT_DISABLED: u32 = 0;
/// Production go-idle countdown.
pub const FE_GO_IDLE_TIMEOUT_PROD: u32 = 0x0000_1800;
/// Context-state reset: both falcons held in reset.
pub const CTXSW_RESET_ASSERT: u32 = 0;
/// Context-state reset: both falcons released.
pub const CTXSW_RESET_DEASSERT: u32 = 0x3f;
/// Bundle circular buffer base (256-byte units).
pub const GR_SCC_BUNDLE_CB_BASE: u32 = 0x0040_8004;
/// Bundle circular buffer size (256-byte units).
pub const GR_SCC_BUNDLE_CB_SIZE: u32 = 0x0040_8008;
/// Page pool base (256-byte units).
pub const GR_SCC_PAGEPOOL_BASE: u32 = 0x0040_8010;
/// Page pool size and validity.
pub const GR_SCC_PAGEPOOL: u32 = 0x0040_8014;
/// GPC-broadcast bundle buffer base.
pub const GR_GPCS_SETUP_BUNDLE_CB_BASE: u32 = 0x0041_8808;
/// GPC-broadcast attribute buffer base.
pub const GR_GPCS_SETUP_ATTRIB_CB_BASE: u32 = 0x0041_8810;
/// Alpha/beta distribution timeslice.
pub const GR_PD_AB_DIST_CFG0: u32 = 0x0040_6028;
/// Frontend load timeslice.
pub const GR_FE_PD_TIMESLICE: u32 = 0x0040_4408;
/// SCC RAM initialisation trigger.
pub const GR_SCC_INIT: u32 = 0x0040_802c;
/// `ram_trigger` field of [`GR_SCC_INIT`].
pub const SCC_INIT_RAM_TRIGGER: u32 = 1;
/// Frontend HWW error status.
pub const GR_FE_HWW_ESR: u32 = 0x0040_4000;
/// Memory-format HWW error status.
pub const GR_MEMFMT_HWW_ESR: u32 = 0x0040_4600;
/// Data-store HWW error status.
pub const GR_DS_HWW_ESR: u32 = 0x0040_5840;
/// Engine status register polled by the idle wait.
pub const GR_ENGINE_STATUS: u32 = 0x0040_060c;
/// Busy bit of [`GR_ENGINE_STATUS`].
pub const ENGINE_STATUS_BUSY: u32 = 1 << 0;
/// Frontend status register.
pub const GR_FE_STATUS: u32 = 0x0040_4158;
/// Busy bit of [`GR_FE_STATUS`].
pub const FE_STATUS_BUSY: u32 = 1 << 0;
/// `ctxsw_active` bit of [`FECS_CTXSW_STATUS_1`].
pub const CTXSW_STATUS_ACTIVE: u32 = 1 << 0;

/// MME shadow RAM data register (method-init replay).
pub const GR_MME_SHADOW_RAW_DATA: u32 = 0x0040_4498;
/// MME shadow RAM index register.
pub const GR_MME_SHADOW_RAW_INDEX: u32 = 0x0040_4490;
/// Write trigger bit of [`GR_MME_SHADOW_RAW_INDEX`].
pub const MME_SHADOW_RAW_INDEX_WRITE_TRIGGER: u32 = 1 << 31;

/// Bundle-init address register.
pub const GR_PIPE_BUNDLE_ADDRESS: u32 = 0x0040_4200;
/// Bundle-init data register.
pub const GR_PIPE_BUNDLE_DATA: u32 = 0x0040_4204;
/// Bundle addresses at or above this force an explicit idle wait.
pub const BUNDLE_GO_IDLE_THRESHOLD: u32 = 0x0000_fe00;

/// ZBC color table: DS value word `c` of the selected slot.
pub const fn zbc_color_ds(c: u32) -> u32 {
    0x0040_5804 + c * 4
}
/// ZBC color table: L2 mirror word `c`.
pub const fn zbc_color_l2(c: u32) -> u32 {
    0x0017_ea00 + c * 4
}
/// ZBC color format register.
pub const ZBC_COLOR_FMT: u32 = 0x0040_5820;
/// ZBC depth value register.
pub const ZBC_DEPTH_VALUE: u32 = 0x0040_5818;
/// ZBC depth format register.
pub const ZBC_DEPTH_FMT: u32 = 0x0040_5824;
/// ZBC table index select (hardware slot to program).
pub const ZBC_TABLE_INDEX: u32 = 0x0040_5800;
/// ZBC L2 depth mirror register.
pub const ZBC_L2_DEPTH: u32 = 0x0017_ea20;

/// Context-image header layout (`ctxsw_prog`): byte offsets within the
/// main image and the per-falcon local headers, plus the magic values the
/// ucode stamps into them.
pub mod ctxsw_prog {
    /// Total size of the FECS main header.
    pub const FECS_HEADER_BYTES: u32 = 256;
    /// Size of one local (per-falcon) header.
    pub const LOCAL_HEADER_BYTES: u32 = 256;
    /// Main image magic value offset.
    pub const MAIN_IMAGE_MAGIC_O: u32 = 0x00;
    /// Expected main image magic.
    pub const MAIN_IMAGE_MAGIC_VALUE: u32 = 0x600d_c0de;
    /// Number of GPC images following the main image.
    pub const MAIN_IMAGE_NUM_GPCS_O: u32 = 0x08;
    /// Patch count consumed by the ucode on restore.
    pub const MAIN_IMAGE_PATCH_COUNT_O: u32 = 0x10;
    /// Patch buffer GPU address, low word.
    pub const MAIN_IMAGE_PATCH_ADR_LO_O: u32 = 0x14;
    /// Patch buffer GPU address, high word.
    pub const MAIN_IMAGE_PATCH_ADR_HI_O: u32 = 0x18;
    /// Zcull mode field.
    pub const MAIN_IMAGE_ZCULL_O: u32 = 0x1c;
    /// Zcull buffer pointer (packed).
    pub const MAIN_IMAGE_ZCULL_PTR_O: u32 = 0x20;
    /// HWPM mode field.
    pub const MAIN_IMAGE_PM_O: u32 = 0x28;
    /// HWPM buffer pointer (256-byte units).
    pub const MAIN_IMAGE_PM_PTR_O: u32 = 0x2c;
    /// Priv-access-map mode field.
    pub const MAIN_IMAGE_PRIV_ACCESS_MAP_CONFIG_O: u32 = 0x34;
    /// Priv-access-map GPU address, low word.
    pub const MAIN_IMAGE_PRIV_ACCESS_MAP_ADDR_LO_O: u32 = 0x38;
    /// Priv-access-map GPU address, high word.
    pub const MAIN_IMAGE_PRIV_ACCESS_MAP_ADDR_HI_O: u32 = 0x3c;
    /// Misc options field (verif features bit lives here).
    pub const MAIN_IMAGE_MISC_OPTIONS_O: u32 = 0x44;
    /// Save-operation counter.
    pub const MAIN_IMAGE_NUM_SAVE_OPS_O: u32 = 0xf4;
    /// Restore-operation counter.
    pub const MAIN_IMAGE_NUM_RESTORE_OPS_O: u32 = 0xf8;

    /// Local header magic value offset.
    pub const LOCAL_MAGIC_O: u32 = 0x00;
    /// Expected local header magic.
    pub const LOCAL_MAGIC_VALUE: u32 = 0xad0b_ecab;
    /// Priv register control word (segment offset in 256-byte units).
    pub const LOCAL_PRIV_REGISTER_CTL_O: u32 = 0x0c;
    /// Number of TPC images in a GPC local segment.
    pub const LOCAL_IMAGE_NUM_TPCS_O: u32 = 0x10;
    /// PPC configuration word (count + mask).
    pub const LOCAL_IMAGE_PPC_INFO_O: u32 = 0x14;
    /// Offset of the extended (quad/perf) region, 256-byte units.
    pub const LOCAL_EXT_BUFFER_OFFSET_O: u32 = 0x18;

    /// Zcull mode: no context switch.
    pub const ZCULL_MODE_NO_CTXSW: u32 = 0;
    /// Zcull mode: separate buffer.
    pub const ZCULL_MODE_SEPARATE_BUFFER: u32 = 2;
    /// HWPM mode: no context switch.
    pub const PM_MODE_NO_CTXSW: u32 = 0;
    /// HWPM mode: context switched.
    pub const PM_MODE_CTXSW: u32 = 1;
    /// Priv-access-map mode: consult the map.
    pub const PRIV_ACCESS_MAP_MODE_USE_MAP: u32 = 2;
    /// Priv-access-map mode: allow everything.
    pub const PRIV_ACCESS_MAP_MODE_ALLOW_ALL: u32 = 0;
    /// Verif-features disable mask within misc options.
    pub const MISC_OPTIONS_VERIF_FEATURES_M: u32 = 1 << 3;
}

/// Instance-block word offsets (RAM_IN layout) the engine programs.
pub mod ram_in {
    /// Graphics WFI target word (mode + pointer low bits).
    pub const GR_WFI_TARGET_W: u32 = 132;
    /// Graphics WFI pointer, high word.
    pub const GR_WFI_PTR_HI_W: u32 = 133;
    /// `virtual` WFI mode value.
    pub const GR_WFI_MODE_VIRTUAL: u32 = 1 << 2;
}

/// Per-SM debug/status registers, expressed relative to a GPC/TPC offset
/// produced by [`Topology::offset_of`](crate::topology::Topology::offset_of).
pub mod sm {
    /// Debugger control (stop/run triggers, debugger mode).
    pub const DBGR_CONTROL0: u32 = 0x0050_4610;
    /// Debugger status (locked-down bit).
    pub const DBGR_STATUS0: u32 = 0x0050_460c;
    /// Global HWW error status.
    pub const HWW_GLOBAL_ESR: u32 = 0x0050_4650;
    /// Warp HWW error status.
    pub const HWW_WARP_ESR: u32 = 0x0050_4648;
    /// Global HWW report mask.
    pub const HWW_GLOBAL_ESR_REPORT_MASK: u32 = 0x0050_465c;
    /// Warp HWW report mask.
    pub const HWW_WARP_ESR_REPORT_MASK: u32 = 0x0050_4658;
    /// SM configuration (sm_id field).
    pub const CFG: u32 = 0x0050_4698;

    /// `stop_trigger` enable bit.
    pub const DBGR_CONTROL0_STOP_TRIGGER: u32 = 1 << 31;
    /// `run_trigger` task bit.
    pub const DBGR_CONTROL0_RUN_TRIGGER: u32 = 1 << 30;
    /// `debugger_mode` on bit.
    pub const DBGR_CONTROL0_DEBUGGER_MODE: u32 = 1 << 0;
    /// `locked_down` bit of DBGR_STATUS0.
    pub const DBGR_STATUS0_LOCKED_DOWN: u32 = 1 << 0;
    /// Broadcast (all GPCs, all TPCs) alias of [`DBGR_CONTROL0`].
    pub const GPCS_TPCS_DBGR_CONTROL0: u32 = 0x0041_9e10;
    /// Broadcast alias of [`HWW_WARP_ESR_REPORT_MASK`].
    pub const GPCS_TPCS_HWW_WARP_ESR_REPORT_MASK: u32 = 0x0041_9e44;
    /// Broadcast alias of [`HWW_GLOBAL_ESR_REPORT_MASK`].
    pub const GPCS_TPCS_HWW_GLOBAL_ESR_REPORT_MASK: u32 = 0x0041_9e4c;
}

/// Per-GPC / per-TPC exception plumbing.
pub mod gpc {
    /// GPC exception summary, relative to the GPC offset.
    pub const GPCCS_GPC_EXCEPTION: u32 = 0x0050_2c90;
    /// GPC exception enable, relative to the GPC offset.
    pub const GPCCS_GPC_EXCEPTION_EN: u32 = 0x0050_2c94;
    /// TPC exception summary, relative to the GPC+TPC offset.
    pub const TPCCS_TPC_EXCEPTION: u32 = 0x0050_4508;
    /// TPC exception enable, relative to the GPC+TPC offset.
    pub const TPCCS_TPC_EXCEPTION_EN: u32 = 0x0050_450c;
    /// Mask of per-TPC bits inside the GPC exception summary.
    pub const GPC_EXCEPTION_TPC_MASK: u32 = 0x0000_ff00;
    /// Shift of the TPC bit field.
    pub const GPC_EXCEPTION_TPC_SHIFT: u32 = 8;
    /// SM pending bit inside the TPC exception summary.
    pub const TPC_EXCEPTION_SM_PENDING: u32 = 1 << 1;
    /// TEX pending bit inside the TPC exception summary.
    pub const TPC_EXCEPTION_TEX_PENDING: u32 = 1 << 0;
}
