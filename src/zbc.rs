// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Zero-bandwidth-clear table management.
//!
//! The hardware keeps small color and depth clear-value tables; the DS and
//! L2 units each hold a copy that must stay in agreement. The engine shadows
//! both tables, deduplicates entries by reference counting, and reprograms
//! hardware only for genuinely new values. Slot 0 of each hardware table is
//! reserved as invalid, so shadow index `i` lives in hardware slot `i + 1`.

use crate::engine::GrEngine;
use crate::error::{GrError, Result};
use arrayvec::ArrayVec;
use log::{debug, error};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Entries per table, excluding the reserved invalid slot.
pub const ZBC_TABLE_ENTRIES: usize = 15;

/// Which clear table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ZbcKind {
    /// No table; a query with this kind reports the table size.
    Invalid = 0,
    /// Color clear table.
    Color = 1,
    /// Depth clear table.
    Depth = 2,
}

/// Answer to a [`GrEngine::query_zbc`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZbcQuery {
    /// Slots per hardware table, including the reserved invalid slot.
    TableSize(u32),
    /// A color table entry.
    Color(ZbcColorEntry),
    /// A depth table entry.
    Depth(ZbcDepthEntry),
}

/// Color format: all zeroes.
pub const ZBC_COLOR_FMT_ZERO: u32 = 1;
/// Color format: unorm one.
pub const ZBC_COLOR_FMT_UNORM_ONE: u32 = 2;
/// Color format: four FP32 channels.
pub const ZBC_COLOR_FMT_RF32_GF32_BF32_AF32: u32 = 4;
/// Depth format: FP32.
pub const ZBC_DEPTH_FMT_FP32: u32 = 1;

/// One color clear value, in both unit encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZbcColorEntry {
    /// DS encoding, four words.
    pub color_ds: [u32; 4],
    /// L2 encoding, four words.
    pub color_l2: [u32; 4],
    /// Color format.
    pub format: u32,
    /// References held by clients.
    pub ref_cnt: u32,
}

/// One depth clear value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZbcDepthEntry {
    /// Depth value.
    pub depth: u32,
    /// Depth format.
    pub format: u32,
    /// References held by clients.
    pub ref_cnt: u32,
}

/// Shadow copies of both hardware tables.
#[derive(Default)]
pub struct ZbcTables {
    /// Color table shadow.
    pub color: ArrayVec<ZbcColorEntry, ZBC_TABLE_ENTRIES>,
    /// Depth table shadow.
    pub depth: ArrayVec<ZbcDepthEntry, ZBC_TABLE_ENTRIES>,
}

impl GrEngine<'_> {
    /// Adds (or references) a color clear value. Returns its shadow index.
    ///
    /// An entry whose DS words and format match an existing slot but whose
    /// L2 words differ is rejected: the two units would disagree on what
    /// the slot means.
    pub fn add_zbc_color(&self, entry: ZbcColorEntry) -> Result<u32> {
        let mut tables = self.zbc.lock();
        for (i, existing) in tables.color.iter_mut().enumerate() {
            if existing.format == entry.format && existing.color_ds == entry.color_ds {
                if existing.color_l2 != entry.color_l2 {
                    error!("zbc color entry {i}: l2 encoding disagrees with ds match");
                    return Err(GrError::InvalidZbcEntry);
                }
                existing.ref_cnt += 1;
                return Ok(i as u32);
            }
        }
        if tables.color.is_full() {
            return Err(GrError::Resource);
        }
        let index = tables.color.len() as u32;
        let mut entry = entry;
        entry.ref_cnt = 1;
        // A new value changes both unit copies, so the engine must have no
        // work in flight and must not be handed any until both are written.
        // The shadow is updated only after the hardware write, so a failed
        // quiesce leaves shadow and hardware in agreement.
        self.fifo.disable_engine_activity();
        let quiesced = self.wait_idle();
        if quiesced.is_ok() {
            self.chip.add_zbc_color_hw(self.mmio, index + 1, &entry);
            tables.color.push(entry);
        }
        self.fifo.enable_engine_activity();
        quiesced?;
        self.chip
            .pmu_save_zbc(tables.color.len() as u32, tables.depth.len() as u32);
        debug!("zbc color entry {index} added, format {:#x}", entry.format);
        Ok(index)
    }

    /// Adds (or references) a depth clear value. Returns its shadow index.
    pub fn add_zbc_depth(&self, entry: ZbcDepthEntry) -> Result<u32> {
        let mut tables = self.zbc.lock();
        for (i, existing) in tables.depth.iter_mut().enumerate() {
            if existing.format == entry.format && existing.depth == entry.depth {
                existing.ref_cnt += 1;
                return Ok(i as u32);
            }
        }
        if tables.depth.is_full() {
            return Err(GrError::Resource);
        }
        let index = tables.depth.len() as u32;
        let mut entry = entry;
        entry.ref_cnt = 1;
        self.fifo.disable_engine_activity();
        let quiesced = self.wait_idle();
        if quiesced.is_ok() {
            self.chip.add_zbc_depth_hw(self.mmio, index + 1, &entry);
            tables.depth.push(entry);
        }
        self.fifo.enable_engine_activity();
        quiesced?;
        self.chip
            .pmu_save_zbc(tables.color.len() as u32, tables.depth.len() as u32);
        debug!("zbc depth entry {index} added, format {:#x}", entry.format);
        Ok(index)
    }

    /// Answers a table query. The `Invalid` kind reports the hardware
    /// table size instead of an entry; `index` is ignored for it.
    pub fn query_zbc(&self, kind: ZbcKind, index: u32) -> Result<ZbcQuery> {
        match kind {
            ZbcKind::Invalid => Ok(ZbcQuery::TableSize(ZBC_TABLE_ENTRIES as u32 + 1)),
            ZbcKind::Color => self.query_zbc_color(index).map(ZbcQuery::Color),
            ZbcKind::Depth => self.query_zbc_depth(index).map(ZbcQuery::Depth),
        }
    }

    /// Reads back a color table entry.
    pub fn query_zbc_color(&self, index: u32) -> Result<ZbcColorEntry> {
        self.zbc
            .lock()
            .color
            .get(index as usize)
            .copied()
            .ok_or(GrError::InvalidZbcIndex(index))
    }

    /// Reads back a depth table entry.
    pub fn query_zbc_depth(&self, index: u32) -> Result<ZbcDepthEntry> {
        self.zbc
            .lock()
            .depth
            .get(index as usize)
            .copied()
            .ok_or(GrError::InvalidZbcIndex(index))
    }

    /// Seeds the tables with the conventional default clears: opaque
    /// black, opaque white and transparent color, plus 0.0 and 1.0 depth.
    pub fn load_zbc_defaults(&self) -> Result<()> {
        self.add_zbc_color(ZbcColorEntry {
            color_ds: [0, 0, 0, 0x3f80_0000],
            color_l2: [0, 0, 0, 0xff00_0000],
            format: ZBC_COLOR_FMT_RF32_GF32_BF32_AF32,
            ref_cnt: 0,
        })?;
        self.add_zbc_color(ZbcColorEntry {
            color_ds: [0x3f80_0000; 4],
            color_l2: [0xffff_ffff; 4],
            format: ZBC_COLOR_FMT_RF32_GF32_BF32_AF32,
            ref_cnt: 0,
        })?;
        self.add_zbc_color(ZbcColorEntry::default())?;
        self.add_zbc_depth(ZbcDepthEntry {
            depth: 0x3f80_0000,
            format: ZBC_DEPTH_FMT_FP32,
            ref_cnt: 0,
        })?;
        self.add_zbc_depth(ZbcDepthEntry {
            depth: 0,
            format: ZBC_DEPTH_FMT_FP32,
            ref_cnt: 0,
        })?;
        Ok(())
    }
}
