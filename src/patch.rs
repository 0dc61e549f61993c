// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Patch buffer: deferred register writes applied by the ucode.
//!
//! Context-dependent register values are not written to hardware directly;
//! they are appended to a per-channel patch buffer as `(addr, value)` pairs
//! which the ucode replays on every context restore. The entry count and the
//! buffer's GPU address are mirrored into the main context image header so
//! the ucode knows what to replay.

use crate::error::{GrError, Result};
use crate::mem::{AsId, GpuBuffer};
use crate::regs::ctxsw_prog;
use log::error;

/// A channel's patch buffer and its write cursor.
pub struct PatchContext {
    buf: GpuBuffer,
    data_count: u32,
    in_update: bool,
}

impl PatchContext {
    /// Wraps an allocated, mapped buffer.
    pub fn new(buf: GpuBuffer) -> Self {
        Self {
            buf,
            data_count: 0,
            in_update: false,
        }
    }

    /// Entries this buffer can hold (two words each).
    pub fn capacity(&self) -> u32 {
        (self.buf.size() / 8) as u32
    }

    /// Entries appended so far.
    pub fn count(&self) -> u32 {
        self.data_count
    }

    /// GPU virtual address in `asid`.
    pub fn gpu_va(&self, asid: AsId) -> Result<u64> {
        self.buf.require_va(asid)
    }

    /// Backing buffer, for teardown.
    pub fn into_buffer(self) -> GpuBuffer {
        self.buf
    }

    /// Backing buffer, for unmap during teardown.
    pub fn buffer_mut(&mut self) -> &mut GpuBuffer {
        &mut self.buf
    }

    /// Opens an update window. Writes outside a window are a bug in the
    /// caller; they are still applied, so brackets stay cheap.
    pub fn begin(&mut self) {
        self.in_update = true;
    }

    /// Appends one deferred register write.
    ///
    /// A full buffer is a hard error: silently dropping a patch would leave
    /// the context image inconsistent with what the caller committed.
    pub fn write(&mut self, addr: u32, value: u32) -> Result<()> {
        if !self.in_update {
            log::warn!("patch write to {addr:#x} outside a begin/end window");
        }
        if self.data_count >= self.capacity() {
            error!("patch buffer full ({} entries), dropping write to {addr:#x}", self.data_count);
            return Err(GrError::Resource);
        }
        let off = self.data_count * 8;
        self.buf.write32(off, addr);
        self.buf.write32(off + 4, value);
        self.data_count += 1;
        Ok(())
    }

    /// Closes the update window and mirrors the cursor and buffer address
    /// into `image`'s main header.
    pub fn end(&mut self, image: &mut GpuBuffer, asid: AsId) -> Result<()> {
        self.in_update = false;
        let va = self.buf.require_va(asid)?;
        image.write32(ctxsw_prog::MAIN_IMAGE_PATCH_COUNT_O, self.data_count);
        image.write32(ctxsw_prog::MAIN_IMAGE_PATCH_ADR_LO_O, va as u32);
        image.write32(ctxsw_prog::MAIN_IMAGE_PATCH_ADR_HI_O, (va >> 32) as u32);
        Ok(())
    }

    /// Discards all appended entries.
    pub fn reset(&mut self) {
        self.data_count = 0;
    }
}
