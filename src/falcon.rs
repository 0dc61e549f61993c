// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Falcon microcontroller boot.
//!
//! The FECS and GPCCS falcons run the ctxsw ucode. Booting one means
//! streaming its data segment into DMEM, its boot and code segments into
//! IMEM (tagged per 256-byte block, zero-padded to a block boundary),
//! waiting out the memory scrubbers, releasing the CPU and then waiting for
//! the ucode's boot handshake in mailbox 0.

use crate::engine::GrEngine;
use crate::error::{GrError, Result, TimeoutKind};
use crate::mmio::Mmio;
use crate::platform::PollTimer;
use crate::regs;
use alloc::vec::Vec;
use log::{error, info, trace};
use zerocopy::byteorder::little_endian::U32 as Le32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

/// On-disk ucode header: segment sizes in bytes, then the segments
/// back to back (boot, code, data).
#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct UcodeHeader {
    boot_size: Le32,
    code_size: Le32,
    data_size: Le32,
    entry: Le32,
}

/// Ucode file name for the FECS falcon.
pub const FECS_UCODE_NAME: &str = "fecs.bin";
/// Ucode file name for the GPCCS falcon.
pub const GPCCS_UCODE_NAME: &str = "gpccs.bin";

/// Source of firmware blobs.
pub trait FirmwareLoader {
    /// Fetches the raw bytes of the named ucode file.
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// A parsed ctxsw ucode image, borrowing the fetched bytes.
pub struct Firmware<'a> {
    /// Bootloader segment, loaded into IMEM after the code.
    pub boot: &'a [u8],
    /// Code segment, loaded into IMEM at tag 0.
    pub code: &'a [u8],
    /// Data segment, loaded into DMEM.
    pub data: &'a [u8],
    /// Boot entry point.
    pub entry: u32,
}

impl<'a> Firmware<'a> {
    /// Parses a ucode blob. Segment sizes must be word-aligned and sum to
    /// the payload length.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (header, payload) =
            UcodeHeader::ref_from_prefix(bytes).map_err(|_| GrError::FirmwareLoad)?;
        let boot_size = header.boot_size.get() as usize;
        let code_size = header.code_size.get() as usize;
        let data_size = header.data_size.get() as usize;
        if boot_size % 4 != 0 || code_size % 4 != 0 || data_size % 4 != 0 {
            return Err(GrError::FirmwareLoad);
        }
        if payload.len() != boot_size + code_size + data_size {
            return Err(GrError::FirmwareLoad);
        }
        let (boot, rest) = payload.split_at(boot_size);
        let (code, data) = rest.split_at(code_size);
        Ok(Self {
            boot,
            code,
            data,
            entry: header.entry.get(),
        })
    }
}

/// Register block of one falcon.
struct FalconRegs {
    cpuctl: u32,
    dmactl: u32,
    imemc: u32,
    imemd: u32,
    imemt: u32,
    dmemc: u32,
    dmemd: u32,
}

const FECS_FALCON: FalconRegs = FalconRegs {
    cpuctl: regs::FECS_CPUCTL,
    dmactl: regs::FECS_DMACTL,
    imemc: regs::FECS_IMEMC,
    imemd: regs::FECS_IMEMD,
    imemt: regs::FECS_IMEMT,
    dmemc: regs::FECS_DMEMC,
    dmemd: regs::FECS_DMEMD,
};

const GPCCS_FALCON: FalconRegs = FalconRegs {
    cpuctl: regs::GPCCS_CPUCTL,
    dmactl: regs::GPCCS_DMACTL,
    imemc: regs::GPCCS_IMEMC,
    imemd: regs::GPCCS_IMEMD,
    imemt: regs::GPCCS_IMEMT,
    dmemc: regs::GPCCS_DMEMC,
    dmemd: regs::GPCCS_DMEMD,
};

/// IMEM/DMEM tag and block granule.
const BLOCK_BYTES: usize = 256;
const BLOCK_WORDS: usize = BLOCK_BYTES / 4;

fn words(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

/// Streams `segment` into IMEM through the auto-increment port, stamping a
/// new tag every 256 bytes and zero-padding the final block.
fn load_imem(mmio: &dyn Mmio, falcon: &FalconRegs, segment: &[u8], start_tag: u32) -> u32 {
    mmio.write(falcon.imemc, regs::MEMC_AINCW);
    let mut tag = start_tag;
    let mut in_block = 0usize;
    for word in words(segment) {
        if in_block == 0 {
            mmio.write(falcon.imemt, tag);
            tag += 1;
        }
        mmio.write(falcon.imemd, word);
        in_block = (in_block + 1) % BLOCK_WORDS;
    }
    if in_block != 0 {
        for _ in in_block..BLOCK_WORDS {
            mmio.write(falcon.imemd, 0);
        }
    }
    tag
}

fn load_dmem(mmio: &dyn Mmio, falcon: &FalconRegs, segment: &[u8]) {
    mmio.write(falcon.dmemc, regs::MEMC_AINCW);
    for word in words(segment) {
        mmio.write(falcon.dmemd, word);
    }
}

/// Wrapping word sum over the code and data segments, logged so a corrupt
/// copy can be told apart from a ucode bug when the handshake never comes.
fn segments_checksum(fw: &Firmware) -> u32 {
    words(fw.code)
        .chain(words(fw.data))
        .fold(0u32, |sum, w| sum.wrapping_add(w))
}

impl GrEngine<'_> {
    /// Loads the ctxsw ucode into both falcons and releases their CPUs.
    pub fn load_ctxsw_ucode(&self, fecs_fw: &Firmware, gpccs_fw: &Firmware) -> Result<()> {
        // Ucode runs without a bound context until BIND_POINTER.
        self.mmio
            .write(regs::FECS_DMACTL, regs::DMACTL_REQUIRE_CTX_FALSE);
        self.mmio
            .write(regs::GPCCS_DMACTL, regs::DMACTL_REQUIRE_CTX_FALSE);

        self.load_one_falcon(&FECS_FALCON, fecs_fw)?;
        self.load_one_falcon(&GPCCS_FALCON, gpccs_fw)?;

        // A stale handshake value must not satisfy the ready wait.
        self.mmio.write(regs::fecs_ctxsw_mailbox_clear(0), !0);
        self.mmio.write(regs::GPCCS_CPUCTL, regs::CPUCTL_STARTCPU);
        self.mmio.write(regs::FECS_CPUCTL, regs::CPUCTL_STARTCPU);
        info!(
            "ctxsw ucode loaded, entry {:#x}/{:#x}",
            fecs_fw.entry, gpccs_fw.entry
        );
        Ok(())
    }

    /// Fetches both ucodes through `loader`, loads them and waits for the
    /// boot handshake.
    pub fn boot_ctxsw_ucode_from(&self, loader: &dyn FirmwareLoader) -> Result<()> {
        let fecs = loader.fetch(FECS_UCODE_NAME)?;
        let gpccs = loader.fetch(GPCCS_UCODE_NAME)?;
        self.load_ctxsw_ucode(&Firmware::parse(&fecs)?, &Firmware::parse(&gpccs)?)?;
        self.wait_ctxsw_ready()
    }

    fn load_one_falcon(&self, falcon: &FalconRegs, fw: &Firmware) -> Result<()> {
        self.wait_mem_scrubbing(falcon.dmactl)?;
        load_dmem(self.mmio, falcon, fw.data);
        let next_tag = load_imem(self.mmio, falcon, fw.code, 0);
        load_imem(self.mmio, falcon, fw.boot, next_tag);
        trace!("falcon segments loaded, checksum {:#010x}", segments_checksum(fw));
        Ok(())
    }

    /// Waits for a falcon's IMEM/DMEM scrubbers to finish.
    fn wait_mem_scrubbing(&self, dmactl: u32) -> Result<()> {
        let mut timer = PollTimer::new(self.platform, false);
        loop {
            if self.mmio.read(dmactl) & regs::DMACTL_SCRUB_PENDING == 0 {
                return Ok(());
            }
            timer.check(TimeoutKind::MemScrub)?;
            timer.wait();
        }
    }

    /// Waits for the freshly booted ucode to post its handshake, then
    /// clears it.
    pub fn wait_ctxsw_ready(&self) -> Result<()> {
        let mut timer = PollTimer::new(self.platform, true);
        loop {
            if self.mmio.read(regs::fecs_ctxsw_mailbox(0)) == regs::UCODE_HANDSHAKE_INIT_COMPLETE {
                break;
            }
            if timer.expired() {
                self.dump_falcon_stats();
                return Err(GrError::Timeout(TimeoutKind::CtxswReady));
            }
            timer.wait();
        }
        self.mmio.write(regs::fecs_ctxsw_mailbox_clear(0), !0);
        Ok(())
    }

    /// Logs the FECS falcon's diagnostic state after a protocol failure.
    pub(crate) fn dump_falcon_stats(&self) {
        error!(
            "fecs engctl {:#010x} pc {:#010x} ctxsw_status_1 {:#010x}",
            self.mmio.read(regs::FECS_FALCON_ENGCTL),
            self.mmio.read(regs::FECS_FALCON_CURCTX_PC),
            self.mmio.read(regs::FECS_CTXSW_STATUS_1),
        );
        for i in 0..regs::FECS_MAILBOX_COUNT {
            error!(
                "fecs mailbox {i} = {:#010x}",
                self.mmio.read(regs::fecs_ctxsw_mailbox(i))
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::Harness;
    use alloc::vec;

    fn blob(boot_words: usize, code_words: usize, data_words: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for size in [boot_words * 4, code_words * 4, data_words * 4, 0x100] {
            bytes.extend_from_slice(&(size as u32).to_le_bytes());
        }
        for i in 0..(boot_words + code_words + data_words) {
            bytes.extend_from_slice(&(i as u32).to_le_bytes());
        }
        bytes
    }

    #[test]
    fn parse_splits_segments() {
        let bytes = blob(2, 3, 4);
        let fw = Firmware::parse(&bytes).unwrap();
        assert_eq!(fw.boot.len(), 8);
        assert_eq!(fw.code.len(), 12);
        assert_eq!(fw.data.len(), 16);
        assert_eq!(fw.entry, 0x100);
    }

    #[test]
    fn parse_rejects_bad_blobs() {
        assert!(Firmware::parse(&[0u8; 3]).is_err());
        let mut bytes = blob(1, 1, 1);
        bytes.pop();
        assert!(Firmware::parse(&bytes).is_err());
        // Unaligned segment size.
        let mut bytes = vec![0u8; 16];
        bytes[0] = 2;
        assert!(Firmware::parse(&bytes).is_err());
    }

    #[test]
    fn imem_load_tags_every_block_and_pads() {
        let h = Harness::new();
        // 65 words: one full 256-byte block plus one word.
        let segment: Vec<u8> = (0..65u32).flat_map(|w| w.to_le_bytes()).collect();
        let next = load_imem(&h.mmio, &FECS_FALCON, &segment, 0);
        assert_eq!(next, 2);
        assert_eq!(h.mmio.writes_to(regs::FECS_IMEMT), vec![0, 1]);
        // Padded to two full blocks.
        assert_eq!(h.mmio.write_count(regs::FECS_IMEMD), 128);
    }

    #[test]
    fn scrub_pending_times_out() {
        let h = Harness::new();
        h.mmio.set(regs::FECS_DMACTL, regs::DMACTL_SCRUB_PENDING);
        let gr = h.engine();
        let fecs = blob(1, 1, 1);
        let gpccs = blob(1, 1, 1);
        assert!(matches!(
            gr.load_ctxsw_ucode(
                &Firmware::parse(&fecs).unwrap(),
                &Firmware::parse(&gpccs).unwrap()
            ),
            Err(GrError::Timeout(TimeoutKind::MemScrub))
        ));
    }

    #[test]
    fn load_starts_both_cpus() {
        let h = Harness::new();
        let gr = h.engine();
        let fecs = blob(1, 64, 4);
        let gpccs = blob(1, 32, 4);
        gr.load_ctxsw_ucode(
            &Firmware::parse(&fecs).unwrap(),
            &Firmware::parse(&gpccs).unwrap(),
        )
        .unwrap();
        assert_eq!(h.mmio.get(regs::FECS_CPUCTL), regs::CPUCTL_STARTCPU);
        assert_eq!(h.mmio.get(regs::GPCCS_CPUCTL), regs::CPUCTL_STARTCPU);
        // Data segment went through the DMEM port.
        assert_eq!(h.mmio.write_count(regs::FECS_DMEMD), 4);
    }

    #[test]
    fn ready_handshake_is_cleared_after_wait() {
        let h = Harness::new();
        h.mmio.clear_alias(
            regs::fecs_ctxsw_mailbox_clear(0),
            regs::fecs_ctxsw_mailbox(0),
        );
        h.mmio
            .set(regs::fecs_ctxsw_mailbox(0), regs::UCODE_HANDSHAKE_INIT_COMPLETE);
        let gr = h.engine();
        gr.wait_ctxsw_ready().unwrap();
        assert_eq!(h.mmio.get(regs::fecs_ctxsw_mailbox(0)), 0);
    }

    #[test]
    fn boot_from_loader_runs_the_handshake() {
        struct TableLoader;
        impl FirmwareLoader for TableLoader {
            fn fetch(&self, name: &str) -> crate::error::Result<Vec<u8>> {
                match name {
                    FECS_UCODE_NAME => Ok(blob(1, 64, 4)),
                    GPCCS_UCODE_NAME => Ok(blob(1, 32, 4)),
                    _ => Err(GrError::FirmwareLoad),
                }
            }
        }
        let h = Harness::new();
        h.mmio.clear_alias(
            regs::fecs_ctxsw_mailbox_clear(0),
            regs::fecs_ctxsw_mailbox(0),
        );
        // The ucode posts its handshake once the FECS CPU is released.
        h.mmio.on_write_value(
            regs::FECS_CPUCTL,
            regs::CPUCTL_STARTCPU,
            regs::fecs_ctxsw_mailbox(0),
            regs::UCODE_HANDSHAKE_INIT_COMPLETE,
        );
        let gr = h.engine();
        gr.boot_ctxsw_ucode_from(&TableLoader).unwrap();
        assert_eq!(h.mmio.get(regs::FECS_CPUCTL), regs::CPUCTL_STARTCPU);
        assert_eq!(h.mmio.get(regs::fecs_ctxsw_mailbox(0)), 0);
    }

    #[test]
    fn stale_handshake_is_cleared_before_cpu_start() {
        let h = Harness::new();
        h.mmio.clear_alias(
            regs::fecs_ctxsw_mailbox_clear(0),
            regs::fecs_ctxsw_mailbox(0),
        );
        h.mmio
            .set(regs::fecs_ctxsw_mailbox(0), regs::UCODE_HANDSHAKE_INIT_COMPLETE);
        let gr = h.engine();
        let fecs = blob(1, 1, 1);
        let gpccs = blob(1, 1, 1);
        gr.load_ctxsw_ucode(
            &Firmware::parse(&fecs).unwrap(),
            &Firmware::parse(&gpccs).unwrap(),
        )
        .unwrap();
        // The leftover value from a previous boot is gone, so the ready
        // wait cannot be satisfied by it.
        assert_eq!(h.mmio.get(regs::fecs_ctxsw_mailbox(0)), 0);
    }

    #[test]
    fn checksum_sums_code_and_data_words() {
        // blob() numbers the payload words sequentially: boot [0],
        // code [1, 2], data [3, 4, 5].
        let bytes = blob(1, 2, 3);
        let fw = Firmware::parse(&bytes).unwrap();
        assert_eq!(segments_checksum(&fw), 15);
    }

    #[test]
    fn missing_handshake_times_out() {
        let h = Harness::new();
        let gr = h.engine();
        assert!(matches!(
            gr.wait_ctxsw_ready(),
            Err(GrError::Timeout(TimeoutKind::CtxswReady))
        ));
    }
}
