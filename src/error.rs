// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error taxonomy for the context-switch engine.

use core::fmt::{self, Display, Formatter};

/// Which bounded poll loop ran out of budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutKind {
    /// A firmware mailbox never reached its success condition.
    Mailbox,
    /// The graphics engine never went idle.
    EngineIdle,
    /// The frontend never went idle.
    FeIdle,
    /// An SM never reported lock-down.
    LockDown,
    /// Falcon IMEM/DMEM scrubbing never completed.
    MemScrub,
    /// The FE power-mode handshake never completed.
    FeHandshake,
    /// The ucode never posted its boot-complete handshake.
    CtxswReady,
}

/// All errors surfaced by the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GrError {
    /// A firmware image could not be loaded or parsed.
    FirmwareLoad,
    /// A bounded poll loop expired.
    Timeout(TimeoutKind),
    /// The firmware reported a failure value on a mailbox.
    Protocol {
        /// Mailbox id the failure was observed on.
        mailbox: u32,
        /// The raw mailbox value at the time of failure.
        value: u32,
    },
    /// An object class number the chip does not implement.
    InvalidClass(u32),
    /// A ZBC query with an out-of-range table index.
    InvalidZbcIndex(u32),
    /// A ZBC entry that conflicts with an existing slot.
    InvalidZbcEntry,
    /// A topology with no live GPCs cannot drive the engine.
    ZeroGpcCount,
    /// Allocation or mapping failure, including patch-buffer overflow.
    Resource,
    /// A register operation was requested on a channel with no backing
    /// context buffer for it.
    ContextMismatch,
    /// A priv address with no shadow copy in the relevant buffer.
    PrivAddrNotFound(u32),
    /// An MMU fault pre-empted the operation.
    MmuFault,
}

impl Display for GrError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::FirmwareLoad => write!(f, "firmware load failed"),
            Self::Timeout(kind) => write!(f, "timed out waiting for {kind:?}"),
            Self::Protocol { mailbox, value } => {
                write!(f, "ucode method failed on mailbox {mailbox} value {value:#010x}")
            }
            Self::InvalidClass(class) => write!(f, "invalid object class {class:#x}"),
            Self::InvalidZbcIndex(index) => write!(f, "invalid ZBC table index {index}"),
            Self::InvalidZbcEntry => write!(f, "ZBC entry conflicts with an existing slot"),
            Self::ZeroGpcCount => write!(f, "topology has zero GPCs"),
            Self::Resource => write!(f, "allocation or mapping failure"),
            Self::ContextMismatch => write!(f, "channel has no context buffer for this operation"),
            Self::PrivAddrNotFound(addr) => {
                write!(f, "priv address {addr:#010x} not present in context buffer")
            }
            Self::MmuFault => write!(f, "operation pre-empted by a pending MMU fault"),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, GrError>;
