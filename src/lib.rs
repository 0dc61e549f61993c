// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Firmware-driven GPU graphics context-switch engine.
//!
//! The graphics engine multiplexes channels by saving and restoring their
//! context images through two on-die falcon microcontrollers (FECS and
//! GPCCS). This crate boots those falcons, drives the mailbox command
//! protocol they expose, builds the golden (reference) context image that
//! seeds every new channel, manages the per-channel and global context
//! buffers, and handles the engine's interrupts, ZBC clear tables and SM
//! debugger plumbing.
//!
//! The crate is `no_std` + `alloc`. Hardware access, timing, memory
//! allocation and the channel scheduler are borrowed through the [`Mmio`],
//! [`Platform`], [`GpuAllocator`] and [`FifoOps`] traits; chip-specific
//! register lists and class handling live behind [`ChipOps`]. Everything
//! else hangs off [`GrEngine`].
//!
//! [`Mmio`]: mmio::Mmio
//! [`Platform`]: platform::Platform
//! [`GpuAllocator`]: mem::GpuAllocator
//! [`FifoOps`]: fifo::FifoOps
//! [`ChipOps`]: hal::ChipOps
//! [`GrEngine`]: engine::GrEngine

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod channel;
pub mod ctxbuf;
pub mod engine;
pub mod error;
pub mod falcon;
pub mod fifo;
pub mod golden;
pub mod hal;
pub mod intr;
pub mod mailbox;
pub mod mem;
pub mod mmio;
pub mod patch;
pub mod platform;
pub mod priv_addr;
pub mod regs;
pub mod sm_debug;
pub mod topology;
pub mod zbc;

pub use channel::{ChannelContext, TsgContext, ZcullCtx};
pub use engine::GrEngine;
pub use error::{GrError, Result, TimeoutKind};
pub use falcon::{Firmware, FirmwareLoader};
pub use priv_addr::{CtxRegOp, RegOpKind};
pub use sm_debug::SmErrorState;
pub use topology::Topology;
pub use zbc::{ZbcColorEntry, ZbcDepthEntry, ZbcKind, ZbcQuery};
