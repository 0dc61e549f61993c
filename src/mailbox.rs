// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! FECS method submission and mailbox polling.
//!
//! Commands reach the FECS ucode as method (address, data) writes; the
//! ucode reports progress through numbered mailboxes. A submission clears
//! the mailbox, optionally seeds it, pushes the method and then polls the
//! mailbox against success and failure conditions with exponential backoff.
//! Submissions are serialised by the engine's FECS mutex.

use crate::engine::GrEngine;
use crate::error::{GrError, Result, TimeoutKind};
use crate::platform::PollTimer;
use crate::regs;
use log::{debug, error, trace};

/// Comparison applied between a mailbox value and a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Values are equal.
    Equal,
    /// Values differ.
    NotEqual,
    /// Bitwise AND is non-zero.
    And,
    /// Mailbox value is strictly less.
    Lesser,
    /// Mailbox value is less or equal.
    LesserEqual,
    /// Condition never matches. A SKIP success op leaves only the fail
    /// condition and the timeout to end the wait.
    Skip,
}

impl CmpOp {
    fn matches(self, mailbox: u32, reference: u32) -> bool {
        match self {
            Self::Equal => mailbox == reference,
            Self::NotEqual => mailbox != reference,
            Self::And => mailbox & reference != 0,
            Self::Lesser => mailbox < reference,
            Self::LesserEqual => mailbox <= reference,
            Self::Skip => false,
        }
    }
}

/// Mailbox handling for one submission.
#[derive(Debug, Clone, Copy)]
pub struct MailboxSpec {
    /// Mailbox the ucode answers in.
    pub id: u32,
    /// Seed value written to the mailbox before the push.
    pub data: u32,
    /// Bits cleared in the mailbox before the push.
    pub clr: u32,
    /// Success condition.
    pub ok: (CmpOp, u32),
    /// Failure condition.
    pub fail: (CmpOp, u32),
}

/// One FECS method submission.
#[derive(Debug, Clone, Copy)]
pub struct FecsMethodOp {
    /// Method address (one of `regs::fecs_method`).
    pub method: u32,
    /// Method data.
    pub data: u32,
    /// Mailbox handling.
    pub mailbox: MailboxSpec,
}

impl FecsMethodOp {
    /// Stop-context-switching command.
    pub fn stop_ctxsw() -> Self {
        Self::ctrl(regs::fecs_method::STOP_CTXSW)
    }

    /// Start-context-switching command.
    pub fn start_ctxsw() -> Self {
        Self::ctrl(regs::fecs_method::START_CTXSW)
    }

    /// Halt-pipeline command.
    pub fn halt_pipeline() -> Self {
        Self::ctrl(regs::fecs_method::HALT_PIPELINE)
    }

    fn ctrl(method: u32) -> Self {
        Self {
            method,
            data: !0,
            mailbox: MailboxSpec {
                id: 1,
                data: !0,
                clr: !0,
                ok: (CmpOp::Equal, regs::MAILBOX_VALUE_PASS),
                fail: (CmpOp::Equal, regs::MAILBOX_VALUE_FAIL),
            },
        }
    }

    /// Size-discovery command for `method`.
    fn discover(method: u32) -> Self {
        Self {
            method,
            data: 0,
            mailbox: MailboxSpec {
                id: 0,
                data: 0,
                clr: !0,
                ok: (CmpOp::NotEqual, 0),
                fail: (CmpOp::Skip, 0),
            },
        }
    }
}

enum PollVerdict {
    Ok(u32),
    Fail(u32),
    Timeout,
}

impl GrEngine<'_> {
    /// Submits `op` and polls its mailbox. Returns the mailbox value that
    /// satisfied the success condition. `blocking` selects sleeping waits
    /// between poll attempts; paths that cannot sleep pass `false`.
    pub fn submit_fecs_method(&self, op: FecsMethodOp, blocking: bool) -> Result<u32> {
        let _fecs = self.fecs_mutex.lock();
        self.mmio
            .write(regs::fecs_ctxsw_mailbox_clear(op.mailbox.id), op.mailbox.clr);
        self.mmio
            .write(regs::fecs_ctxsw_mailbox(op.mailbox.id), op.mailbox.data);
        self.push_and_wait(op, op.mailbox.id, blocking)
    }

    /// Sideband variant: the answer mailbox is cleared but never seeded,
    /// and it is polled directly (no aliasing).
    pub fn submit_fecs_sideband_method(&self, op: FecsMethodOp, blocking: bool) -> Result<u32> {
        let _fecs = self.fecs_mutex.lock();
        self.mmio
            .write(regs::fecs_ctxsw_mailbox_clear(op.mailbox.id), op.mailbox.clr);
        self.push_and_wait_on(op, op.mailbox.id, blocking)
    }

    fn push_and_wait(&self, op: FecsMethodOp, mailbox_id: u32, blocking: bool) -> Result<u32> {
        // The ucode answers commands addressed to mailbox 4 in mailbox 0.
        let wait_id = if mailbox_id == 4 { 0 } else { mailbox_id };
        self.push_and_wait_on(op, wait_id, blocking)
    }

    fn push_and_wait_on(&self, op: FecsMethodOp, wait_id: u32, blocking: bool) -> Result<u32> {
        trace!("fecs method {:#x} data {:#x}", op.method, op.data);
        self.mmio.write(regs::FECS_METHOD_DATA, op.data);
        self.mmio.write(regs::FECS_METHOD_PUSH, op.method);
        match self.poll_mailbox(wait_id, op.mailbox.ok, op.mailbox.fail, blocking) {
            PollVerdict::Ok(value) => Ok(value),
            PollVerdict::Fail(value) => {
                error!(
                    "fecs method {:#x} failed, mailbox {wait_id} = {value:#x}",
                    op.method
                );
                self.dump_falcon_stats();
                Err(GrError::Protocol {
                    mailbox: wait_id,
                    value,
                })
            }
            PollVerdict::Timeout => {
                error!("fecs method {:#x} timed out on mailbox {wait_id}", op.method);
                self.dump_falcon_stats();
                Err(GrError::Timeout(TimeoutKind::Mailbox))
            }
        }
    }

    fn poll_mailbox(&self, id: u32, ok: (CmpOp, u32), fail: (CmpOp, u32), blocking: bool) -> PollVerdict {
        let mut timer = PollTimer::new(self.platform, blocking);
        loop {
            let value = self.mmio.read(regs::fecs_ctxsw_mailbox(id));
            // SKIP never satisfies the success check; the fail condition
            // still gets its look at every sample.
            if ok.0.matches(value, ok.1) {
                return PollVerdict::Ok(value);
            }
            if fail.0.matches(value, fail.1) {
                return PollVerdict::Fail(value);
            }
            if timer.expired() {
                return PollVerdict::Timeout;
            }
            timer.wait();
        }
    }

    /// Stops the ucode from scheduling context switches. Nested calls are
    /// counted; only the outermost pair reaches the ucode.
    pub fn disable_ctxsw(&self) -> Result<()> {
        let mut ctx = self.ctx.lock();
        ctx.ctxsw_disable_count += 1;
        if ctx.ctxsw_disable_count == 1 {
            debug!("ctxsw disabled");
            self.submit_fecs_method(FecsMethodOp::stop_ctxsw(), true)?;
        }
        Ok(())
    }

    /// Re-enables context switching after [`GrEngine::disable_ctxsw`].
    pub fn enable_ctxsw(&self) -> Result<()> {
        let mut ctx = self.ctx.lock();
        ctx.ctxsw_disable_count = ctx.ctxsw_disable_count.saturating_sub(1);
        if ctx.ctxsw_disable_count == 0 {
            debug!("ctxsw enabled");
            self.submit_fecs_method(FecsMethodOp::start_ctxsw(), true)?;
        }
        Ok(())
    }

    /// Halts the frontend pipeline via the ucode.
    pub fn halt_pipeline(&self) -> Result<()> {
        self.submit_fecs_method(FecsMethodOp::halt_pipeline(), true)
            .map(|_| ())
    }

    /// Arms the ucode watchdog. Fire-and-forget: the ucode does not
    /// acknowledge this method.
    pub fn arm_fecs_watchdog(&self) -> Result<()> {
        let _fecs = self.fecs_mutex.lock();
        self.mmio.write(regs::FECS_METHOD_DATA, 0x7fff_ffff);
        self.mmio
            .write(regs::FECS_METHOD_PUSH, regs::fecs_method::SET_WATCHDOG_TIMEOUT);
        Ok(())
    }

    /// Queries the ucode for the context image sizes and records them.
    /// Runs during bring-up, before sleeping waits are available.
    pub fn init_ctx_state(&self) -> Result<()> {
        let golden = self.submit_fecs_method(
            FecsMethodOp::discover(regs::fecs_method::DISCOVER_IMAGE_SIZE),
            false,
        )?;
        let zcull = self.submit_fecs_method(
            FecsMethodOp::discover(regs::fecs_method::DISCOVER_ZCULL_IMAGE_SIZE),
            false,
        )?;
        let pm = self.submit_fecs_method(
            FecsMethodOp::discover(regs::fecs_method::DISCOVER_PM_IMAGE_SIZE),
            false,
        )?;
        debug!("ctx image sizes: golden {golden:#x} zcull {zcull:#x} pm {pm:#x}");
        let mut ctx = self.ctx.lock();
        ctx.golden_size = golden as usize;
        ctx.zcull_size = zcull as usize;
        ctx.pm_size = pm as usize;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::Harness;

    fn discover_op() -> FecsMethodOp {
        FecsMethodOp::discover(regs::fecs_method::DISCOVER_IMAGE_SIZE)
    }

    #[test]
    fn success_returns_observed_value() {
        let h = Harness::new();
        h.mmio.on_write(
            regs::FECS_METHOD_PUSH,
            regs::fecs_ctxsw_mailbox(0),
            0x2000,
        );
        let gr = h.engine();
        assert_eq!(gr.submit_fecs_method(discover_op(), false).unwrap(), 0x2000);
    }

    #[test]
    fn failure_reports_mailbox_value() {
        let h = Harness::new();
        h.mmio.on_write(
            regs::FECS_METHOD_PUSH,
            regs::fecs_ctxsw_mailbox(1),
            regs::MAILBOX_VALUE_FAIL,
        );
        let gr = h.engine();
        assert!(matches!(
            gr.submit_fecs_method(FecsMethodOp::stop_ctxsw(), true),
            Err(GrError::Protocol {
                mailbox: 1,
                value: regs::MAILBOX_VALUE_FAIL
            })
        ));
    }

    #[test]
    fn silent_ucode_times_out_on_silicon() {
        let h = Harness::new();
        let gr = h.engine();
        assert!(matches!(
            gr.submit_fecs_method(FecsMethodOp::stop_ctxsw(), true),
            Err(GrError::Timeout(TimeoutKind::Mailbox))
        ));
    }

    #[test]
    fn mailbox_four_is_answered_in_zero() {
        let h = Harness::new();
        h.mmio
            .on_write(regs::FECS_METHOD_PUSH, regs::fecs_ctxsw_mailbox(0), 0x1);
        let gr = h.engine();
        let op = FecsMethodOp {
            method: 0x42,
            data: 0,
            mailbox: MailboxSpec {
                id: 4,
                data: 0,
                clr: !0,
                ok: (CmpOp::Equal, 0x1),
                fail: (CmpOp::Skip, 0),
            },
        };
        assert_eq!(gr.submit_fecs_method(op, false).unwrap(), 0x1);
    }

    #[test]
    fn sideband_does_not_seed_the_mailbox() {
        let h = Harness::new();
        h.mmio
            .on_write(regs::FECS_METHOD_PUSH, regs::fecs_ctxsw_mailbox(2), 0x1);
        let gr = h.engine();
        let op = FecsMethodOp {
            method: 0x42,
            data: 0,
            mailbox: MailboxSpec {
                id: 2,
                data: 0xdead,
                clr: !0,
                ok: (CmpOp::Equal, 0x1),
                fail: (CmpOp::Skip, 0),
            },
        };
        gr.submit_fecs_sideband_method(op, false).unwrap();
        // Only the trigger wrote the mailbox; the engine did not.
        assert_eq!(h.mmio.write_count(regs::fecs_ctxsw_mailbox(2)), 0);
        assert_eq!(h.mmio.write_count(regs::fecs_ctxsw_mailbox_clear(2)), 1);
    }

    #[test]
    fn skip_success_op_still_honors_the_fail_condition() {
        let h = Harness::new();
        h.mmio
            .on_write(regs::FECS_METHOD_PUSH, regs::fecs_ctxsw_mailbox(0), 0xdead);
        let gr = h.engine();
        let op = FecsMethodOp {
            method: 0x42,
            data: 0,
            mailbox: MailboxSpec {
                id: 0,
                data: 0,
                clr: 0,
                ok: (CmpOp::Skip, 0),
                fail: (CmpOp::Equal, 0xdead),
            },
        };
        assert!(matches!(
            gr.submit_fecs_method(op, false),
            Err(GrError::Protocol {
                mailbox: 0,
                value: 0xdead
            })
        ));
    }

    #[test]
    fn skip_success_op_with_no_failure_times_out() {
        let h = Harness::new();
        let gr = h.engine();
        let op = FecsMethodOp {
            method: 0x42,
            data: 0,
            mailbox: MailboxSpec {
                id: 0,
                data: 0,
                clr: 0,
                ok: (CmpOp::Skip, 0),
                fail: (CmpOp::Skip, 0),
            },
        };
        assert!(matches!(
            gr.submit_fecs_method(op, false),
            Err(GrError::Timeout(TimeoutKind::Mailbox))
        ));
    }

    #[test]
    fn ctxsw_disable_is_refcounted() {
        let h = Harness::new();
        for _ in 0..2 {
            h.mmio.on_write(
                regs::FECS_METHOD_PUSH,
                regs::fecs_ctxsw_mailbox(1),
                regs::MAILBOX_VALUE_PASS,
            );
        }
        let gr = h.engine();
        gr.disable_ctxsw().unwrap();
        gr.disable_ctxsw().unwrap();
        gr.enable_ctxsw().unwrap();
        gr.enable_ctxsw().unwrap();
        // One STOP and one START reached the ucode.
        assert_eq!(h.mmio.write_count(regs::FECS_METHOD_PUSH), 2);
        assert!(h.mmio.triggers_drained());
    }

    #[test]
    fn init_ctx_state_records_sizes() {
        let h = Harness::new();
        for size in [0x2000, 0x800, 0x400] {
            h.mmio
                .on_write(regs::FECS_METHOD_PUSH, regs::fecs_ctxsw_mailbox(0), size);
        }
        let gr = h.engine();
        gr.init_ctx_state().unwrap();
        let ctx = gr.ctx.lock();
        assert_eq!(ctx.golden_size, 0x2000);
        assert_eq!(ctx.zcull_size, 0x800);
        assert_eq!(ctx.pm_size, 0x400);
    }

    #[test]
    fn comparison_operators() {
        assert!(CmpOp::Equal.matches(5, 5));
        assert!(!CmpOp::Equal.matches(5, 6));
        assert!(CmpOp::NotEqual.matches(5, 6));
        assert!(CmpOp::And.matches(0x11, 0x10));
        assert!(!CmpOp::And.matches(0x01, 0x10));
        assert!(CmpOp::Lesser.matches(4, 5));
        assert!(!CmpOp::Lesser.matches(5, 5));
        assert!(CmpOp::LesserEqual.matches(5, 5));
        assert!(!CmpOp::Skip.matches(0, 0));
    }
}
