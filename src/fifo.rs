// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Host fifo collaboration surface.
//!
//! Interrupt handling and SM debug need the channel scheduler: looking up
//! which channel owns a context, disabling and preempting channels around
//! recovery, and waking waiters on notify/semaphore completion. [`FifoOps`]
//! is that surface; the engine never reaches into fifo registers itself.

/// Error notifier codes posted to a faulting channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorNotifier {
    /// An illegal method was sent to the engine.
    GrErrorSwNotify,
    /// A semaphore operation timed out.
    GrSemaphoreTimeout,
    /// An illegal notify was requested.
    GrIllegalNotify,
    /// The engine raised an exception attributed to this channel.
    GrException,
}

/// Channel scheduler operations the engine invokes.
pub trait FifoOps {
    /// Channel id owning the instance block at `inst_ptr`, if any.
    fn lookup_channel(&self, inst_ptr: u64) -> Option<u32>;

    /// Removes `chid` from the runlist.
    fn disable_channel(&self, chid: u32);

    /// Reschedules `chid`.
    fn enable_channel(&self, chid: u32);

    /// Preempts `chid` off the engine.
    fn preempt_channel(&self, chid: u32);

    /// Stops the runlist scheduler from feeding the engine new work.
    fn disable_engine_activity(&self);

    /// Resumes scheduling onto the engine.
    fn enable_engine_activity(&self);

    /// True when an MMU fault involving the engine is pending.
    fn mmu_fault_pending(&self) -> bool;

    /// Tears down `chid` after an unrecoverable fault.
    fn recover_channel(&self, chid: u32);

    /// Posts `notifier` to `chid`'s error notifier buffer.
    fn set_error_notifier(&self, chid: u32, notifier: ErrorNotifier);

    /// Wakes waiters blocked on a notify from `chid`.
    fn wake_notify(&self, chid: u32);

    /// Wakes waiters blocked on semaphores.
    fn wake_semaphores(&self);

    /// Wakes the debugger event queue for `chid`.
    fn post_debugger_event(&self, chid: u32);
}

/// Recording test double for [`FifoOps`].
#[cfg(any(test, feature = "fakes"))]
pub mod fake {
    use super::{ErrorNotifier, FifoOps};
    use alloc::vec::Vec;
    use spin::mutex::SpinMutex;

    /// A call made on [`FakeFifo`], recorded in order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FifoCall {
        /// [`FifoOps::disable_channel`].
        Disable(u32),
        /// [`FifoOps::enable_channel`].
        Enable(u32),
        /// [`FifoOps::preempt_channel`].
        Preempt(u32),
        /// [`FifoOps::disable_engine_activity`].
        DisableActivity,
        /// [`FifoOps::enable_engine_activity`].
        EnableActivity,
        /// [`FifoOps::recover_channel`].
        Recover(u32),
        /// [`FifoOps::set_error_notifier`].
        Notifier(u32, ErrorNotifier),
        /// [`FifoOps::wake_notify`].
        WakeNotify(u32),
        /// [`FifoOps::wake_semaphores`].
        WakeSemaphores,
        /// [`FifoOps::post_debugger_event`].
        DebuggerEvent(u32),
    }

    /// Scheduler double that records calls and resolves channel lookups
    /// from a preset table.
    #[derive(Default)]
    pub struct FakeFifo {
        /// `(inst_ptr, chid)` pairs consulted by channel lookup.
        pub channels: SpinMutex<Vec<(u64, u32)>>,
        /// Whether an MMU fault should be reported pending.
        pub fault_pending: SpinMutex<bool>,
        calls: SpinMutex<Vec<FifoCall>>,
    }

    impl FakeFifo {
        /// Creates an empty double.
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers a channel for lookup.
        pub fn add_channel(&self, inst_ptr: u64, chid: u32) {
            self.channels.lock().push((inst_ptr, chid));
        }

        /// Calls recorded so far, in order.
        pub fn calls(&self) -> Vec<FifoCall> {
            self.calls.lock().clone()
        }
    }

    impl FifoOps for FakeFifo {
        fn lookup_channel(&self, inst_ptr: u64) -> Option<u32> {
            self.channels
                .lock()
                .iter()
                .find(|&&(p, _)| p == inst_ptr)
                .map(|&(_, c)| c)
        }

        fn disable_channel(&self, chid: u32) {
            self.calls.lock().push(FifoCall::Disable(chid));
        }

        fn enable_channel(&self, chid: u32) {
            self.calls.lock().push(FifoCall::Enable(chid));
        }

        fn preempt_channel(&self, chid: u32) {
            self.calls.lock().push(FifoCall::Preempt(chid));
        }

        fn disable_engine_activity(&self) {
            self.calls.lock().push(FifoCall::DisableActivity);
        }

        fn enable_engine_activity(&self) {
            self.calls.lock().push(FifoCall::EnableActivity);
        }

        fn mmu_fault_pending(&self) -> bool {
            *self.fault_pending.lock()
        }

        fn recover_channel(&self, chid: u32) {
            self.calls.lock().push(FifoCall::Recover(chid));
        }

        fn set_error_notifier(&self, chid: u32, notifier: ErrorNotifier) {
            self.calls.lock().push(FifoCall::Notifier(chid, notifier));
        }

        fn wake_notify(&self, chid: u32) {
            self.calls.lock().push(FifoCall::WakeNotify(chid));
        }

        fn wake_semaphores(&self) {
            self.calls.lock().push(FifoCall::WakeSemaphores);
        }

        fn post_debugger_event(&self, chid: u32) {
            self.calls.lock().push(FifoCall::DebuggerEvent(chid));
        }
    }
}
