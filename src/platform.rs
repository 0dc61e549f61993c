// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Platform services: timing, polling policy, cache maintenance.
//!
//! Everything the engine needs from the surrounding system that is not a
//! register access or a memory allocation comes in through [`Platform`].
//! Poll loops are driven by [`PollTimer`], which implements the exponential
//! backoff used throughout the engine and the rule that timeouts only fire
//! on silicon.

use crate::error::{GrError, Result, TimeoutKind};

/// Tuning knobs for a poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Attempts before a loop gives up (on silicon).
    pub max_attempts: u32,
    /// Initial delay between attempts, microseconds.
    pub base_delay_us: u32,
    /// Ceiling the backoff doubles up to, microseconds.
    pub max_delay_us: u32,
    /// Whether loops may spin forever when not on silicon.
    pub allow_unbounded_on_non_hw: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10_000,
            base_delay_us: 10,
            max_delay_us: 200,
            allow_unbounded_on_non_hw: true,
        }
    }
}

/// Host environment services required by the engine.
pub trait Platform {
    /// True when running on real hardware. Poll timeouts are only enforced
    /// here; simulators may legitimately take unbounded time.
    fn is_silicon(&self) -> bool;

    /// True when running on a functional simulator, which skips some
    /// hardware handshakes entirely.
    fn is_simulation(&self) -> bool;

    /// Busy-wait for `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Sleep for `us` microseconds; may yield the CPU. Contexts that cannot
    /// sleep use [`Platform::delay_us`] instead.
    fn sleep_us(&self, us: u32) {
        self.delay_us(us);
    }

    /// Flush and invalidate L2 ahead of the falcon reading buffers the CPU
    /// just wrote.
    fn l2_flush_invalidate(&self) {}

    /// Polling policy for this platform.
    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::default()
    }
}

/// Expiring backoff timer for register poll loops.
pub struct PollTimer<'p> {
    platform: &'p dyn Platform,
    policy: PollPolicy,
    delay_us: u32,
    attempts: u32,
    blocking: bool,
}

impl<'p> PollTimer<'p> {
    /// Starts a timer. `blocking` selects [`Platform::sleep_us`] over
    /// [`Platform::delay_us`] between attempts.
    pub fn new(platform: &'p dyn Platform, blocking: bool) -> Self {
        let policy = platform.poll_policy();
        Self {
            platform,
            delay_us: policy.base_delay_us,
            attempts: 0,
            blocking,
            policy,
        }
    }

    /// Whether the loop has run out of attempts.
    pub fn expired(&self) -> bool {
        if !self.platform.is_silicon() && self.policy.allow_unbounded_on_non_hw {
            return false;
        }
        self.attempts >= self.policy.max_attempts
    }

    /// Converts an expired timer into the matching error.
    pub fn check(&self, kind: TimeoutKind) -> Result<()> {
        if self.expired() {
            Err(GrError::Timeout(kind))
        } else {
            Ok(())
        }
    }

    /// Waits one backoff interval and doubles the delay up to the cap.
    pub fn wait(&mut self) {
        if self.blocking {
            self.platform.sleep_us(self.delay_us);
        } else {
            self.platform.delay_us(self.delay_us);
        }
        self.delay_us = (self.delay_us << 1).min(self.policy.max_delay_us);
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Test double for [`Platform`].
#[cfg(any(test, feature = "fakes"))]
pub mod fake {
    use super::{Platform, PollPolicy};

    /// A platform whose delays are no-ops and whose poll budget is small.
    #[derive(Debug, Clone, Copy)]
    pub struct FakePlatform {
        /// Reported by [`Platform::is_silicon`].
        pub silicon: bool,
        /// Reported by [`Platform::is_simulation`].
        pub simulation: bool,
        /// Poll attempt budget.
        pub max_attempts: u32,
    }

    impl Default for FakePlatform {
        fn default() -> Self {
            Self {
                silicon: true,
                simulation: false,
                max_attempts: 8,
            }
        }
    }

    impl Platform for FakePlatform {
        fn is_silicon(&self) -> bool {
            self.silicon
        }

        fn is_simulation(&self) -> bool {
            self.simulation
        }

        fn delay_us(&self, _us: u32) {}

        fn poll_policy(&self) -> PollPolicy {
            PollPolicy {
                max_attempts: self.max_attempts,
                base_delay_us: 1,
                max_delay_us: 4,
                allow_unbounded_on_non_hw: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakePlatform;
    use super::*;

    #[test]
    fn timer_expires_on_silicon() {
        let plat = FakePlatform {
            max_attempts: 3,
            ..FakePlatform::default()
        };
        let mut timer = PollTimer::new(&plat, false);
        assert!(!timer.expired());
        timer.wait();
        timer.wait();
        timer.wait();
        assert!(timer.expired());
        assert!(matches!(
            timer.check(TimeoutKind::EngineIdle),
            Err(GrError::Timeout(TimeoutKind::EngineIdle))
        ));
    }

    #[test]
    fn delay_doubles_to_cap() {
        let plat = FakePlatform::default();
        let mut timer = PollTimer::new(&plat, false);
        assert_eq!(timer.delay_us, 1);
        timer.wait();
        assert_eq!(timer.delay_us, 2);
        timer.wait();
        assert_eq!(timer.delay_us, 4);
        timer.wait();
        assert_eq!(timer.delay_us, 4);
    }

    #[test]
    fn non_silicon_unbounded_when_allowed() {
        struct SimPlatform;
        impl Platform for SimPlatform {
            fn is_silicon(&self) -> bool {
                false
            }
            fn is_simulation(&self) -> bool {
                true
            }
            fn delay_us(&self, _us: u32) {}
            fn poll_policy(&self) -> PollPolicy {
                PollPolicy {
                    max_attempts: 1,
                    allow_unbounded_on_non_hw: true,
                    ..PollPolicy::default()
                }
            }
        }
        let plat = SimPlatform;
        let mut timer = PollTimer::new(&plat, false);
        for _ in 0..10 {
            timer.wait();
        }
        assert!(!timer.expired());
    }
}
