// Copyright The gr-ctxsw Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Register access abstraction.
//!
//! All hardware touches go through [`Mmio`] so the engine can run against the
//! real BAR0 aperture or against [`fake::FakeMmio`] in tests.

/// 32-bit register access to the GPU's privileged register space.
pub trait Mmio {
    /// Reads the register at byte offset `addr`.
    fn read(&self, addr: u32) -> u32;

    /// Writes `value` to the register at byte offset `addr`.
    fn write(&self, addr: u32, value: u32);

    /// Read-modify-write helper preserving bits outside `mask`.
    fn modify(&self, addr: u32, mask: u32, value: u32) {
        let old = self.read(addr);
        self.write(addr, (old & !mask) | (value & mask));
    }
}

/// In-memory register file for tests.
#[cfg(any(test, feature = "fakes"))]
pub mod fake {
    use super::Mmio;
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;
    use spin::mutex::SpinMutex;

    /// A side effect armed on a register write: when `on_write` is written
    /// (any value, or `value_eq` when set), store `set_value` at `set_addr`.
    /// Triggers on the same address fire in the order they were armed, one
    /// per write.
    #[derive(Debug, Clone, Copy)]
    struct WriteTrigger {
        on_write: u32,
        value_eq: Option<u32>,
        set_addr: u32,
        set_value: u32,
    }

    #[derive(Default)]
    struct State {
        regs: BTreeMap<u32, u32>,
        triggers: Vec<WriteTrigger>,
        clear_aliases: Vec<(u32, u32)>,
        writes: Vec<(u32, u32)>,
    }

    /// Scriptable register file.
    ///
    /// Reads of never-written registers return zero. Firmware behaviour is
    /// modelled with write triggers: arming "on write to METHOD_PUSH, set
    /// mailbox 0 to PASS" lets method submission paths run to completion.
    #[derive(Default)]
    pub struct FakeMmio {
        state: SpinMutex<State>,
    }

    impl FakeMmio {
        /// Creates an empty register file.
        pub fn new() -> Self {
            Self::default()
        }

        /// Presets a register value.
        pub fn set(&self, addr: u32, value: u32) {
            self.state.lock().regs.insert(addr, value);
        }

        /// Reads a register without going through the [`Mmio`] trait.
        pub fn get(&self, addr: u32) -> u32 {
            self.state.lock().regs.get(&addr).copied().unwrap_or(0)
        }

        /// Arms a trigger: the next write to `on_write` stores `set_value`
        /// at `set_addr`.
        pub fn on_write(&self, on_write: u32, set_addr: u32, set_value: u32) {
            self.state.lock().triggers.push(WriteTrigger {
                on_write,
                value_eq: None,
                set_addr,
                set_value,
            });
        }

        /// Like [`FakeMmio::on_write`] but only fires when the written value
        /// equals `value_eq`.
        pub fn on_write_value(&self, on_write: u32, value_eq: u32, set_addr: u32, set_value: u32) {
            self.state.lock().triggers.push(WriteTrigger {
                on_write,
                value_eq: Some(value_eq),
                set_addr,
                set_value,
            });
        }

        /// Models a write-to-clear register: writing `mask` to `clear_addr`
        /// clears those bits at `target`. Persistent, unlike triggers.
        pub fn clear_alias(&self, clear_addr: u32, target: u32) {
            self.state.lock().clear_aliases.push((clear_addr, target));
        }

        /// Number of writes made to `addr`.
        pub fn write_count(&self, addr: u32) -> usize {
            self.state
                .lock()
                .writes
                .iter()
                .filter(|(a, _)| *a == addr)
                .count()
        }

        /// Every `(addr, value)` written, in order.
        pub fn writes(&self) -> Vec<(u32, u32)> {
            self.state.lock().writes.clone()
        }

        /// Values written to `addr`, in order.
        pub fn writes_to(&self, addr: u32) -> Vec<u32> {
            self.state
                .lock()
                .writes
                .iter()
                .filter(|(a, _)| *a == addr)
                .map(|&(_, v)| v)
                .collect()
        }

        /// True when no armed trigger is left unconsumed.
        pub fn triggers_drained(&self) -> bool {
            self.state.lock().triggers.is_empty()
        }
    }

    impl Mmio for FakeMmio {
        fn read(&self, addr: u32) -> u32 {
            self.state.lock().regs.get(&addr).copied().unwrap_or(0)
        }

        fn write(&self, addr: u32, value: u32) {
            let mut state = self.state.lock();
            state.writes.push((addr, value));
            let alias = state
                .clear_aliases
                .iter()
                .find(|&&(c, _)| c == addr)
                .map(|&(_, t)| t);
            if let Some(target) = alias {
                let old = state.regs.get(&target).copied().unwrap_or(0);
                state.regs.insert(target, old & !value);
            } else {
                state.regs.insert(addr, value);
            }
            let hit = state.triggers.iter().position(|t| {
                t.on_write == addr && t.value_eq.is_none_or(|v| v == value)
            });
            if let Some(i) = hit {
                let t = state.triggers.remove(i);
                state.regs.insert(t.set_addr, t.set_value);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn unwritten_registers_read_zero() {
            let mmio = FakeMmio::new();
            assert_eq!(mmio.read(0x1000), 0);
        }

        #[test]
        fn triggers_fire_in_order_once_each() {
            let mmio = FakeMmio::new();
            mmio.on_write(0x10, 0x20, 1);
            mmio.on_write(0x10, 0x20, 2);
            mmio.write(0x10, 0xaa);
            assert_eq!(mmio.read(0x20), 1);
            mmio.write(0x10, 0xbb);
            assert_eq!(mmio.read(0x20), 2);
            assert!(mmio.triggers_drained());
        }

        #[test]
        fn clear_alias_clears_bits_in_target() {
            let mmio = FakeMmio::new();
            mmio.clear_alias(0x40, 0x44);
            mmio.set(0x44, 0xff);
            mmio.write(0x40, 0x0f);
            assert_eq!(mmio.read(0x44), 0xf0);
            assert_eq!(mmio.read(0x40), 0);
        }

        #[test]
        fn modify_preserves_unmasked_bits() {
            let mmio = FakeMmio::new();
            mmio.set(0x10, 0xff00);
            mmio.modify(0x10, 0x00ff, 0x0042);
            assert_eq!(mmio.read(0x10), 0xff42);
        }
    }
}
