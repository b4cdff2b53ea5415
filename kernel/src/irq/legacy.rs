//! BCM2837 (Pi 3) legacy interrupt controller: separate pending/enable/
//! disable registers for the 64 GPU-routed IRQs plus the 8 "basic" ARM
//! IRQs, with no distinction between acknowledge and end-of-interrupt —
//! the controller just reports what's pending; clearing the source is the
//! device driver's job, and the kernel's EOI is therefore a no-op.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::register_structs;

register_structs! {
    #[allow(non_snake_case)]
    LegacyRegs {
        (0x00 => IRQ_BASIC_PENDING: ReadOnly<u32>),
        (0x04 => IRQ_PENDING_1: ReadOnly<u32>),
        (0x08 => IRQ_PENDING_2: ReadOnly<u32>),
        (0x0C => FIQ_CONTROL: ReadWrite<u32>),
        (0x10 => ENABLE_IRQS_1: ReadWrite<u32>),
        (0x14 => ENABLE_IRQS_2: ReadWrite<u32>),
        (0x18 => ENABLE_BASIC_IRQS: ReadWrite<u32>),
        (0x1C => DISABLE_IRQS_1: ReadWrite<u32>),
        (0x20 => DISABLE_IRQS_2: ReadWrite<u32>),
        (0x24 => DISABLE_BASIC_IRQS: ReadWrite<u32>),
        (0x28 => @END),
    }
}

/// GPU IRQs 0-31 live in bank 1, 32-63 in bank 2; basic (ARM-local) IRQs
/// are numbered from 64 and use the separate basic-enable bank.
const BASIC_BASE: u32 = 64;

pub struct LegacyController {
    regs: *mut LegacyRegs,
}

// SAFETY: touched only from the single core this kernel runs on, under the
// IRQ manager's lock.
unsafe impl Send for LegacyController {}

impl LegacyController {
    pub fn init(base: usize) -> Self {
        Self {
            regs: base as *mut LegacyRegs,
        }
    }

    pub fn enable(&self, id: u32) {
        // SAFETY: `base` came from the device tree's
        // `brcm,bcm2836-armctrl-ic` `reg` property and is not aliased
        // elsewhere.
        unsafe {
            if id < 32 {
                (*self.regs).ENABLE_IRQS_1.set(1 << id);
            } else if id < BASIC_BASE {
                (*self.regs).ENABLE_IRQS_2.set(1 << (id - 32));
            } else {
                (*self.regs).ENABLE_BASIC_IRQS.set(1 << (id - BASIC_BASE));
            }
        }
    }

    pub fn disable(&self, id: u32) {
        // SAFETY: see `enable`.
        unsafe {
            if id < 32 {
                (*self.regs).DISABLE_IRQS_1.set(1 << id);
            } else if id < BASIC_BASE {
                (*self.regs).DISABLE_IRQS_2.set(1 << (id - 32));
            } else {
                (*self.regs).DISABLE_BASIC_IRQS.set(1 << (id - BASIC_BASE));
            }
        }
    }

    /// Scans basic, then bank 1, then bank 2, for the lowest-numbered
    /// pending IRQ. Unlike the GIC there's no single "the" pending
    /// interrupt register, so priority among simultaneously pending
    /// sources is this scan order.
    pub fn acknowledge(&self) -> Option<u32> {
        // SAFETY: all three pending registers are always readable.
        let (basic, p1, p2) = unsafe {
            (
                (*self.regs).IRQ_BASIC_PENDING.get(),
                (*self.regs).IRQ_PENDING_1.get(),
                (*self.regs).IRQ_PENDING_2.get(),
            )
        };
        if p1 != 0 {
            Some(p1.trailing_zeros())
        } else if p2 != 0 {
            Some(32 + p2.trailing_zeros())
        } else if basic != 0 {
            Some(BASIC_BASE + basic.trailing_zeros())
        } else {
            None
        }
    }

    /// The legacy controller has no explicit EOI; the pending bit clears
    /// itself once the device's own interrupt-clear register is written,
    /// which is the driver's responsibility.
    pub fn eoi(&self, _id: u32) {}
}

#[cfg(test)]
mod tests {
    // Register access requires real MMIO; `IrqManager`'s tests exercise
    // the dispatch logic against a fake `Controller` instead.
}
