//! ARM GICv2 distributor + CPU interface, as wired on the BCM2711 (Pi 4).
//!
//! Only the subset the kernel needs is modelled: enabling/disabling an SPI
//! by number, acknowledging the highest-priority pending interrupt, and
//! signalling end-of-interrupt. Priority and affinity routing are left at
//! their power-on defaults (every SPI targets CPU 0, the only core this
//! kernel ever configures).

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::register_structs;

register_structs! {
    #[allow(non_snake_case)]
    DistributorRegs {
        (0x000 => CTLR: ReadWrite<u32>),
        (0x004 => TYPER: ReadOnly<u32>),
        (0x008 => _reserved0),
        (0x100 => ISENABLER: [ReadWrite<u32>; 32]),
        (0x180 => ICENABLER: [ReadWrite<u32>; 32]),
        (0x200 => _reserved1),
        (0xC00 => @END),
    }
}

register_structs! {
    #[allow(non_snake_case)]
    CpuInterfaceRegs {
        (0x00 => CTLR: ReadWrite<u32>),
        (0x04 => PMR: ReadWrite<u32>),
        (0x08 => _reserved0),
        (0x0C => IAR: ReadOnly<u32>),
        (0x10 => EOIR: ReadWrite<u32>),
        (0x14 => @END),
    }
}

/// IAR/EOIR interrupt ID field; bits above this are CPU-affinity routing
/// info the kernel doesn't use.
const SPURIOUS_ID: u32 = 1023;

pub struct Gic {
    gicd: *mut DistributorRegs,
    gicc: *mut CpuInterfaceRegs,
}

// SAFETY: the distributor and CPU interface are only ever touched from the
// single core this kernel runs on, under the IRQ manager's lock.
unsafe impl Send for Gic {}

impl Gic {
    pub fn init(gicd_base: usize, gicc_base: usize) -> Self {
        let gic = Self {
            gicd: gicd_base as *mut DistributorRegs,
            gicc: gicc_base as *mut CpuInterfaceRegs,
        };
        // SAFETY: `gicd_base`/`gicc_base` came from the device tree's
        // `arm,gic-400` `reg` property and are not aliased elsewhere.
        unsafe {
            (*gic.gicd).CTLR.set(1);
            (*gic.gicc).PMR.set(0xFF);
            (*gic.gicc).CTLR.set(1);
        }
        gic
    }

    pub fn enable(&self, id: u32) {
        let (word, bit) = (id / 32, id % 32);
        // SAFETY: `word` is always < 32 for any `id` < 1024, within
        // `ISENABLER`'s bounds.
        unsafe {
            (*self.gicd).ISENABLER[word as usize].set(1 << bit);
        }
    }

    pub fn disable(&self, id: u32) {
        let (word, bit) = (id / 32, id % 32);
        // SAFETY: see `enable`.
        unsafe {
            (*self.gicd).ICENABLER[word as usize].set(1 << bit);
        }
    }

    /// Reads IAR, returning the pending interrupt's ID or `None` if the
    /// read came back spurious (nothing pending).
    pub fn acknowledge(&self) -> Option<u32> {
        // SAFETY: IAR is always readable once the CPU interface is enabled.
        let id = unsafe { (*self.gicc).IAR.get() } & 0x3FF;
        if id == SPURIOUS_ID {
            None
        } else {
            Some(id)
        }
    }

    pub fn eoi(&self, id: u32) {
        // SAFETY: EOIR accepts back the exact value most recently read
        // from IAR.
        unsafe {
            (*self.gicc).EOIR.set(id);
        }
    }
}

#[cfg(test)]
mod tests {
    // The GICv2 register block requires real MMIO; there is no host-side
    // behaviour to unit test beyond what `IrqManager` already covers
    // against a fake `Controller`.
}
