//! Exception classification and syscall dispatch (component E).
//!
//! The assembly trampoline in [`crate::arch::aarch64::exception`] saves the
//! full register file to the faulting stack and calls one of the four
//! handlers below with a pointer to it. From here execution is ordinary
//! Rust: classify the ESR, either run the syscall table, attribute and
//! handle a fault, or dispatch a pending IRQ.

use crate::error::KernelResult;

/// Mirrors the layout `SAVE_CONTEXT` builds on the exception stack.
#[repr(C)]
pub struct TrapFrame {
    /// x0..x29.
    pub x: [u64; 30],
    pub x30: u64,
    pub sp_el0: u64,
    pub elr_el1: u64,
    pub esr_el1: u64,
    pub spsr_el1: u64,
    _pad: u64,
}

impl TrapFrame {
    pub fn arg(&self, n: usize) -> u64 {
        self.x[n]
    }

    pub fn set_return(&mut self, value: i64) {
        self.x[0] = value as u64;
    }

    pub fn syscall_id(&self) -> u32 {
        self.x[8] as u32
    }
}

/// Decoded ARM "Exception Class" field of ESR_EL1 (bits [31:26]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionClass {
    Svc64,
    InstructionAbortLowerEl,
    InstructionAbortCurrentEl,
    DataAbortLowerEl,
    DataAbortCurrentEl,
    PcAlignmentFault,
    SpAlignmentFault,
    FpTrap,
    Other(u8),
}

impl ExceptionClass {
    pub fn decode(esr: u64) -> Self {
        match (esr >> 26) & 0x3F {
            0x15 => Self::Svc64,
            0x20 => Self::InstructionAbortLowerEl,
            0x21 => Self::InstructionAbortCurrentEl,
            0x24 => Self::DataAbortLowerEl,
            0x25 => Self::DataAbortCurrentEl,
            0x22 => Self::PcAlignmentFault,
            0x26 => Self::SpAlignmentFault,
            0x07 | 0x2C => Self::FpTrap,
            other => Self::Other(other as u8),
        }
    }
}

/// ESR.IL: 1 if the trapped instruction was the 32-bit encoding (always
/// true for AArch64 `svc`, kept explicit per the spec's PC-rewind rule).
fn esr_il(esr: u64) -> bool {
    esr & (1 << 25) != 0
}

/// Faulting address for a data/instruction abort, read from FAR_EL1.
fn far() -> usize {
    let far: u64;
    // SAFETY: FAR_EL1 is always readable; it has no side effects and is
    // only meaningful right after an abort, which is the only place this
    // is called from.
    unsafe {
        core::arch::asm!("mrs {}, FAR_EL1", out(reg) far);
    }
    far as usize
}

/// Synchronous exception taken from EL0 (userspace): syscalls and
/// attributable user faults.
pub fn handle_sync_user(frame: &mut TrapFrame) {
    match ExceptionClass::decode(frame.esr_el1) {
        ExceptionClass::Svc64 => {
            let id = frame.syscall_id();
            let result: KernelResult<i64> = crate::syscall::dispatch(frame);
            let rewind = esr_il(frame.esr_el1);
            match result {
                Ok(value) => frame.set_return(value),
                Err(e) => {
                    if e == crate::error::KernelError::WouldBlock {
                        // Task was parked on a wait list; restart the SVC
                        // on wake by rewinding PC, do not write a result.
                        frame.elr_el1 -= if rewind { 4 } else { 2 };
                    } else {
                        log::warn!("syscall {} failed: {}", id, e);
                        frame.set_return(e.to_errno());
                    }
                }
            }
        }
        ExceptionClass::InstructionAbortLowerEl | ExceptionClass::DataAbortLowerEl => {
            log::warn!(
                "user fault: pid={:?} pc={:#x} far={:#x} esr={:#x}",
                crate::sched::current_pid(),
                frame.elr_el1,
                far(),
                frame.esr_el1
            );
            crate::sched::terminate_current(crate::sched::ExitReason::Fault);
        }
        ExceptionClass::PcAlignmentFault | ExceptionClass::SpAlignmentFault => {
            log::warn!("alignment fault at pc={:#x}", frame.elr_el1);
            crate::sched::terminate_current(crate::sched::ExitReason::Fault);
        }
        ExceptionClass::FpTrap => {
            // Lazy FPU context; not modeled further here: simply enable
            // and retry, since only one task touches FP state at a time
            // on a single core.
            crate::arch::aarch64::context::enable_fpu_and_retry();
        }
        ExceptionClass::Other(ec) => {
            log::warn!("unhandled user exception class {:#x}", ec);
            crate::sched::terminate_current(crate::sched::ExitReason::Fault);
        }
    }
}

/// Synchronous exception from EL1 (kernel): always fatal.
pub fn handle_sync_kernel(frame: &mut TrapFrame) -> ! {
    panic!(
        "kernel exception: ec={:?} pc={:#x} far={:#x} esr={:#x}",
        ExceptionClass::decode(frame.esr_el1),
        frame.elr_el1,
        far(),
        frame.esr_el1
    );
}

/// Any IRQ: poll the controller, dispatch registered handlers, EOI. May be
/// taken with the current task either in user or kernel mode; either way
/// the scheduler may pick a different task to resume into.
pub fn handle_irq(_frame: &mut TrapFrame) {
    crate::irq::dispatch_pending();
}

pub fn handle_serror(frame: &mut TrapFrame) -> ! {
    panic!("SError taken: esr={:#x} pc={:#x}", frame.esr_el1, frame.elr_el1);
}
