//! Exception vector table and the assembly trampoline into [`crate::trap`]
//! (component E).
//!
//! AArch64 has one 2 KiB-aligned vector table with 16 entries: four
//! exception kinds (synchronous, IRQ, FIQ, SError) crossed with four
//! sources (current EL with SP0, current EL with SPx, lower EL running
//! AArch64, lower EL running AArch32). Only "current EL w/ SPx" (kernel
//! faults) and "lower EL AArch64" (everything from userspace) are
//! meaningful on this target; the others panic immediately if ever taken.

use core::arch::global_asm;

use crate::trap::TrapFrame;

global_asm!(
    r#"
.macro SAVE_CONTEXT
    sub     sp, sp, #288
    stp     x0,  x1,  [sp, #0]
    stp     x2,  x3,  [sp, #16]
    stp     x4,  x5,  [sp, #32]
    stp     x6,  x7,  [sp, #48]
    stp     x8,  x9,  [sp, #64]
    stp     x10, x11, [sp, #80]
    stp     x12, x13, [sp, #96]
    stp     x14, x15, [sp, #112]
    stp     x16, x17, [sp, #128]
    stp     x18, x19, [sp, #144]
    stp     x20, x21, [sp, #160]
    stp     x22, x23, [sp, #176]
    stp     x24, x25, [sp, #192]
    stp     x26, x27, [sp, #208]
    stp     x28, x29, [sp, #224]
    mrs     x0, sp_el0
    mrs     x1, elr_el1
    stp     x30, x0,  [sp, #240]
    mrs     x0, esr_el1
    mrs     x2, spsr_el1
    stp     x1, x0,   [sp, #256]
    str     x2,       [sp, #272]
.endm

.macro RESTORE_CONTEXT
    ldp     x1, x0, [sp, #256]
    msr     elr_el1, x1
    ldr     x2,     [sp, #272]
    msr     spsr_el1, x2
    ldp     x30, x0, [sp, #240]
    msr     sp_el0, x0
    ldp     x28, x29, [sp, #224]
    ldp     x26, x27, [sp, #208]
    ldp     x24, x25, [sp, #192]
    ldp     x22, x23, [sp, #176]
    ldp     x20, x21, [sp, #160]
    ldp     x18, x19, [sp, #144]
    ldp     x16, x17, [sp, #128]
    ldp     x14, x15, [sp, #112]
    ldp     x12, x13, [sp, #96]
    ldp     x10, x11, [sp, #80]
    ldp     x8,  x9,  [sp, #64]
    ldp     x6,  x7,  [sp, #48]
    ldp     x4,  x5,  [sp, #32]
    ldp     x2,  x3,  [sp, #16]
    ldp     x0,  x1,  [sp, #0]
    add     sp, sp, #288
.endm

.align 11
.global vector_table_el1
vector_table_el1:
    // Current EL, SP0 -- never taken (we never run with SP0 selected).
.align 7
    b       exc_invalid
.align 7
    b       exc_invalid
.align 7
    b       exc_invalid
.align 7
    b       exc_invalid
    // Current EL, SPx -- kernel-mode fault.
.align 7
    SAVE_CONTEXT
    mov     x0, sp
    bl      rust_trap_sync_current_el
    RESTORE_CONTEXT
    eret
.align 7
    SAVE_CONTEXT
    mov     x0, sp
    bl      rust_trap_irq
    RESTORE_CONTEXT
    eret
.align 7
    b       exc_invalid
.align 7
    SAVE_CONTEXT
    mov     x0, sp
    bl      rust_trap_serror
    RESTORE_CONTEXT
    eret
    // Lower EL, AArch64 -- userspace.
.align 7
    SAVE_CONTEXT
    mov     x0, sp
    bl      rust_trap_sync_lower
    RESTORE_CONTEXT
    eret
.align 7
    SAVE_CONTEXT
    mov     x0, sp
    bl      rust_trap_irq
    RESTORE_CONTEXT
    eret
.align 7
    b       exc_invalid
.align 7
    SAVE_CONTEXT
    mov     x0, sp
    bl      rust_trap_serror
    RESTORE_CONTEXT
    eret
    // Lower EL, AArch32 -- not supported on this target.
.align 7
    b       exc_invalid
.align 7
    b       exc_invalid
.align 7
    b       exc_invalid
.align 7
    b       exc_invalid

exc_invalid:
    bl      rust_trap_unreachable
    b       exc_invalid
"#
);

extern "C" {
    fn vector_table_el1();
}

/// Point `VBAR_EL1` at the kernel's exception vector table. Must be called
/// once, late in boot, after every handler it can dispatch to (syscall
/// table, IRQ manager, scheduler) is initialized.
pub fn install_vector_table() {
    // SAFETY: `vector_table_el1` is a 2 KiB-aligned, fully-populated vector
    // table defined above; writing VBAR_EL1 simply tells the CPU where to
    // find it. No exception can be taken between this write and `isb`
    // because IRQs are still masked at this point in boot.
    unsafe {
        core::arch::asm!(
            "msr VBAR_EL1, {}",
            "isb",
            in(reg) vector_table_el1 as usize,
        );
    }
}

#[no_mangle]
extern "C" fn rust_trap_sync_current_el(frame: *mut TrapFrame) {
    // SAFETY: `frame` points at the 288-byte region `SAVE_CONTEXT` just
    // built on this exception's stack; it is valid for the duration of
    // this call and not aliased elsewhere.
    let frame = unsafe { &mut *frame };
    crate::trap::handle_sync_kernel(frame);
}

#[no_mangle]
extern "C" fn rust_trap_sync_lower(frame: *mut TrapFrame) {
    // SAFETY: see `rust_trap_sync_current_el`.
    let frame = unsafe { &mut *frame };
    crate::trap::handle_sync_user(frame);
}

#[no_mangle]
extern "C" fn rust_trap_irq(frame: *mut TrapFrame) {
    // SAFETY: see `rust_trap_sync_current_el`.
    let frame = unsafe { &mut *frame };
    crate::trap::handle_irq(frame);
}

#[no_mangle]
extern "C" fn rust_trap_serror(frame: *mut TrapFrame) {
    // SAFETY: see `rust_trap_sync_current_el`.
    let frame = unsafe { &mut *frame };
    crate::trap::handle_serror(frame);
}

#[no_mangle]
extern "C" fn rust_trap_unreachable() -> ! {
    panic!("unreachable AArch32/SP0 exception taken");
}
