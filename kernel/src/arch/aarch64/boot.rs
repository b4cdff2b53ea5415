//! Entry point and startup sequencing (component L).
//!
//! Firmware hands control to `_start` in EL2 or EL1 with the device-tree
//! blob's physical address in `x0`. The assembly stub below parks every
//! core but the primary one (there is exactly one core on this target —
//! SMP is out of scope — but firmware may still release all cores), drops
//! to EL1 if necessary, sets up a stack, zeroes BSS, and calls
//! [`kernel_main`] with the DTB pointer preserved in `x0`.

use core::arch::{asm, global_asm};

global_asm!(
    r#"
.section .text.boot
.global _start

_start:
    // Only continue on the core whose MPIDR affinity bits are all zero;
    // the others park in a low-power wait loop.
    mrs     x1, mpidr_el1
    and     x1, x1, #0xff
    cbz     x1, 2f
1:
    wfe
    b       1b
2:
    // Drop EL2 -> EL1 if firmware entered us at EL2.
    mrs     x1, CurrentEL
    lsr     x1, x1, #2
    cmp     x1, #2
    b.ne    3f
    mov     x1, #0x3c5          // EL1h, DAIF masked
    msr     spsr_el2, x1
    adr     x1, 3f
    msr     elr_el2, x1
    mov     x1, #0x31           // RW=1 (aarch64), HCE, SWIO
    msr     hcr_el2, x1
    eret
3:
    ldr     x1, =__boot_stack_top
    mov     sp, x1
    bl      _start_rust
"#
);

extern "C" {
    static mut __bss_start: u8;
    static mut __bss_end: u8;
}

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn _start_rust(dtb_phys_addr: usize) -> ! {
    // SAFETY: `__bss_start`/`__bss_end` are linker-script symbols bounding
    // the BSS section; no other code has run yet, so nothing aliases it.
    unsafe {
        let start = &raw mut __bss_start as *mut u8;
        let end = &raw mut __bss_end as *mut u8;
        let len = end as usize - start as usize;
        core::ptr::write_bytes(start, 0, len);
    }
    kernel_main(dtb_phys_addr)
}

/// Subsystem init in the order the design mandates (A through K), each
/// phase logged the way the reference kernel logs its own boot phases.
fn kernel_main(dtb_phys_addr: usize) -> ! {
    crate::logger::init();
    log::info!("boot: pi-kernel v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("boot: EL{}", super::current_el());

    log::info!("boot: [A] parsing device tree at {:#x}", dtb_phys_addr);
    let dtb = crate::dtb::DeviceTree::from_physical(dtb_phys_addr)
        .unwrap_or_else(|e| panic!("malformed device tree: {:?}", e));

    if let Some(uart_base) = dtb.pl011_base() {
        crate::serial::set_base(uart_base);
    }

    log::info!("boot: [B] initializing page allocators");
    crate::mm::phys_alloc::init(&dtb).unwrap_or_else(|e| panic!("frame allocator init: {:?}", e));

    log::info!("boot: [C] building kernel page tables");
    crate::mm::page_table::init().unwrap_or_else(|e| panic!("kernel page table init: {:?}", e));

    log::info!("boot: [D] mapping kernel heap");
    crate::mm::heap::init().unwrap_or_else(|e| panic!("heap mapping: {:?}", e));

    log::info!("boot: [H] bringing up interrupt controller, timer, and DMA");
    crate::irq::init(&dtb).unwrap_or_else(|e| panic!("interrupt controller init: {:?}", e));
    crate::timer::init(&dtb).unwrap_or_else(|e| panic!("system timer init: {:?}", e));
    if let Err(e) = crate::dma::init(&dtb) {
        log::warn!("boot: no DMA controller available: {:?}", e);
    }

    log::info!("boot: [F/G] initializing tasks and scheduler");
    crate::sched::init();

    log::info!("boot: [I] message queues and wait lists are lazily created per-task");

    log::info!("boot: [J/K] input routing and window manager");
    crate::input::init();
    crate::wm::init(&dtb).unwrap_or_else(|e| panic!("window manager init: {:?}", e));

    log::info!("boot: [E] enabling exceptions");
    super::exception::install_vector_table();
    super::irq_enable();

    log::info!("boot: init complete, entering idle loop");
    loop {
        crate::sched::schedule();
        super::idle();
    }
}

/// Read the stack pointer at the moment of a fault, for crash reports.
pub fn current_sp() -> usize {
    let sp: usize;
    // SAFETY: reading `sp` into a general register has no side effects.
    unsafe {
        asm!("mov {}, sp", out(reg) sp);
    }
    sp
}
