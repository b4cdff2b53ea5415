//! Low-level MMU register access: MAIR/TCR/SCTLR configuration and
//! TTBR0/ASID activation. The table-walking logic itself lives in
//! [`crate::mm::page_table`]; this module only knows how to point the CPU
//! at a table and invalidate the TLB.

use core::arch::asm;

/// Memory attribute indices, matching the `MemoryType` encoding used by
/// [`crate::mm::page_table::PageFlags`].
pub const MAIR_IDX_NORMAL_CACHED: u64 = 0;
pub const MAIR_IDX_NORMAL_UNCACHED: u64 = 1;
pub const MAIR_IDX_DEVICE_NGNRNE: u64 = 2;
pub const MAIR_IDX_DEVICE_NGRE: u64 = 3;

const MAIR_VALUE: u64 = (0xFFu64 << (MAIR_IDX_NORMAL_CACHED * 8))
    | (0x44u64 << (MAIR_IDX_NORMAL_UNCACHED * 8))
    | (0x00u64 << (MAIR_IDX_DEVICE_NGNRNE * 8))
    | (0x04u64 << (MAIR_IDX_DEVICE_NGRE * 8));

/// Configure MAIR_EL1/TCR_EL1 and enable the MMU with the given level-1
/// (PGD) table for TTBR1 (kernel, upper half) and TTBR0 left unset until
/// the first process address space is activated.
///
/// # Safety
/// Must be called exactly once, early in boot, before any code relies on
/// virtual-to-physical translation behaving consistently, and `ttbr1_pgd`
/// must be the physical address of a valid, zeroed top-level table.
pub unsafe fn enable(ttbr1_pgd: u64) {
    // T0SZ/T1SZ = 16 (48-bit VA), 4 KiB granule, inner/outer write-back
    // cacheable, inner-shareable.
    let tcr: u64 = (16 << 0)   // T0SZ
        | (16 << 16)           // T1SZ
        | (1 << 8)             // IRGN0 = WBWA
        | (1 << 10)            // ORGN0 = WBWA
        | (3 << 12)            // SH0 = inner shareable
        | (0 << 14)            // TG0 = 4KiB
        | (1 << 24)            // IRGN1 = WBWA
        | (1 << 26)            // ORGN1 = WBWA
        | (3 << 28)            // SH1 = inner shareable
        | (2u64 << 30)         // TG1 = 4KiB (encoding differs from TG0)
        | (1u64 << 36); // IPS = 40-bit (1 TiB), ample for a Pi's RAM

    // SAFETY: caller contract above; these are the standard AArch64
    // bring-up register writes, each followed by the required barrier.
    unsafe {
        asm!("msr MAIR_EL1, {}", in(reg) MAIR_VALUE);
        asm!("msr TCR_EL1, {}", in(reg) tcr);
        asm!("msr TTBR1_EL1, {}", in(reg) ttbr1_pgd);
        asm!("isb");

        let mut sctlr: u64;
        asm!("mrs {}, SCTLR_EL1", out(reg) sctlr);
        sctlr |= 1 << 0; // M: MMU enable
        sctlr |= 1 << 2; // C: data cache enable
        sctlr |= 1 << 12; // I: instruction cache enable
        asm!("msr SCTLR_EL1, {}", in(reg) sctlr);
        asm!("isb");
    }
}

/// Switch the current process address space: write TTBR0_EL1 with the new
/// PGD and ASID, and invalidate the outgoing ASID's TLB entries.
///
/// # Safety
/// `pgd_phys` must be a valid top-level table physical address, and the
/// caller must not be relying on any TTBR0-mapped memory surviving the
/// switch.
pub unsafe fn activate_user_table(pgd_phys: u64, asid: u8) {
    let ttbr0 = pgd_phys | ((asid as u64) << 48);
    // SAFETY: per caller contract; write-then-barrier-then-invalidate is
    // the ordering ARM requires for a TTBR0 switch.
    unsafe {
        asm!("msr TTBR0_EL1, {}", in(reg) 0u64);
        asm!("isb");
        asm!("msr TTBR0_EL1, {}", in(reg) ttbr0);
        asm!("isb");
        invalidate_tlb_asid(asid);
    }
}

/// Invalidate every TLB entry tagged with `asid`.
///
/// # Safety
/// Must only be called with interrupts masked or while holding whatever
/// lock protects concurrent table edits for that address space.
pub unsafe fn invalidate_tlb_asid(asid: u8) {
    let arg = (asid as u64) << 48;
    // SAFETY: TLBI ASIDE1IS is always a valid instruction; it affects only
    // TLB state, never memory, so it cannot itself be unsafe beyond the
    // ordering guarantees documented on the caller.
    unsafe {
        asm!("dsb ishst", "tlbi aside1is, {}", "dsb ish", "isb", in(reg) arg);
    }
}

/// Invalidate every TLB entry for a single page, tagged with `asid` (or
/// untagged/global if `asid` is `None`, used for kernel mappings).
///
/// # Safety
/// Same ordering requirements as [`invalidate_tlb_asid`].
pub unsafe fn invalidate_tlb_page(va: usize, asid: Option<u8>) {
    let page = (va as u64) >> 12;
    // SAFETY: see function doc.
    unsafe {
        match asid {
            Some(asid) => {
                let arg = ((asid as u64) << 48) | page;
                asm!("dsb ishst", "tlbi vae1is, {}", "dsb ish", "isb", in(reg) arg);
            }
            None => {
                asm!("dsb ishst", "tlbi vaae1is, {}", "dsb ish", "isb", in(reg) page);
            }
        }
    }
}

/// Read the currently active TTBR0 physical base (without the ASID bits).
pub fn current_ttbr0() -> u64 {
    let ttbr0: u64;
    // SAFETY: reading TTBR0_EL1 has no side effects.
    unsafe {
        asm!("mrs {}, TTBR0_EL1", out(reg) ttbr0);
    }
    ttbr0 & 0x0000_FFFF_FFFF_F000
}
