//! Per-process address spaces, each tagged with an ASID so the TLB does
//! not need a full flush on every context switch.

use spin::Mutex;

use crate::error::{KernelResult, MmError};

use super::page_table::{AddressSpaceTable, MapSize};
use super::{phys_alloc, PageFlags, VirtAddr, PAGE_SIZE};

/// ARMv8 ASIDs are 8 bits wide when `TCR_EL1.AS` selects the 8-bit scheme,
/// which is what [`crate::arch::aarch64::mmu`] configures.
const MAX_ASID: usize = 256;

/// Base of the per-process heap, chosen well above any reasonable ELF
/// load address and well below [`crate::task::USER_STACK_TOP`]'s region.
const USER_HEAP_BASE: usize = 0x0000_4000_0000;

struct AsidPool {
    used: [bool; MAX_ASID],
}

static ASID_POOL: Mutex<AsidPool> = Mutex::new(AsidPool {
    used: [false; MAX_ASID],
});

fn alloc_asid() -> KernelResult<u8> {
    let mut pool = ASID_POOL.lock();
    // ASID 0 is reserved for the kernel's own TTBR1 mapping.
    for i in 1..MAX_ASID {
        if !pool.used[i] {
            pool.used[i] = true;
            return Ok(i as u8);
        }
    }
    Err(MmError::AsidsExhausted.into())
}

fn free_asid(asid: u8) {
    ASID_POOL.lock().used[asid as usize] = false;
}

/// A process's virtual address space: its own root page table, the ASID
/// that tags every TLB entry it installs, and the current end of its
/// `sbrk` heap.
pub struct AddressSpace {
    pub table: AddressSpaceTable,
    heap_end: usize,
}

impl AddressSpace {
    pub fn new() -> KernelResult<Self> {
        let asid = alloc_asid()?;
        match AddressSpaceTable::new(Some(asid)) {
            Ok(table) => Ok(Self { table, heap_end: USER_HEAP_BASE }),
            Err(e) => {
                free_asid(asid);
                Err(e)
            }
        }
    }

    /// Move the heap end by `delta` bytes (may be negative), mapping or
    /// unmapping whole pages as the break crosses page boundaries, and
    /// return the *previous* end, per `sbrk`'s usual contract.
    pub fn sbrk(&mut self, delta: i64) -> KernelResult<usize> {
        let old_end = self.heap_end;
        let new_end = if delta >= 0 {
            old_end.checked_add(delta as usize).ok_or(MmError::Misaligned)?
        } else {
            old_end.checked_sub((-delta) as usize).ok_or(MmError::Misaligned)?
        };
        if new_end < USER_HEAP_BASE {
            return Err(MmError::Misaligned.into());
        }

        let old_pages = (old_end - USER_HEAP_BASE).div_ceil(PAGE_SIZE);
        let new_pages = (new_end - USER_HEAP_BASE).div_ceil(PAGE_SIZE);

        if new_pages > old_pages {
            for i in old_pages..new_pages {
                let va = VirtAddr(USER_HEAP_BASE + i * PAGE_SIZE);
                let frame = phys_alloc::alloc_frame()?;
                if let Err(e) = self.table.map_chunk(va, frame.addr(), MapSize::Size4K, PageFlags::user_rw()) {
                    let _ = phys_alloc::free_frame(frame);
                    return Err(e);
                }
            }
        } else if new_pages < old_pages {
            for i in new_pages..old_pages {
                let va = VirtAddr(USER_HEAP_BASE + i * PAGE_SIZE);
                if let Ok(Some(frame)) = self.table.unmap_chunk(va, MapSize::Size4K) {
                    let _ = phys_alloc::free_frame(frame);
                }
            }
        }

        self.heap_end = new_end;
        Ok(old_end)
    }

    pub fn asid(&self) -> u8 {
        self.table.asid.expect("user address space always has an asid")
    }

    /// Install this address space into TTBR0 and invalidate its TLB
    /// entries if it is new enough that stale ASID reuse is possible.
    pub fn activate(&self) {
        #[cfg(target_os = "none")]
        // SAFETY: `root_phys`/`asid` describe a fully initialized table
        // owned by this `AddressSpace`.
        unsafe {
            crate::arch::aarch64::mmu::activate_user_table(self.table.root_phys(), self.asid());
        }
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.table.clear_all();
        if let Some(asid) = self.table.asid {
            free_asid(asid);
            #[cfg(target_os = "none")]
            // SAFETY: no task is running with this ASID anymore; the
            // caller (task teardown) only drops an `AddressSpace` once
            // the owning task has been fully removed from the scheduler.
            unsafe {
                crate::arch::aarch64::mmu::invalidate_tlb_asid(asid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asid_allocation_is_unique_and_reclaimed() {
        let a = alloc_asid().unwrap();
        let b = alloc_asid().unwrap();
        assert_ne!(a, b);
        free_asid(a);
        free_asid(b);
    }

    #[test]
    fn asid_zero_never_handed_out() {
        let mut seen = alloc::vec::Vec::new();
        for _ in 0..10 {
            seen.push(alloc_asid().unwrap());
        }
        assert!(!seen.contains(&0));
        for a in seen {
            free_asid(a);
        }
    }
}
