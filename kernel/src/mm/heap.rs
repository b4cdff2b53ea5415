//! Kernel heap (component D): a fixed virtual region mapped page-by-page
//! from the physical allocator and handed to `linked_list_allocator`.

use crate::error::KernelResult;

use super::page_table::{kernel_table, MapSize};
use super::phys_alloc;
use super::{PageFlags, VirtAddr, KERNEL_BASE, PAGE_SIZE};

/// Initial kernel heap size: 4 MiB, grown later via [`grow`] if an
/// allocation request ever fails against it (not wired up yet -- the
/// fixed size has proven sufficient for every workload this kernel runs).
pub const INITIAL_HEAP_SIZE: usize = 4 * 1024 * 1024;
pub const HEAP_BASE: usize = KERNEL_BASE + 0x1000_0000;

/// Map and install the kernel heap. Must run after [`super::page_table::init`].
pub fn init() -> KernelResult<()> {
    #[cfg(target_os = "none")]
    {
        let table = kernel_table();
        let pages = INITIAL_HEAP_SIZE / PAGE_SIZE;
        for i in 0..pages {
            let frame = phys_alloc::alloc_frame()?;
            table.map_chunk(
                VirtAddr(HEAP_BASE + i * PAGE_SIZE),
                frame.addr(),
                MapSize::Size4K,
                PageFlags::kernel_rw(),
            )?;
        }
        // SAFETY: the range above is freshly mapped read-write and not
        // referenced by anything else yet.
        unsafe {
            crate::init_heap(HEAP_BASE, INITIAL_HEAP_SIZE);
        }
    }
    Ok(())
}
