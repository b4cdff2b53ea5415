//! Memory chunks and DMA-capable buffers (component D).

use crate::error::KernelResult;

use super::page_table::{kernel_table, MapSize};
use super::{phys_alloc, PageFlags, VirtAddr, PAGE_SIZE};

/// Bus address offset the VideoCore DMA engine expects SDRAM addresses to
/// carry, so peripherals see a coherent, uncached alias of the same
/// physical memory the ARM cores address directly.
#[cfg(feature = "bcm2837")]
const BUS_OFFSET: u64 = 0xC000_0000;
#[cfg(feature = "bcm2711")]
const BUS_OFFSET: u64 = 0x0;
#[cfg(not(any(feature = "bcm2837", feature = "bcm2711")))]
const BUS_OFFSET: u64 = 0xC000_0000;

/// A mapped, page-aligned region of kernel virtual memory backed by one or
/// more physical frames, freed as a unit when dropped.
pub struct MemoryChunk {
    va: usize,
    len: usize,
    frames: alloc::vec::Vec<phys_alloc::PhysFrame>,
}

impl MemoryChunk {
    /// Allocate and map `len` bytes (rounded up to whole pages) of kernel
    /// memory with the given flags.
    pub fn new(va: usize, len: usize, flags: PageFlags) -> KernelResult<Self> {
        let pages = len.div_ceil(PAGE_SIZE);
        let mut frames = alloc::vec::Vec::with_capacity(pages);
        for i in 0..pages {
            let frame = phys_alloc::alloc_frame()?;
            #[cfg(target_os = "none")]
            kernel_table().map_chunk(VirtAddr(va + i * PAGE_SIZE), frame.addr(), MapSize::Size4K, flags)?;
            frames.push(frame);
        }
        Ok(Self { va, len, frames })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.va as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MemoryChunk {
    fn drop(&mut self) {
        #[cfg(target_os = "none")]
        for i in 0..self.frames.len() {
            let _ = kernel_table().unmap_chunk(VirtAddr(self.va + i * PAGE_SIZE), MapSize::Size4K);
        }
        for frame in self.frames.drain(..) {
            let _ = phys_alloc::free_frame(frame);
        }
    }
}

/// A physically contiguous, uncached buffer suitable for handing to the
/// DMA controller or the GPU mailbox, along with its bus address.
pub struct Buffer {
    base_frame: phys_alloc::PhysFrame,
    pages: usize,
    va: usize,
}

impl Buffer {
    pub fn alloc(len: usize, va: usize) -> KernelResult<Self> {
        let pages = len.div_ceil(PAGE_SIZE);
        let base = phys_alloc::alloc_dma_frames(pages)?;
        #[cfg(target_os = "none")]
        for i in 0..pages {
            kernel_table().map_chunk(
                VirtAddr(va + i * PAGE_SIZE),
                base.addr() + (i * PAGE_SIZE) as u64,
                MapSize::Size4K,
                PageFlags::kernel_rw() | PageFlags::UNCACHED,
            )?;
        }
        Ok(Self {
            base_frame: base,
            pages,
            va,
        })
    }

    pub fn phys_addr(&self) -> u64 {
        self.base_frame.addr()
    }

    /// The address the DMA engine / GPU mailbox must be given, translated
    /// through the board's bus alias.
    pub fn bus_addr(&self) -> u64 {
        self.phys_addr() | BUS_OFFSET
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.va as *mut u8
    }

    pub fn len(&self) -> usize {
        self.pages * PAGE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        #[cfg(target_os = "none")]
        for i in 0..self.pages {
            let _ = kernel_table().unmap_chunk(VirtAddr(self.va + i * PAGE_SIZE), MapSize::Size4K);
        }
        phys_alloc::free_dma_frames(self.base_frame, self.pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_offset_is_applied() {
        let frame = phys_alloc::PhysFrame(0x1000);
        let bus = frame.addr() | BUS_OFFSET;
        assert_eq!(bus & BUS_OFFSET, BUS_OFFSET & bus);
    }
}
