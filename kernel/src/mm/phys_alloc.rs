//! Physical frame allocator (component B).
//!
//! One [`BitmapAllocator`] per `/memory@*` bank found in the device tree,
//! plus a separate contiguous allocator carved out of the lowest bank for
//! DMA-capable buffers (component D's [`super::chunk::Buffer`]).

use spin::Mutex;

use crate::dtb::DeviceTree;
use crate::error::{KernelResult, MmError};

use super::PAGE_SIZE;

const MAX_BANKS: usize = 4;
/// Bitmap words per bank: 4096 words * 64 bits * 4KiB = 1GiB tracked per
/// bank before falling back to "bank too large, tail untracked".
const BITMAP_WORDS: usize = 4096;
/// Default size of the DMA-contiguous carve-out: 100MiB at 4KiB pages.
const DMA_FRAMES: usize = 100 * 1024 * 1024 / PAGE_SIZE;
const DMA_BITMAP_WORDS: usize = (DMA_FRAMES + 63) / 64;

struct Bank {
    base_frame: u64,
    bitmap: [u64; BITMAP_WORDS],
    frame_count: usize,
    free_count: usize,
}

impl Bank {
    const fn empty() -> Self {
        Self {
            base_frame: 0,
            bitmap: [0; BITMAP_WORDS],
            frame_count: 0,
            free_count: 0,
        }
    }

    fn init(&mut self, base_frame: u64, frame_count: usize) {
        let tracked = frame_count.min(BITMAP_WORDS * 64);
        self.base_frame = base_frame;
        self.frame_count = tracked;
        self.free_count = tracked;
        for word in self.bitmap.iter_mut() {
            *word = u64::MAX;
        }
        // Clear bits beyond `tracked` in the final word so `alloc` never
        // hands out frames past the bank's real end.
        let full_words = tracked / 64;
        let rem = tracked % 64;
        if rem != 0 && full_words < BITMAP_WORDS {
            self.bitmap[full_words] &= (1u64 << rem) - 1;
        }
        for word in self.bitmap[full_words + (rem != 0) as usize..].iter_mut() {
            *word = 0;
        }
    }

    fn alloc_one(&mut self) -> Option<u64> {
        for (word_idx, word) in self.bitmap.iter_mut().enumerate() {
            if *word == 0 {
                continue;
            }
            let bit = word.trailing_zeros() as usize;
            *word &= !(1u64 << bit);
            self.free_count -= 1;
            return Some(self.base_frame + (word_idx * 64 + bit) as u64);
        }
        None
    }

    fn mark_used(&mut self, frame: u64) {
        if frame < self.base_frame || frame >= self.base_frame + self.frame_count as u64 {
            return;
        }
        let offset = (frame - self.base_frame) as usize;
        let (w, b) = (offset / 64, offset % 64);
        if self.bitmap[w] & (1 << b) != 0 {
            self.bitmap[w] &= !(1 << b);
            self.free_count -= 1;
        }
    }

    fn free_one(&mut self, frame: u64) -> Result<(), MmError> {
        let offset = (frame - self.base_frame) as usize;
        let (w, b) = (offset / 64, offset % 64);
        if self.bitmap[w] & (1 << b) != 0 {
            return Err(MmError::NotMapped { va: frame as usize });
        }
        self.bitmap[w] |= 1 << b;
        self.free_count += 1;
        Ok(())
    }

    fn owns(&self, frame: u64) -> bool {
        frame >= self.base_frame && frame < self.base_frame + self.frame_count as u64
    }
}

struct Allocator {
    banks: [Bank; MAX_BANKS],
    bank_count: usize,
    /// DMA-contiguous region: [base, base+len) in frame units, carved out
    /// of the tail of the first bank so the rest of the bank stays available
    /// to the general allocator.
    dma_base: u64,
    dma_len: usize,
    dma_bitmap: [u64; DMA_BITMAP_WORDS],
}

impl Allocator {
    const fn new() -> Self {
        const EMPTY: Bank = Bank::empty();
        Self {
            banks: [EMPTY; MAX_BANKS],
            bank_count: 0,
            dma_base: 0,
            dma_len: 0,
            dma_bitmap: [0; DMA_BITMAP_WORDS],
        }
    }
}

static ALLOC: Mutex<Allocator> = Mutex::new(Allocator::new());

/// Discover `/memory@*` nodes and set up one bitmap bank per region, then
/// reserve a 4MiB DMA-contiguous slice at the foot of the first bank.
pub fn init(dt: &DeviceTree<'_>) -> KernelResult<()> {
    let mut a = ALLOC.lock();
    let root = dt.root();
    for child in root.children() {
        if !child.own_name().starts_with("memory") {
            continue;
        }
        let Some(reg) = child.property("reg") else {
            continue;
        };
        let Some(base) = reg.get_u64_or_u32(0) else {
            continue;
        };
        // Assume #size-cells == #address-cells for this single-cell reader;
        // a `reg` with two equal-width cells packs (base, size).
        let size = if reg.data.len() >= 16 {
            reg.get_u64(1).unwrap_or(0)
        } else {
            reg.get_u32(1).unwrap_or(0) as u64
        };
        if size == 0 || a.bank_count >= MAX_BANKS {
            continue;
        }
        let base_frame = base / PAGE_SIZE as u64;
        let frame_count = (size as usize) / PAGE_SIZE;
        let idx = a.bank_count;
        a.banks[idx].init(base_frame, frame_count);
        a.bank_count += 1;
    }

    if a.bank_count == 0 {
        return Err(MmError::OutOfFrames.into());
    }

    for (rsv_base, rsv_size) in dt.reserved_regions() {
        reserve_range(&mut a, rsv_base, rsv_size);
    }

    // Carve the DMA-contiguous region out of the tail of bank 0's free space.
    a.dma_len = DMA_FRAMES.min(a.banks[0].frame_count);
    a.dma_base = a.banks[0].base_frame + (a.banks[0].frame_count - a.dma_len) as u64;
    for i in 0..a.dma_len {
        a.banks[0].mark_used(a.dma_base + i as u64);
        a.dma_bitmap[i / 64] |= 1 << (i % 64);
    }
    Ok(())
}

fn reserve_range(a: &mut Allocator, base: u64, size: u64) {
    let start_frame = base / PAGE_SIZE as u64;
    let frames = size.div_ceil(PAGE_SIZE as u64);
    for f in start_frame..start_frame + frames {
        for bank in a.banks[..a.bank_count].iter_mut() {
            if bank.owns(f) {
                bank.mark_used(f);
            }
        }
    }
}

/// Allocate a single general-purpose physical frame.
pub fn alloc_frame() -> KernelResult<PhysFrame> {
    let mut a = ALLOC.lock();
    for bank in a.banks[..a.bank_count].iter_mut() {
        if let Some(frame) = bank.alloc_one() {
            return Ok(PhysFrame(frame));
        }
    }
    Err(MmError::OutOfFrames.into())
}

/// Free a previously allocated frame.
pub fn free_frame(frame: PhysFrame) -> KernelResult<()> {
    let mut a = ALLOC.lock();
    for i in 0..a.bank_count {
        if a.banks[i].owns(frame.0) {
            return a.banks[i].free_one(frame.0).map_err(Into::into);
        }
    }
    Err(MmError::NotMapped {
        va: frame.0 as usize,
    }
    .into())
}

/// Allocate `count` contiguous DMA-capable frames from the low carve-out.
pub fn alloc_dma_frames(count: usize) -> KernelResult<PhysFrame> {
    let mut a = ALLOC.lock();
    let len = a.dma_len;
    let mut run = 0;
    let mut start = 0;
    for i in 0..len {
        let used = a.dma_bitmap[i / 64] & (1 << (i % 64)) != 0;
        if used {
            run = 0;
            continue;
        }
        if run == 0 {
            start = i;
        }
        run += 1;
        if run == count {
            for j in start..start + count {
                a.dma_bitmap[j / 64] |= 1 << (j % 64);
            }
            return Ok(PhysFrame(a.dma_base + start as u64));
        }
    }
    Err(MmError::NotContiguous.into())
}

pub fn free_dma_frames(frame: PhysFrame, count: usize) {
    let mut a = ALLOC.lock();
    let start = (frame.0 - a.dma_base) as usize;
    for j in start..start + count {
        a.dma_bitmap[j / 64] &= !(1 << (j % 64));
    }
}

/// A physical frame number, addressable as a byte address by shifting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysFrame(pub u64);

impl PhysFrame {
    pub fn addr(self) -> u64 {
        self.0 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_allocates_and_frees() {
        let mut bank = Bank::empty();
        bank.init(0, 4);
        let f0 = bank.alloc_one().unwrap();
        let f1 = bank.alloc_one().unwrap();
        assert_ne!(f0, f1);
        assert_eq!(bank.free_count, 2);
        bank.free_one(f0).unwrap();
        assert_eq!(bank.free_count, 3);
    }

    #[test]
    fn bank_exhausts_and_reports_out_of_frames() {
        let mut bank = Bank::empty();
        bank.init(0, 2);
        bank.alloc_one().unwrap();
        bank.alloc_one().unwrap();
        assert!(bank.alloc_one().is_none());
    }

    #[test]
    fn double_free_is_rejected() {
        let mut bank = Bank::empty();
        bank.init(100, 4);
        let f = bank.alloc_one().unwrap();
        bank.free_one(f).unwrap();
        assert!(bank.free_one(f).is_err());
    }
}
