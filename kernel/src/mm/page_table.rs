//! Four-level ARM page-table engine (component C).
//!
//! Level naming follows the teacher's x86-derived L4..L1 convention (L4 is
//! the root, handed to `TTBRn_EL1`; L1 holds leaf page descriptors) even
//! though the ARM ARM itself calls these levels 0..3 -- the shape of the
//! walk is identical, only the descriptor encoding differs.

use core::ops::{Index, IndexMut};

use crate::error::{KernelResult, MmError};

use super::phys_alloc::{self, PhysFrame};
use super::{PageFlags, VirtAddr, PAGE_SIZE};

pub const ENTRIES: usize = 512;

/// Granule a chunk is mapped at: a 4KiB leaf page (L1 table), a 2MiB block
/// (L2 table), or a 1GiB block (L3 table). Named after the table level that
/// holds the installed descriptor, following this file's L4..L1 convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapSize {
    Size4K,
    Size2M,
    Size1G,
}

impl MapSize {
    pub const fn bytes(self) -> usize {
        match self {
            MapSize::Size4K => PAGE_SIZE,
            MapSize::Size2M => 2 * 1024 * 1024,
            MapSize::Size1G => 1024 * 1024 * 1024,
        }
    }
}

const DESC_VALID: u64 = 1 << 0;
const DESC_TABLE_OR_PAGE: u64 = 1 << 1;
const ATTR_IDX_SHIFT: u64 = 2;
const AP_RO: u64 = 1 << 7;
const AP_EL0: u64 = 1 << 6;
const SH_INNER: u64 = 0b11 << 8;
const AF: u64 = 1 << 10;
const NG: u64 = 1 << 11;
const PXN: u64 = 1 << 53;
const UXN: u64 = 1 << 54;
const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

// Must match the MAIR_EL1 slot layout `arch::aarch64::mmu::enable` programs.
const MAIR_NORMAL: u64 = crate::arch::aarch64::mmu::MAIR_IDX_NORMAL_CACHED;
const MAIR_DEVICE: u64 = crate::arch::aarch64::mmu::MAIR_IDX_DEVICE_NGNRNE;

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Entry(u64);

impl Entry {
    const fn empty() -> Self {
        Self(0)
    }

    fn is_valid(self) -> bool {
        self.0 & DESC_VALID != 0
    }

    fn frame(self) -> PhysFrame {
        PhysFrame((self.0 & ADDR_MASK) >> PAGE_SHIFT_BITS)
    }

    fn set_table(&mut self, frame: PhysFrame) {
        self.0 = (frame.addr() & ADDR_MASK) | DESC_TABLE_OR_PAGE | DESC_VALID;
    }

    /// Install a level-3 (4KiB) page descriptor.
    fn set_leaf(&mut self, frame: PhysFrame, flags: PageFlags) {
        self.set_descriptor(frame, flags, true);
    }

    /// Install a level-1 (1GiB) or level-2 (2MiB) block descriptor. Same
    /// attribute encoding as a leaf page; only the table-or-page bit
    /// differs between a block and a page descriptor.
    fn set_block(&mut self, frame: PhysFrame, flags: PageFlags) {
        self.set_descriptor(frame, flags, false);
    }

    fn set_descriptor(&mut self, frame: PhysFrame, flags: PageFlags, page: bool) {
        let mut bits = (frame.addr() & ADDR_MASK) | DESC_VALID | AF | NG;
        if page {
            bits |= DESC_TABLE_OR_PAGE;
        }
        bits |= SH_INNER;
        if flags.contains(PageFlags::DEVICE) {
            bits |= MAIR_DEVICE << ATTR_IDX_SHIFT;
        } else {
            bits |= MAIR_NORMAL << ATTR_IDX_SHIFT;
        }
        if !flags.contains(PageFlags::WRITE) {
            bits |= AP_RO;
        }
        if flags.contains(PageFlags::USER) {
            bits |= AP_EL0;
        }
        if !flags.contains(PageFlags::EXEC_USER) {
            bits |= UXN;
        }
        if !flags.contains(PageFlags::EXEC_KERNEL) {
            bits |= PXN;
        }
        self.0 = bits;
    }

    /// `true` for a level 0-2 table descriptor (bit 1 set, pointing at a
    /// child table); `false` for a block or page descriptor. Only
    /// meaningful at levels where both encodings are possible (L4/L3/L2);
    /// callers never call this on an L1 entry, which is always a page.
    fn is_table(self) -> bool {
        self.0 & DESC_TABLE_OR_PAGE != 0
    }

    fn flags(self) -> PageFlags {
        let mut f = PageFlags::READ;
        if self.0 & AP_RO == 0 {
            f |= PageFlags::WRITE;
        }
        if self.0 & AP_EL0 != 0 {
            f |= PageFlags::USER;
        }
        if self.0 & UXN == 0 {
            f |= PageFlags::EXEC_USER;
        }
        if self.0 & PXN == 0 {
            f |= PageFlags::EXEC_KERNEL;
        }
        if (self.0 >> ATTR_IDX_SHIFT) & 0b111 == MAIR_DEVICE {
            f |= PageFlags::DEVICE;
        }
        f
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

const PAGE_SHIFT_BITS: u64 = 12;

#[repr(C, align(4096))]
pub struct Table {
    entries: [Entry; ENTRIES],
}

impl Table {
    pub const fn empty() -> Self {
        Self {
            entries: [Entry::empty(); ENTRIES],
        }
    }
}

impl Index<usize> for Table {
    type Output = Entry;
    fn index(&self, i: usize) -> &Entry {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Table {
    fn index_mut(&mut self, i: usize) -> &mut Entry {
        &mut self.entries[i]
    }
}

/// Index of a virtual address within each of the four levels.
struct Indices {
    l4: usize,
    l3: usize,
    l2: usize,
    l1: usize,
}

impl Indices {
    fn new(va: VirtAddr) -> Self {
        let a = va.0 as u64;
        Self {
            l4: ((a >> 39) & 0x1FF) as usize,
            l3: ((a >> 30) & 0x1FF) as usize,
            l2: ((a >> 21) & 0x1FF) as usize,
            l1: ((a >> 12) & 0x1FF) as usize,
        }
    }
}

/// A single address space's root table, identified by the physical frame
/// holding the L4 table and (for user spaces) an ASID.
pub struct AddressSpaceTable {
    root: PhysFrame,
    pub asid: Option<u8>,
}

impl AddressSpaceTable {
    /// Allocate a fresh, zeroed root table.
    pub fn new(asid: Option<u8>) -> KernelResult<Self> {
        let frame = phys_alloc::alloc_frame()?;
        // SAFETY: the frame was just allocated and is not yet mapped or
        // referenced anywhere else, so writing through its physical
        // identity address is exclusive.
        unsafe {
            let table = frame.addr() as *mut Table;
            table.write(Table::empty());
        }
        Ok(Self {
            root: frame,
            asid,
        })
    }

    pub fn root_phys(&self) -> u64 {
        self.root.addr()
    }

    fn root_table(&self) -> &mut Table {
        // SAFETY: the root frame is owned exclusively by this
        // `AddressSpaceTable` and every walk below holds no other
        // reference to it concurrently (single-core, IRQs off while
        // mutating page tables, consistent with the rest of this kernel).
        unsafe { &mut *(self.root.addr() as *mut Table) }
    }

    /// Walk down to (allocating as needed) the L3 table -- the 1GiB block
    /// level, child of the root.
    fn walk_l3_or_create(&self, idx: &Indices) -> KernelResult<&mut Table> {
        let l4 = self.root_table();
        Self::next_level(l4, idx.l4)
    }

    /// Walk down to the L2 table -- the 2MiB block level.
    fn walk_l2_or_create(&self, idx: &Indices) -> KernelResult<&mut Table> {
        let l3 = self.walk_l3_or_create(idx)?;
        Self::next_level(l3, idx.l3)
    }

    /// Walk down to the L1 table -- the 4KiB page level.
    fn walk_l1_or_create(&self, idx: &Indices) -> KernelResult<&mut Table> {
        let l2 = self.walk_l2_or_create(idx)?;
        Self::next_level(l2, idx.l2)
    }

    fn next_level(table: &mut Table, index: usize) -> KernelResult<&mut Table> {
        if !table[index].is_valid() {
            let frame = phys_alloc::alloc_frame()?;
            // SAFETY: freshly allocated frame, exclusively owned until
            // installed into `table[index]` below.
            unsafe {
                (frame.addr() as *mut Table).write(Table::empty());
            }
            table[index].set_table(frame);
        }
        let next_phys = table[index].frame().addr();
        // SAFETY: `next_phys` was just validated present above and is a
        // table this walk exclusively owns.
        Ok(unsafe { &mut *(next_phys as *mut Table) })
    }

    /// Read-only walk to the L3 table (1GiB block level), `None` if any
    /// intermediate table is missing.
    fn walk_l3(&self, idx: &Indices) -> Option<&mut Table> {
        let l4 = self.root_table();
        if !l4[idx.l4].is_valid() {
            return None;
        }
        Some(unsafe { &mut *(l4[idx.l4].frame().addr() as *mut Table) })
    }

    /// Read-only walk to the L2 table (2MiB block level).
    fn walk_l2(&self, idx: &Indices) -> Option<&mut Table> {
        let l3 = self.walk_l3(idx)?;
        if !l3[idx.l3].is_valid() {
            return None;
        }
        Some(unsafe { &mut *(l3[idx.l3].frame().addr() as *mut Table) })
    }

    /// Read-only walk to the L1 table (4KiB page level).
    fn walk_l1(&self, idx: &Indices) -> Option<&mut Table> {
        let l2 = self.walk_l2(idx)?;
        if !l2[idx.l2].is_valid() {
            return None;
        }
        Some(unsafe { &mut *(l2[idx.l2].frame().addr() as *mut Table) })
    }

    /// Find whatever descriptor is actually installed for `va`, at
    /// whichever granule it was mapped at: a 1GiB/2MiB block short-circuits
    /// before descending further, otherwise the walk continues down to the
    /// 4KiB page level. Returns `None` if `va` is unmapped at every level.
    fn resolve(&self, idx: &Indices) -> Option<(MapSize, &mut Entry)> {
        let l3 = self.walk_l3(idx)?;
        let e3 = &mut l3[idx.l3];
        if !e3.is_valid() {
            return None;
        }
        if !e3.is_table() {
            return Some((MapSize::Size1G, e3));
        }
        let l2 = unsafe { &mut *(e3.frame().addr() as *mut Table) };
        let e2 = &mut l2[idx.l2];
        if !e2.is_valid() {
            return None;
        }
        if !e2.is_table() {
            return Some((MapSize::Size2M, e2));
        }
        let l1 = unsafe { &mut *(e2.frame().addr() as *mut Table) };
        let e1 = &mut l1[idx.l1];
        e1.is_valid().then_some((MapSize::Size4K, e1))
    }

    fn entry_for_size(&self, idx: &Indices, size: MapSize) -> Option<&mut Entry> {
        match size {
            MapSize::Size1G => Some(&mut self.walk_l3(idx)?[idx.l3]),
            MapSize::Size2M => Some(&mut self.walk_l2(idx)?[idx.l2]),
            MapSize::Size4K => Some(&mut self.walk_l1(idx)?[idx.l1]),
        }
    }

    fn entry_for_size_or_create(&self, idx: &Indices, size: MapSize) -> KernelResult<&mut Entry> {
        Ok(match size {
            MapSize::Size1G => &mut self.walk_l3_or_create(idx)?[idx.l3],
            MapSize::Size2M => &mut self.walk_l2_or_create(idx)?[idx.l2],
            MapSize::Size4K => &mut self.walk_l1_or_create(idx)?[idx.l1],
        })
    }

    /// Map a single chunk of `size` bytes, aligned to `size`'s own granule.
    /// Idempotent: re-asserting an identical existing mapping succeeds;
    /// mapping a different `pa`/`flags` over an existing entry, or a block
    /// over an existing table, fails.
    pub fn map_chunk(&self, va: VirtAddr, pa: u64, size: MapSize, flags: PageFlags) -> KernelResult<()> {
        let gran = size.bytes() as u64;
        if va.0 as u64 % gran != 0 || pa % gran != 0 {
            return Err(MmError::Misaligned.into());
        }
        let idx = Indices::new(va);
        let frame = PhysFrame(pa / PAGE_SIZE as u64);
        let entry = self.entry_for_size_or_create(&idx, size)?;
        if entry.is_valid() {
            if entry.is_table() || entry.frame().0 != frame.0 || entry.flags() != flags {
                return Err(MmError::AlreadyMapped { va: va.0 }.into());
            }
            return Ok(());
        }
        match size {
            MapSize::Size4K => entry.set_leaf(frame, flags),
            MapSize::Size2M | MapSize::Size1G => entry.set_block(frame, flags),
        }
        Ok(())
    }

    /// Map a contiguous range of `len` bytes starting at `va` to physical
    /// address `pa`, rounding `len` up to whole pages. The performance-
    /// critical path: at each position the largest block granule that both
    /// `va` and `pa` are aligned to and that still fits within the
    /// remaining length is installed, so the descriptor count is bounded
    /// by the number of blocks rather than the number of pages.
    pub fn map_range(&self, va: VirtAddr, pa: u64, len: usize, flags: PageFlags) -> KernelResult<()> {
        let total = len.div_ceil(PAGE_SIZE) as u64 * PAGE_SIZE as u64;
        let mut offset: u64 = 0;
        while offset < total {
            let cur_va = va.0 as u64 + offset;
            let cur_pa = pa + offset;
            let remaining = total - offset;
            let size = [MapSize::Size1G, MapSize::Size2M, MapSize::Size4K]
                .into_iter()
                .find(|s| {
                    let gran = s.bytes() as u64;
                    cur_va % gran == 0 && cur_pa % gran == 0 && remaining >= gran
                })
                .unwrap_or(MapSize::Size4K);
            self.map_chunk(VirtAddr(cur_va as usize), cur_pa, size, flags)?;
            offset += size.bytes() as u64;
        }
        Ok(())
    }

    /// Unmap the chunk of `size` at `va`, freeing its backing frame and
    /// invalidating the TLB. A no-op (returns `Ok(None)`) if already
    /// unmapped.
    pub fn unmap_chunk(&self, va: VirtAddr, size: MapSize) -> KernelResult<Option<PhysFrame>> {
        let idx = Indices::new(va);
        let Some(entry) = self.entry_for_size(&idx, size) else {
            return Ok(None);
        };
        if !entry.is_valid() {
            return Ok(None);
        }
        let frame = entry.frame();
        entry.clear();
        // SAFETY: page tables are only edited with a lock/IRQs-masked
        // discipline held by the caller; invalidating right after the
        // clear keeps the TLB from ever observing a stale translation.
        unsafe {
            crate::arch::aarch64::mmu::invalidate_tlb_page(va.0, self.asid);
        }
        Ok(Some(frame))
    }

    /// Unmap every chunk in `[vs, ve)`, at whatever granule each one was
    /// actually mapped at, freeing backing frames and invalidating the TLB
    /// as it goes. A no-op over any already-unmapped sub-range.
    pub fn unmap_range(&self, vs: VirtAddr, ve: VirtAddr) -> KernelResult<()> {
        let mut cur = vs.0 as u64;
        let end = ve.0 as u64;
        while cur < end {
            let idx = Indices::new(VirtAddr(cur as usize));
            let step = match self.resolve(&idx) {
                Some((size, entry)) => {
                    self.reclaim_leaf(entry, cur as usize);
                    size.bytes() as u64
                }
                None => PAGE_SIZE as u64,
            };
            cur += step;
        }
        Ok(())
    }

    pub fn has_entry_at(&self, va: VirtAddr) -> bool {
        let idx = Indices::new(va);
        self.resolve(&idx).is_some()
    }

    pub fn get_attr(&self, va: VirtAddr) -> Option<PageFlags> {
        let idx = Indices::new(va);
        self.resolve(&idx).map(|(_, e)| e.flags())
    }

    /// Change the protection flags of every page in `[va, va+len)`,
    /// leaving unmapped pages within the range untouched.
    pub fn change_attr_range(&self, va: VirtAddr, len: usize, flags: PageFlags) -> KernelResult<()> {
        let pages = len.div_ceil(PAGE_SIZE);
        for i in 0..pages {
            let page_va = VirtAddr(va.0 + i * PAGE_SIZE);
            let idx = Indices::new(page_va);
            if let Some((_, entry)) = self.resolve(&idx) {
                let frame = entry.frame();
                if entry.is_table() {
                    entry.set_leaf(frame, flags);
                } else {
                    entry.set_block(frame, flags);
                }
            }
        }
        Ok(())
    }

    /// Reassemble a full virtual address from per-level indices, for TLB
    /// invalidation during a table-wide walk. Kernel (TTBR1) tables carry
    /// no ASID and live in the canonical upper half of the address space,
    /// so the fixed top bits are OR'd back in; user (TTBR0) tables don't
    /// need them.
    fn reconstruct_va(&self, l4: usize, l3: usize, l2: usize, l1: usize) -> usize {
        let bits = ((l4 as u64) << 39) | ((l3 as u64) << 30) | ((l2 as u64) << 21) | ((l1 as u64) << 12);
        if self.asid.is_none() {
            (bits | super::KERNEL_BASE as u64) as usize
        } else {
            bits as usize
        }
    }

    /// Free a leaf/block entry's backing frame and invalidate the TLB for
    /// the VA it covers.
    fn reclaim_leaf(&self, entry: &mut Entry, va: usize) {
        let _ = phys_alloc::free_frame(entry.frame());
        entry.clear();
        // SAFETY: see `unmap_chunk`.
        unsafe {
            crate::arch::aarch64::mmu::invalidate_tlb_page(va, self.asid);
        }
    }

    /// Unmap every entry at any level, returning their frames to the
    /// physical allocator and invalidating the TLB for each. Used when a
    /// process address space is torn down.
    pub fn clear_all(&self) {
        // Walking all 512^3 possible leaf slots would be wasteful; real
        // address spaces are sparse, so instead each level is scanned and
        // only populated subtrees are visited. A non-table entry at the L3
        // or L2 level is a 1GiB/2MiB block rather than a child table and is
        // reclaimed directly instead of being descended into.
        let l4 = self.root_table();
        for i in 0..ENTRIES {
            if !l4[i].is_valid() {
                continue;
            }
            let l3 = unsafe { &mut *(l4[i].frame().addr() as *mut Table) };
            for j in 0..ENTRIES {
                if !l3[j].is_valid() {
                    continue;
                }
                if !l3[j].is_table() {
                    let va = self.reconstruct_va(i, j, 0, 0);
                    self.reclaim_leaf(&mut l3[j], va);
                    continue;
                }
                let l2 = unsafe { &mut *(l3[j].frame().addr() as *mut Table) };
                for k in 0..ENTRIES {
                    if !l2[k].is_valid() {
                        continue;
                    }
                    if !l2[k].is_table() {
                        let va = self.reconstruct_va(i, j, k, 0);
                        self.reclaim_leaf(&mut l2[k], va);
                        continue;
                    }
                    let l1 = unsafe { &mut *(l2[k].frame().addr() as *mut Table) };
                    for m in 0..ENTRIES {
                        if l1[m].is_valid() {
                            let va = self.reconstruct_va(i, j, k, m);
                            self.reclaim_leaf(&mut l1[m], va);
                        }
                    }
                    let _ = phys_alloc::free_frame(l2[k].frame());
                    l2[k].clear();
                }
                let _ = phys_alloc::free_frame(l3[j].frame());
                l3[j].clear();
            }
            let _ = phys_alloc::free_frame(l4[i].frame());
            l4[i].clear();
        }
    }
}

/// Set up the kernel's own TTBR1 table and enable the MMU. Called once at
/// boot after the physical allocator is up.
pub fn init() -> KernelResult<()> {
    let kernel_table = AddressSpaceTable::new(None)?;
    KERNEL_TABLE
        .set(kernel_table)
        .map_err(|_| MmError::AlreadyMapped { va: 0 })?;
    #[cfg(target_os = "none")]
    // SAFETY: called exactly once at boot, before any other code touches
    // the MMU, with a freshly built, empty TTBR1 table.
    unsafe {
        crate::arch::aarch64::mmu::enable(KERNEL_TABLE.get().unwrap().root_phys());
    }
    Ok(())
}

use crate::sync::OnceLock;
static KERNEL_TABLE: OnceLock<AddressSpaceTable> = OnceLock::new();

pub fn kernel_table() -> &'static AddressSpaceTable {
    KERNEL_TABLE.get().expect("mm::page_table::init not called")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_breakdown_matches_shifts() {
        let va = VirtAddr(0x1_2345_6000);
        let idx = Indices::new(va);
        assert_eq!(idx.l1, (va.0 as u64 >> 12 & 0x1FF) as usize);
        assert_eq!(idx.l4, (va.0 as u64 >> 39 & 0x1FF) as usize);
    }

    #[test]
    fn leaf_descriptor_roundtrips_flags() {
        let mut e = Entry::empty();
        e.set_leaf(PhysFrame(7), PageFlags::user_rw());
        assert!(e.is_valid());
        assert_eq!(e.frame().0, 7);
        let f = e.flags();
        assert!(f.contains(PageFlags::WRITE));
        assert!(f.contains(PageFlags::USER));
    }

    #[test]
    fn block_descriptor_is_valid_but_not_a_table() {
        let mut e = Entry::empty();
        e.set_block(PhysFrame(512), PageFlags::kernel_rw());
        assert!(e.is_valid());
        assert!(!e.is_table());
        assert_eq!(e.frame().0, 512);
    }

    #[test]
    fn page_descriptor_is_a_table_bit_set() {
        let mut e = Entry::empty();
        e.set_leaf(PhysFrame(1), PageFlags::kernel_rw());
        assert!(e.is_table());
    }

    #[test]
    fn map_size_bytes_match_granules() {
        assert_eq!(MapSize::Size4K.bytes(), 4096);
        assert_eq!(MapSize::Size2M.bytes(), 2 * 1024 * 1024);
        assert_eq!(MapSize::Size1G.bytes(), 1024 * 1024 * 1024);
    }
}
