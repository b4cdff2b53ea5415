//! Minimal ELF64 little-endian loader (component F), modeled on the
//! reference kernel's `libelf`: enough of the format to validate a program
//! image and walk its loadable segments, nothing more (no relocations, no
//! dynamic linking, no section headers).

use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{AddressSpaceTable, MapSize};
use crate::mm::phys_alloc;
use crate::mm::{PageFlags, VirtAddr, PAGE_SIZE};

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EM_AARCH64: u16 = 0xB7;
const PT_LOAD: u32 = 1;
const PF_EXEC: u32 = 0x1;
const PF_WRITE: u32 = 0x2;

fn read_u16(image: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([image[off], image[off + 1]])
}

fn read_u32(image: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(image[off..off + 4].try_into().unwrap())
}

fn read_u64(image: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(image[off..off + 8].try_into().unwrap())
}

/// Offsets into the ELF64 header, per the spec.
mod header {
    pub const E_ENTRY: usize = 24;
    pub const E_PHOFF: usize = 32;
    pub const E_PHENTSIZE: usize = 54;
    pub const E_PHNUM: usize = 56;
}

/// Offsets into an ELF64 program header entry.
mod phdr {
    pub const P_TYPE: usize = 0;
    pub const P_FLAGS: usize = 4;
    pub const P_OFFSET: usize = 8;
    pub const P_VADDR: usize = 16;
    pub const P_FILESZ: usize = 32;
    pub const P_MEMSZ: usize = 40;
}

fn check_header(image: &[u8]) -> KernelResult<()> {
    if image.len() < 64 || &image[0..4] != b"\x7fELF" {
        return Err(KernelError::InvalidFile);
    }
    if image[EI_CLASS] != ELFCLASS64 || image[EI_DATA] != ELFDATA2LSB {
        return Err(KernelError::InvalidFile);
    }
    let machine = read_u16(image, 18);
    if machine != EM_AARCH64 {
        return Err(KernelError::InvalidFile);
    }
    Ok(())
}

fn round_down(x: usize, align: usize) -> usize {
    x & !(align - 1)
}

fn round_up(x: usize, align: usize) -> usize {
    (x + align - 1) & !(align - 1)
}

fn page_flags_for(p_flags: u32) -> PageFlags {
    let mut flags = PageFlags::READ | PageFlags::USER;
    if p_flags & PF_WRITE != 0 {
        flags |= PageFlags::WRITE;
    }
    if p_flags & PF_EXEC != 0 {
        flags |= PageFlags::EXEC_USER;
    }
    flags
}

/// Map every `PT_LOAD` segment of `image` into `table`, copying file bytes
/// into freshly zeroed frames (so the BSS tail of each segment reads as
/// zero without a separate pass). Returns the program's entry address.
pub fn load(table: &AddressSpaceTable, image: &[u8]) -> KernelResult<usize> {
    check_header(image)?;

    let phoff = read_u64(image, header::E_PHOFF) as usize;
    let phentsize = read_u16(image, header::E_PHENTSIZE) as usize;
    let phnum = read_u16(image, header::E_PHNUM) as usize;

    for i in 0..phnum {
        let base = phoff + i * phentsize;
        if base + phentsize > image.len() {
            return Err(KernelError::InvalidFile);
        }
        let p_type = read_u32(image, base + phdr::P_TYPE);
        if p_type != PT_LOAD {
            continue;
        }
        let p_flags = read_u32(image, base + phdr::P_FLAGS);
        let p_offset = read_u64(image, base + phdr::P_OFFSET) as usize;
        let p_vaddr = read_u64(image, base + phdr::P_VADDR) as usize;
        let p_filesz = read_u64(image, base + phdr::P_FILESZ) as usize;
        let p_memsz = read_u64(image, base + phdr::P_MEMSZ) as usize;

        if p_offset + p_filesz > image.len() {
            return Err(KernelError::InvalidFile);
        }

        let seg_start = round_down(p_vaddr, PAGE_SIZE);
        let seg_end = round_up(p_vaddr + p_memsz, PAGE_SIZE);
        let flags = page_flags_for(p_flags);

        let mut file_pos = p_offset;
        let mut remaining_file = p_filesz;
        let mut va = seg_start;
        while va < seg_end {
            let frame = phys_alloc::alloc_frame()?;
            // SAFETY: the frame was just allocated and is not yet mapped
            // or referenced anywhere else.
            unsafe {
                core::ptr::write_bytes(frame.addr() as *mut u8, 0, PAGE_SIZE);
            }
            let page_off = if va == seg_start { p_vaddr - seg_start } else { 0 };
            let copy_len = remaining_file.min(PAGE_SIZE.saturating_sub(page_off));
            if copy_len > 0 {
                // SAFETY: same frame, still exclusively owned; `page_off +
                // copy_len <= PAGE_SIZE` by construction above.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        image[file_pos..file_pos + copy_len].as_ptr(),
                        (frame.addr() as *mut u8).add(page_off),
                        copy_len,
                    );
                }
                file_pos += copy_len;
                remaining_file -= copy_len;
            }
            table.map_chunk(VirtAddr(va), frame.addr(), MapSize::Size4K, flags)?;
            va += PAGE_SIZE;
        }
    }

    Ok(read_u64(image, header::E_ENTRY) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf(entry: u64, segment: &[u8], vaddr: u64) -> alloc::vec::Vec<u8> {
        let mut image = alloc::vec![0u8; 64];
        image[0..4].copy_from_slice(b"\x7fELF");
        image[EI_CLASS] = ELFCLASS64;
        image[EI_DATA] = ELFDATA2LSB;
        image[18..20].copy_from_slice(&EM_AARCH64.to_le_bytes());
        image[header::E_ENTRY..header::E_ENTRY + 8].copy_from_slice(&entry.to_le_bytes());
        image[header::E_PHOFF..header::E_PHOFF + 8].copy_from_slice(&64u64.to_le_bytes());
        image[header::E_PHENTSIZE..header::E_PHENTSIZE + 2].copy_from_slice(&56u16.to_le_bytes());
        image[header::E_PHNUM..header::E_PHNUM + 2].copy_from_slice(&1u16.to_le_bytes());

        let mut phdr_bytes = alloc::vec![0u8; 56];
        phdr_bytes[phdr::P_TYPE..phdr::P_TYPE + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        phdr_bytes[phdr::P_FLAGS..phdr::P_FLAGS + 4]
            .copy_from_slice(&(PF_EXEC | PF_WRITE).to_le_bytes());
        phdr_bytes[phdr::P_OFFSET..phdr::P_OFFSET + 8].copy_from_slice(&120u64.to_le_bytes());
        phdr_bytes[phdr::P_VADDR..phdr::P_VADDR + 8].copy_from_slice(&vaddr.to_le_bytes());
        phdr_bytes[phdr::P_FILESZ..phdr::P_FILESZ + 8]
            .copy_from_slice(&(segment.len() as u64).to_le_bytes());
        phdr_bytes[phdr::P_MEMSZ..phdr::P_MEMSZ + 8]
            .copy_from_slice(&(segment.len() as u64).to_le_bytes());

        image.extend_from_slice(&phdr_bytes);
        image.extend_from_slice(segment);
        image
    }

    #[test]
    fn rejects_bad_magic() {
        let image = [0u8; 64];
        assert!(check_header(&image).is_err());
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut image = build_minimal_elf(0x1000, b"code", 0x1000);
        image[18..20].copy_from_slice(&0x28u16.to_le_bytes()); // EM_ARM
        assert!(check_header(&image).is_err());
    }

    #[test]
    fn accepts_well_formed_header() {
        let image = build_minimal_elf(0x1000, b"code", 0x1000);
        assert!(check_header(&image).is_ok());
    }

    #[test]
    fn page_flags_track_segment_permissions() {
        let ro = page_flags_for(0);
        assert!(!ro.contains(PageFlags::WRITE));
        let rwx = page_flags_for(PF_WRITE | PF_EXEC);
        assert!(rwx.contains(PageFlags::WRITE));
        assert!(rwx.contains(PageFlags::EXEC_USER));
    }
}
