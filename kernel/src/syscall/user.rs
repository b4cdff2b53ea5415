//! Unsafe raw user-pointer access.
//!
//! This kernel has no copy-from/to-user trampoline and no pointer
//! validation layer; a syscall that touches user memory dereferences the
//! pointer directly, bounded by an explicit maximum length. A bad pointer
//! takes the calling task down with a data abort the same way any other
//! invalid user access would, rather than failing the syscall cleanly.

use alloc::string::String;

/// Longest string a syscall will ever read out of user memory (window
/// titles, debug text, print buffers). Longer input is truncated, not
/// rejected.
pub const MAX_USER_STRING: usize = 1024;

/// Read a NUL-terminated string from `ptr`, stopping at the first NUL or
/// after `MAX_USER_STRING` bytes, whichever comes first. Non-UTF-8 bytes
/// are replaced per [`String::from_utf8_lossy`].
///
/// # Safety
/// `ptr` must point to memory mapped and readable by the calling task for
/// at least the bytes actually read. The caller accepts responsibility for
/// this precisely because the kernel performs no validation of its own.
pub unsafe fn read_cstr(ptr: u64) -> String {
    if ptr == 0 {
        return String::new();
    }
    let base = ptr as *const u8;
    let mut bytes = alloc::vec::Vec::with_capacity(64);
    for i in 0..MAX_USER_STRING {
        // SAFETY: forwarded from the caller's precondition.
        let byte = unsafe { core::ptr::read_volatile(base.add(i)) };
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Write a single `u32` to user memory at `ptr`.
///
/// # Safety
/// `ptr` must point to a 4-byte-aligned, writable location in the calling
/// task's address space.
pub unsafe fn write_u32(ptr: u64, value: u32) {
    if ptr == 0 {
        return;
    }
    // SAFETY: forwarded from the caller's precondition.
    unsafe {
        core::ptr::write_volatile(ptr as *mut u32, value);
    }
}

/// Write a single `i32` to user memory at `ptr`.
///
/// # Safety
/// Same contract as [`write_u32`].
pub unsafe fn write_i32(ptr: u64, value: i32) {
    // SAFETY: forwarded from the caller's precondition.
    unsafe {
        write_u32(ptr, value as u32);
    }
}

/// Write a single `u64` to user memory at `ptr`.
///
/// # Safety
/// `ptr` must point to an 8-byte-aligned, writable location in the calling
/// task's address space.
pub unsafe fn write_u64(ptr: u64, value: u64) {
    if ptr == 0 {
        return;
    }
    // SAFETY: forwarded from the caller's precondition.
    unsafe {
        core::ptr::write_volatile(ptr as *mut u64, value);
    }
}

/// Write a [`crate::ipc::Message`] to user memory: kind followed by its
/// four data words, five `u64` slots wide (kind is widened for uniform
/// field width, matching the original reference ABI's fixed-width message
/// struct).
///
/// # Safety
/// `ptr` must point to `5 * size_of::<u64>()` writable, 8-byte-aligned
/// bytes in the calling task's address space.
pub unsafe fn write_message(ptr: u64, msg: crate::ipc::Message) {
    if ptr == 0 {
        return;
    }
    // SAFETY: forwarded from the caller's precondition.
    unsafe {
        write_u64(ptr, msg.kind as u64);
        for (i, word) in msg.data.iter().enumerate() {
            write_u64(ptr + 8 * (i as u64 + 1), *word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_cstr_stops_at_nul() {
        let buf = b"hello\0garbage";
        let s = unsafe { read_cstr(buf.as_ptr() as u64) };
        assert_eq!(s, "hello");
    }

    #[test]
    fn read_cstr_of_null_pointer_is_empty() {
        let s = unsafe { read_cstr(0) };
        assert_eq!(s, "");
    }

    #[test]
    fn write_and_read_back_u32() {
        let mut value: u32 = 0;
        unsafe { write_u32(&mut value as *mut u32 as u64, 0xdead_beef) };
        assert_eq!(value, 0xdead_beef);
    }

    #[test]
    fn write_message_lays_out_five_words() {
        let mut buf = [0u64; 5];
        let msg = crate::ipc::Message { kind: 7, data: [1, 2, 3, 4] };
        unsafe { write_message(buf.as_mut_ptr() as u64, msg) };
        assert_eq!(buf, [7, 1, 2, 3, 4]);
    }
}
