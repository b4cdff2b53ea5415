//! Kernel library crate.
//!
//! Built `no_std` for the bare-metal `aarch64-unknown-none` target. On a
//! host target (anything where `target_os != "none"`, i.e. `cargo test`)
//! the crate pulls in `std`'s allocator so that pure-logic modules —
//! the bitmap allocator, page-table index math, scheduler queues, message
//! queues, pipes, device-tree parsing over a byte fixture, window geometry
//! clamping — are exercised with ordinary `#[test]` functions without a
//! real board or QEMU.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(all(feature = "alloc", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(feature = "alloc", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(all(feature = "alloc", not(target_os = "none")))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;
#[macro_use]
pub mod serial;

pub mod arch;
pub mod dma;
pub mod dtb;
pub mod error;
pub mod input;
pub mod ipc;
pub mod irq;
pub mod log_service;
pub mod logger;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod timer;
pub mod trap;
pub mod wm;

/// Grow or shrink the kernel heap and re-register it with the global
/// allocator. Called once during [`arch::aarch64::boot::kernel_main`] after
/// [`mm`] has mapped the initial heap region.
#[cfg(all(feature = "alloc", target_os = "none"))]
pub unsafe fn init_heap(start: usize, size: usize) {
    // SAFETY: `start` is a range of `size` bytes already mapped
    // read-write, non-executable by `mm::init` and not aliased by any
    // other allocator.
    unsafe {
        ALLOCATOR.lock().init(start as *mut u8, size);
    }
}

/// Allocation failure handler. A `no_std` kernel has no recovery path for
/// an exhausted heap beyond logging and halting.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout);
}

// The bare-metal `#[panic_handler]` lives in `main.rs`: a lib crate with a
// separate bin target must not define one itself, or the two collide at
// link time. Host builds (`cargo test`) get `std`'s handler for free.
