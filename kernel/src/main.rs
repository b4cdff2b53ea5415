//! Bare-metal binary entry point.
//!
//! All real work happens in [`pi_kernel::arch::aarch64::boot`]; this file
//! only exists so `cargo build --bin pi-kernel` produces a linkable image.
//! `cargo test` never touches this file — it builds the host test harness
//! from `lib.rs` instead.

#![no_std]
#![no_main]

use pi_kernel as _;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    pi_kernel::println!("\n[PANIC] {}", info);
    pi_kernel::arch::aarch64::halt()
}
