//! Architecture-specific glue. The only supported target is `aarch64`; the
//! module boundary is kept so MMU/exception/context-switch code stays out of
//! the portable subsystems, the way the reference kernel this is built from
//! separates `arch::{x86_64,aarch64,riscv64}`.

pub mod aarch64;
