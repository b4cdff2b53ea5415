//! Kernel-wide error taxonomy.
//!
//! A single [`KernelError`] type is threaded through every subsystem instead
//! of `&'static str` or bare `-1` sentinels. At the syscall boundary it is
//! converted to a negative `errno`-style integer via [`KernelError::to_errno`];
//! everywhere else it is propagated with `?`.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Success sentinel, used only where a `KernelResult` must carry an
    /// explicit "ok" value across an FFI-style boundary.
    Ok,
    OutOfMemory { requested: usize, available: usize },
    InvalidAddress { addr: usize },
    UnmappedMemory { addr: usize },
    ProcessNotFound { pid: u32 },
    InvalidPriority { priority: u8 },
    QueueEmpty,
    QueueFull,
    UnknownSyscall { id: u32 },
    InvalidWindow { id: u32 },
    InvalidFile,
    WouldBlock,
    BrokenPipe,
    NotInitialized { subsystem: &'static str },
    InvalidArgument { name: &'static str, value: &'static str },
    PermissionDenied { operation: &'static str },
    NotFound { resource: &'static str },
    ResourceExhausted { resource: &'static str },
    AlreadyExists { resource: &'static str, id: u64 },
    Timeout { operation: &'static str },
    DtbError(DtbError),
    MmError(MmError),
    SchedError(SchedError),
    IpcError(IpcError),
    GfxError(GfxError),
    /// Internal invariant violation: reserved for states that should be
    /// unreachable and are fatal when they occur.
    Internal { msg: &'static str },
    /// Generic catch-all for conditions not worth a dedicated variant.
    Generic { msg: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtbError {
    BadMagic,
    Misaligned,
    UnexpectedToken,
    Truncated,
    PropertyNotFound,
    NodeNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    OutOfFrames,
    NotContiguous,
    AlreadyMapped { va: usize },
    NotMapped { va: usize },
    Misaligned,
    AsidsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidPriority { priority: u8 },
    TaskNotFound { pid: u32 },
    QueueEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    QueueFull,
    QueueEmpty,
    BrokenPipe,
    WouldBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxError {
    InvalidWindow { id: u32 },
    OutOfRange,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{:x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{:x}", addr),
            Self::ProcessNotFound { pid } => write!(f, "process {} not found", pid),
            Self::InvalidPriority { priority } => write!(f, "invalid priority {}", priority),
            Self::QueueEmpty => write!(f, "queue empty"),
            Self::QueueFull => write!(f, "queue full"),
            Self::UnknownSyscall { id } => write!(f, "unknown syscall {}", id),
            Self::InvalidWindow { id } => write!(f, "invalid window {}", id),
            Self::InvalidFile => write!(f, "invalid file"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::NotInitialized { subsystem } => write!(f, "{} not initialized", subsystem),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument {}: {}", name, value)
            }
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for {}", operation)
            }
            Self::NotFound { resource } => write!(f, "{} not found", resource),
            Self::ResourceExhausted { resource } => write!(f, "{} exhausted", resource),
            Self::AlreadyExists { resource, id } => write!(f, "{} {} already exists", resource, id),
            Self::Timeout { operation } => write!(f, "timeout during {}", operation),
            Self::DtbError(e) => write!(f, "device tree error: {:?}", e),
            Self::MmError(e) => write!(f, "memory management error: {:?}", e),
            Self::SchedError(e) => write!(f, "scheduler error: {:?}", e),
            Self::IpcError(e) => write!(f, "ipc error: {:?}", e),
            Self::GfxError(e) => write!(f, "graphics error: {:?}", e),
            Self::Internal { msg } => write!(f, "internal error: {}", msg),
            Self::Generic { msg } => write!(f, "{}", msg),
        }
    }
}

impl From<DtbError> for KernelError {
    fn from(e: DtbError) -> Self {
        Self::DtbError(e)
    }
}

impl From<MmError> for KernelError {
    fn from(e: MmError) -> Self {
        Self::MmError(e)
    }
}

impl From<SchedError> for KernelError {
    fn from(e: SchedError) -> Self {
        Self::SchedError(e)
    }
}

impl From<IpcError> for KernelError {
    fn from(e: IpcError) -> Self {
        Self::IpcError(e)
    }
}

impl From<GfxError> for KernelError {
    fn from(e: GfxError) -> Self {
        Self::GfxError(e)
    }
}

impl KernelError {
    /// Collapse the taxonomy to a syscall return value. This is the one
    /// place the error type degrades to an integer.
    pub fn to_errno(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::OutOfMemory { .. } | Self::MmError(MmError::OutOfFrames) => -12,
            Self::InvalidAddress { .. } | Self::UnmappedMemory { .. } => -14,
            Self::ProcessNotFound { .. } => -3,
            Self::InvalidPriority { .. } => -22,
            Self::QueueEmpty | Self::IpcError(IpcError::QueueEmpty) => -61,
            Self::QueueFull | Self::IpcError(IpcError::QueueFull) => -105,
            Self::UnknownSyscall { .. } => -38,
            Self::InvalidWindow { .. } | Self::GfxError(GfxError::InvalidWindow { .. }) => -22,
            Self::InvalidFile => -9,
            Self::WouldBlock | Self::IpcError(IpcError::WouldBlock) => -11,
            Self::BrokenPipe | Self::IpcError(IpcError::BrokenPipe) => -32,
            Self::PermissionDenied { .. } => -13,
            Self::NotFound { .. } => -2,
            Self::ResourceExhausted { .. } => -105,
            Self::AlreadyExists { .. } => -17,
            Self::Timeout { .. } => -110,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_distinguishes_common_cases() {
        assert_eq!(KernelError::Ok.to_errno(), 0);
        assert_eq!(KernelError::QueueEmpty.to_errno(), -61);
        assert_eq!(KernelError::QueueFull.to_errno(), -105);
        assert_ne!(
            KernelError::ProcessNotFound { pid: 1 }.to_errno(),
            KernelError::InvalidFile.to_errno()
        );
    }

    #[test]
    fn from_conversions_roundtrip_through_display() {
        let e: KernelError = MmError::OutOfFrames.into();
        assert!(matches!(e, KernelError::MmError(MmError::OutOfFrames)));
        assert_eq!(e.to_errno(), -12);
    }
}
