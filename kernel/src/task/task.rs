//! The task control block (component F).

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::aarch64::context::TaskSavedState;
use crate::ipc::MessageQueue;
use crate::mm::address_space::AddressSpace;
use crate::syscall::SyscallTable;

/// Mirrors the states a task moves through; see `[[MODULE]]` task
/// invariants: a terminated task is removed from every run/wait/delta
/// queue before its resources are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Interruptible,
    Uninterruptible,
    Terminated,
}

/// A runnable task: a user process loaded from an ELF image, its own
/// address space, and everything the scheduler and syscall dispatcher need
/// to act on it.
pub struct Task {
    pub pid: u32,
    pub name: String,
    pub state: TaskState,
    pub priority: u8,
    pub saved_state: TaskSavedState,
    /// `None` only for the idle pseudo-task, which never actually runs user
    /// code and has no page tables of its own.
    pub address_space: Option<AddressSpace>,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub message_queue: MessageQueue,
    pub syscall_table: &'static SyscallTable,
    pub elapsed_ticks: u32,
    pub windows: Vec<u32>,
    /// Set while executing a syscall handler or other critical section;
    /// the scheduler will not preempt this task until it clears.
    preemptible: bool,
}

impl Task {
    pub fn new(
        pid: u32,
        name: String,
        priority: u8,
        saved_state: TaskSavedState,
        address_space: Option<AddressSpace>,
        syscall_table: &'static SyscallTable,
        parent: Option<u32>,
    ) -> Self {
        Self {
            pid,
            name,
            state: TaskState::Interruptible,
            priority,
            saved_state,
            address_space,
            parent,
            children: Vec::new(),
            message_queue: MessageQueue::new(),
            syscall_table,
            elapsed_ticks: 0,
            windows: Vec::new(),
            preemptible: true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state == TaskState::Terminated
    }

    pub fn can_preempt(&self) -> bool {
        self.preemptible && !self.is_terminated()
    }

    pub fn set_preemptible(&mut self, value: bool) {
        self.preemptible = value;
    }
}
