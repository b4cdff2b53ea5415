//! Task creation and the process table (component F): loading an ELF image
//! into a fresh address space, handing it a PID and a stack, and the
//! lookup table every other subsystem (scheduler, syscalls, IPC) goes
//! through to reach a `Task` by PID.

pub mod elf;
pub mod task;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::aarch64::context::TaskSavedState;
use crate::error::{KernelError, KernelResult};
use crate::mm::address_space::AddressSpace;
use crate::mm::page_table::MapSize;
use crate::mm::{PageFlags, VirtAddr, PAGE_SIZE};
use crate::sync::GlobalState;
use crate::syscall::default_syscall_table;

pub use task::{Task, TaskState};

/// Pages mapped for a fresh user stack. Growth beyond this is not
/// supported; a task that overflows it takes a data abort like any other
/// unmapped access.
const STACK_PAGES: usize = 2;
/// Top of the user address range, one page below the canonical 48-bit
/// boundary so the stack's top guard page never wraps.
const USER_STACK_TOP: usize = 0x0000_7FFF_FFFF_F000;

static TASKS: GlobalState<BTreeMap<u32, Task>> = GlobalState::new();
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

pub fn init() {
    let _ = TASKS.init(BTreeMap::new());
}

fn alloc_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Load `image` as a fresh task: build its address space, walk its
/// `PT_LOAD` segments, map a stack below [`USER_STACK_TOP`], and hand it to
/// the scheduler ready to run. Returns the new task's PID.
pub fn spawn(name: String, image: &[u8], parent: Option<u32>, priority: u8) -> KernelResult<u32> {
    let address_space = AddressSpace::new()?;
    let entry = elf::load(&address_space.table, image)?;

    let stack_size = STACK_PAGES * PAGE_SIZE;
    let stack_base = USER_STACK_TOP - stack_size;
    for i in 0..STACK_PAGES {
        let frame = crate::mm::phys_alloc::alloc_frame()?;
        address_space.table.map_chunk(
            VirtAddr(stack_base + i * PAGE_SIZE),
            frame.addr(),
            MapSize::Size4K,
            PageFlags::user_rw(),
        )?;
    }

    let pid = alloc_pid();
    let asid = address_space.asid();
    let saved_state = TaskSavedState::new_user(entry, USER_STACK_TOP, address_space.table.root_phys(), asid);
    let task = Task::new(
        pid,
        name,
        priority,
        saved_state,
        Some(address_space),
        default_syscall_table(),
        parent,
    );

    TASKS
        .with_mut(|tasks| tasks.insert(pid, task))
        .ok_or(KernelError::NotInitialized { subsystem: "tasks" })?;

    if let Some(parent_pid) = parent {
        with_task_mut(parent_pid, |p| p.children.push(pid));
    }

    crate::sched::add_new_task(pid, priority);
    Ok(pid)
}

pub fn exists(pid: u32) -> bool {
    TASKS.with(|tasks| tasks.contains_key(&pid)).unwrap_or(false)
}

pub fn with_task<R>(pid: u32, f: impl FnOnce(&Task) -> R) -> Option<R> {
    TASKS.with(|tasks| tasks.get(&pid).map(f)).flatten()
}

pub fn with_task_mut<R>(pid: u32, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
    TASKS.with_mut(|tasks| tasks.get_mut(&pid).map(f)).flatten()
}

/// Remove `pid` from the table, returning its owned `Task`. Dropping the
/// returned value tears down its address space (every mapped frame is
/// freed) and releases its ASID.
pub fn remove(pid: u32) -> Option<Task> {
    TASKS.with_mut(|tasks| tasks.remove(&pid)).flatten()
}

/// Reassign every child of `dead_pid` to its grandparent (or make them
/// top-level orphans if there is none), mirroring how a Unix process tree
/// survives a parent's death.
pub fn reparent_children(dead_pid: u32) {
    let new_parent = with_task(dead_pid, |t| t.parent).flatten();
    let children: Vec<u32> = with_task(dead_pid, |t| t.children.clone()).unwrap_or_default();
    for child in children {
        with_task_mut(child, |t| t.parent = new_parent);
        if let Some(np) = new_parent {
            with_task_mut(np, |t| t.children.push(child));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let _ = TASKS.init(BTreeMap::new());
    }

    fn insert_bare_task(pid: u32, parent: Option<u32>) {
        let saved_state = TaskSavedState::new_user(0, 0, 0, 0);
        let task = Task::new(
            pid,
            String::from("test"),
            crate::sched::DEFAULT_PRIORITY,
            saved_state,
            None,
            default_syscall_table(),
            parent,
        );
        TASKS.with_mut(|tasks| tasks.insert(pid, task));
    }

    #[test]
    fn reparenting_moves_children_to_grandparent() {
        reset();
        insert_bare_task(1, None);
        insert_bare_task(2, Some(1));
        with_task_mut(1, |t| t.children.push(2)).unwrap();

        reparent_children(1);
        assert_eq!(with_task(2, |t| t.parent).unwrap(), None);
    }

    #[test]
    fn reparenting_attaches_to_grandparent_when_present() {
        reset();
        insert_bare_task(1, None);
        insert_bare_task(2, Some(1));
        insert_bare_task(3, Some(2));
        with_task_mut(2, |t| t.children.push(3)).unwrap();

        reparent_children(2);
        assert_eq!(with_task(3, |t| t.parent).unwrap(), Some(1));
        assert!(with_task(1, |t| t.children.contains(&3)).unwrap());
    }

    #[test]
    fn remove_drops_the_task_and_clears_the_table() {
        reset();
        insert_bare_task(9, None);
        assert!(exists(9));
        assert!(remove(9).is_some());
        assert!(!exists(9));
    }
}
