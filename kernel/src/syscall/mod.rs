//! Syscall table and dispatch (component H).
//!
//! A [`SyscallTable`] is a sparse array indexed by syscall number: most
//! tasks share the single [`default_syscall_table`], but the type exists
//! as its own value so a future sandboxed task could be handed a table
//! with fewer slots filled in.

pub mod user;

use lazy_static::lazy_static;

use crate::error::{KernelError, KernelResult};
use crate::mm::address_space::AddressSpace;
use crate::trap::TrapFrame;
use crate::wm;

/// Highest syscall id this table will ever hold, per the spec's "< 512"
/// sparse-array sizing.
const MAX_SYSCALLS: usize = 512;

pub type SyscallHandler = fn(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64>;

/// Sparse syscall dispatch table: each slot is either unset (yields
/// `UnknownSyscall`) or a handler taking the caller's PID and trap frame.
pub struct SyscallTable {
    handlers: [Option<SyscallHandler>; MAX_SYSCALLS],
}

impl SyscallTable {
    const fn empty() -> Self {
        Self { handlers: [None; MAX_SYSCALLS] }
    }

    fn register(&mut self, id: u32, handler: SyscallHandler) {
        self.handlers[id as usize] = Some(handler);
    }

    pub fn dispatch(&self, id: u32, pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
        match self.handlers.get(id as usize).copied().flatten() {
            Some(handler) => handler(pid, frame),
            None => Err(KernelError::UnknownSyscall { id }),
        }
    }
}

lazy_static! {
    static ref DEFAULT_TABLE: SyscallTable = build_default_table();
}

/// The syscall table every task is handed at spawn time (see
/// [`crate::task::spawn`]).
pub fn default_syscall_table() -> &'static SyscallTable {
    &DEFAULT_TABLE
}

fn build_default_table() -> SyscallTable {
    let mut t = SyscallTable::empty();
    t.register(0, sys_exit);
    t.register(1, sys_print);
    t.register(2, sys_getpid);
    t.register(3, sys_debug);
    t.register(4, sys_spawn);
    t.register(5, sys_sleep);
    t.register(6, sys_yield);
    t.register(7, sys_sched_set_priority);
    t.register(8, sys_sched_get_priority);
    t.register(9, sys_sbrk);
    t.register(10, sys_poll_message);
    t.register(11, sys_wait_message);
    t.register(12, sys_window_create);
    t.register(13, sys_window_destroy);
    t.register(14, sys_window_set_title);
    t.register(15, sys_window_set_visibility);
    t.register(16, sys_window_set_geometry);
    t.register(17, sys_window_get_geometry);
    t.register(18, sys_window_present);
    t.register(19, sys_gfx_draw_line);
    t.register(20, sys_gfx_draw_rect);
    t.register(21, sys_gfx_fill_rect);
    t.register(22, sys_gfx_draw_text);
    t
}

/// Entry point called from [`crate::trap::handle_sync_user`]. Resolves the
/// calling task from the scheduler, looks up its own syscall table (so a
/// future restricted task can be handed a narrower one), and dispatches.
pub fn dispatch(frame: &mut TrapFrame) -> KernelResult<i64> {
    let pid = crate::sched::current_pid()
        .ok_or(KernelError::Internal { msg: "syscall taken with no current task" })?;
    let id = frame.syscall_id();
    let table = crate::task::with_task(pid, |t| t.syscall_table)
        .ok_or(KernelError::ProcessNotFound { pid })?;
    table.dispatch(id, pid, frame)
}

fn current_address_space<R>(pid: u32, f: impl FnOnce(&mut AddressSpace) -> R) -> KernelResult<R> {
    crate::task::with_task_mut(pid, |t| t.address_space.as_mut().map(f))
        .flatten()
        .ok_or(KernelError::Internal { msg: "task has no address space" })
}

fn sys_exit(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let status = frame.arg(0) as i32;
    crate::sched::terminate(pid, crate::sched::ExitReason::Exit(status));
    Ok(0)
}

/// Writes a log line identifying the calling task, mirroring the
/// reference kernel's `pika_sys_print` (an unchecked read of a raw user
/// pointer; this kernel carries no user-copy trampoline either).
fn sys_print(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    // SAFETY: the task-supplied pointer is trusted the same way the
    // reference implementation trusts it; an invalid pointer faults the
    // calling task rather than the kernel.
    let msg = unsafe { user::read_cstr(frame.arg(0)) };
    log::info!("[pid {}] {}", pid, msg);
    Ok(0)
}

fn sys_getpid(pid: u32, _frame: &mut TrapFrame) -> KernelResult<i64> {
    Ok(pid as i64)
}

fn sys_debug(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    log::info!("debug: {} from pid={}", frame.arg(0), pid);
    Ok(0)
}

/// No filesystem exists in this kernel's scope, so there is nowhere to
/// load an ELF image from. The reference implementation's own `spawn`
/// syscall is a no-op stub for the same reason; this mirrors it rather
/// than inventing a loader the spec does not call for.
fn sys_spawn(pid: u32, _frame: &mut TrapFrame) -> KernelResult<i64> {
    log::warn!("pid {} called spawn, which is unsupported (no filesystem)", pid);
    Ok(0)
}

fn sys_sleep(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let microseconds = frame.arg(0);
    let ticks = microseconds.div_ceil(crate::timer::TICK_INTERVAL_US as u64).max(1);
    crate::sched::sleep(pid, ticks);
    Ok(0)
}

fn sys_yield(_pid: u32, _frame: &mut TrapFrame) -> KernelResult<i64> {
    crate::sched::yield_now();
    Ok(0)
}

fn sys_sched_set_priority(_pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let target = frame.arg(0) as u32;
    let priority = frame.arg(1) as u8;
    crate::sched::set_priority(target, priority)?;
    Ok(0)
}

fn sys_sched_get_priority(_pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let target = frame.arg(0) as u32;
    let out_ptr = frame.arg(1);
    let priority = crate::sched::get_priority(target)?;
    // SAFETY: same unchecked-pointer contract as every other syscall that
    // writes an output parameter back to the caller.
    unsafe { user::write_u32(out_ptr, priority as u32) };
    Ok(0)
}

fn sys_sbrk(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let delta = frame.arg(0) as i64;
    let old_end = current_address_space(pid, |a| a.sbrk(delta))??;
    Ok(old_end as i64)
}

fn sys_poll_message(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let out_ptr = frame.arg(0);
    let msg = crate::task::with_task(pid, |t| t.message_queue.dequeue())
        .ok_or(KernelError::ProcessNotFound { pid })??;
    // SAFETY: unchecked-pointer contract, see module docs.
    unsafe { user::write_message(out_ptr, msg) };
    Ok(0)
}

/// Blocks via [`KernelError::WouldBlock`], which
/// [`crate::trap::handle_sync_user`] turns into a PC rewind over the `svc`
/// instruction so this syscall is re-issued in full once the queue has
/// something in it.
fn sys_wait_message(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let out_ptr = frame.arg(0);
    let would_block = crate::task::with_task(pid, |t| t.message_queue.block_until_not_empty(pid))
        .ok_or(KernelError::ProcessNotFound { pid })?;
    if would_block {
        return Err(KernelError::WouldBlock);
    }
    let msg = crate::task::with_task(pid, |t| t.message_queue.dequeue())
        .ok_or(KernelError::ProcessNotFound { pid })??;
    // SAFETY: unchecked-pointer contract, see module docs.
    unsafe { user::write_message(out_ptr, msg) };
    Ok(0)
}

/// Window creation takes no geometry (mirroring the reference window
/// manager, whose `create_window` also takes none): a task gets a
/// default-cascaded rectangle and moves it with `window_set_geometry`.
fn sys_window_create(pid: u32, _frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = wm::create_window(pid, wm::POS_DEFAULT, wm::POS_DEFAULT, 0, 0)?;
    crate::task::with_task_mut(pid, |t| t.windows.push(id));
    Ok(id as i64)
}

fn sys_window_destroy(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = frame.arg(0) as u32;
    wm::destroy_window(id, pid)?;
    crate::task::with_task_mut(pid, |t| t.windows.retain(|&w| w != id));
    Ok(0)
}

fn sys_window_set_title(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = frame.arg(0) as u32;
    // SAFETY: unchecked-pointer contract, see module docs.
    let title = unsafe { user::read_cstr(frame.arg(1)) };
    wm::set_title(id, pid, &title)?;
    Ok(0)
}

fn sys_window_set_visibility(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = frame.arg(0) as u32;
    let visible = frame.arg(1) != 0;
    wm::set_visibility(id, pid, visible)?;
    Ok(0)
}

fn sys_window_set_geometry(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = frame.arg(0) as u32;
    let x = frame.arg(1) as i32;
    let y = frame.arg(2) as i32;
    let w = frame.arg(3) as u32;
    let h = frame.arg(4) as u32;
    wm::set_geometry(id, pid, x, y, w, h)?;
    Ok(0)
}

fn sys_window_get_geometry(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = frame.arg(0) as u32;
    let (x, y, w, h) = wm::get_geometry(id, pid)?;
    // SAFETY: unchecked-pointer contract, see module docs; four adjacent
    // output parameters given the ABI's six-register argument budget.
    unsafe {
        user::write_i32(frame.arg(1), x);
        user::write_i32(frame.arg(2), y);
        user::write_u32(frame.arg(3), w);
        user::write_u32(frame.arg(4), h);
    }
    Ok(0)
}

fn sys_window_present(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = frame.arg(0) as u32;
    wm::present(id, pid)?;
    Ok(0)
}

/// Resolves the window the gfx_draw_* syscalls paint onto: whichever
/// window currently has focus, per spec wording, restricted to windows
/// the calling task actually owns.
fn focused_owned_window(pid: u32) -> KernelResult<u32> {
    let id = wm::focused_window()
        .ok_or(KernelError::GfxError(crate::error::GfxError::InvalidWindow { id: 0 }))?;
    crate::task::with_task(pid, |t| t.windows.contains(&id))
        .filter(|&owns| owns)
        .ok_or(KernelError::GfxError(crate::error::GfxError::InvalidWindow { id }))?;
    Ok(id)
}

fn sys_gfx_draw_line(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = focused_owned_window(pid)?;
    let (x0, y0, x1, y1, color) = (
        frame.arg(0) as i32,
        frame.arg(1) as i32,
        frame.arg(2) as i32,
        frame.arg(3) as i32,
        frame.arg(4) as u32,
    );
    wm::with_window_mut(id, pid, |w| w.draw_line(x0, y0, x1, y1, color))?;
    Ok(0)
}

fn sys_gfx_draw_rect(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = focused_owned_window(pid)?;
    let (x, y, w, h, color) = (
        frame.arg(0) as i32,
        frame.arg(1) as i32,
        frame.arg(2) as u32,
        frame.arg(3) as u32,
        frame.arg(4) as u32,
    );
    wm::with_window_mut(id, pid, |win| win.draw_rect(x, y, w, h, color))?;
    Ok(0)
}

fn sys_gfx_fill_rect(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = focused_owned_window(pid)?;
    let (x, y, w, h, color) = (
        frame.arg(0) as i32,
        frame.arg(1) as i32,
        frame.arg(2) as u32,
        frame.arg(3) as u32,
        frame.arg(4) as u32,
    );
    wm::with_window_mut(id, pid, |win| win.fill_rect(x, y, w, h, color))?;
    Ok(0)
}

fn sys_gfx_draw_text(pid: u32, frame: &mut TrapFrame) -> KernelResult<i64> {
    let id = focused_owned_window(pid)?;
    let (x, y, color) = (frame.arg(0) as i32, frame.arg(1) as i32, frame.arg(3) as u32);
    // SAFETY: unchecked-pointer contract, see module docs.
    let text = unsafe { user::read_cstr(frame.arg(2)) };
    wm::with_window_mut(id, pid, |w| w.draw_text(x, y, &text, color))?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame() -> TrapFrame {
        // SAFETY: a zeroed TrapFrame is a valid bit pattern for this
        // plain-data, `#[repr(C)]` register save area.
        unsafe { core::mem::zeroed() }
    }

    #[test]
    fn unregistered_syscall_is_unknown() {
        let table = SyscallTable::empty();
        let err = table.dispatch(500, 1, &mut test_frame()).unwrap_err();
        assert!(matches!(err, KernelError::UnknownSyscall { id: 500 }));
    }

    #[test]
    fn default_table_covers_every_documented_id() {
        let table = default_syscall_table();
        for id in 0..=22u32 {
            assert!(table.handlers[id as usize].is_some(), "syscall {} missing", id);
        }
    }
}
