//! Preemptive priority scheduler (component G): 32 run queues, a delta
//! queue for sleeping tasks, and the small set of entry points the trap
//! handler, timer interrupt, and IPC wait lists call into.

pub mod delta_queue;
pub mod scheduler;

use crate::error::{KernelResult, SchedError};
use crate::sync::GlobalState;
use crate::task::{self, TaskState};

pub use scheduler::{DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY};

use delta_queue::DeltaQueue;
use scheduler::{time_slice_for, RunQueues};

struct SchedState {
    run: RunQueues,
    sleeping: DeltaQueue,
}

static SCHED: GlobalState<SchedState> = GlobalState::new();

/// Reason a task stopped running, recorded in the kernel log and available
/// for a future `wait_pid`-style syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Exit(i32),
    Fault,
    Killed,
}

pub fn init() {
    let _ = SCHED.init(SchedState {
        run: RunQueues::new(),
        sleeping: DeltaQueue::new(),
    });
}

pub fn current_pid() -> Option<u32> {
    SCHED.with(|s| s.run.current).flatten()
}

fn priority_of(pid: u32) -> u8 {
    task::with_task(pid, |t| t.priority).unwrap_or(DEFAULT_PRIORITY)
}

pub fn is_terminated(pid: u32) -> bool {
    task::with_task(pid, |t| t.is_terminated()).unwrap_or(true)
}

/// Hand a freshly spawned task to the scheduler as ready-to-run.
pub fn add_new_task(pid: u32, priority: u8) {
    task::with_task_mut(pid, |t| t.state = TaskState::Running);
    SCHED.with_mut(|s| s.run.push_ready(pid, priority));
}

fn install(s: &mut SchedState, pid: u32) {
    s.run.current = Some(pid);
    task::with_task_mut(pid, |t| {
        t.elapsed_ticks = 0;
        t.state = TaskState::Running;
    });
}

/// Pick the next task to run: the highest-priority ready task, if the
/// current one (if any) is preemptible right now.
pub fn schedule() {
    SCHED.with_mut(|s| {
        if let Some(cur) = s.run.current {
            if !task::with_task(cur, |t| t.can_preempt()).unwrap_or(true) {
                return;
            }
        }
        if let Some((pid, _)) = s.run.pop_highest() {
            if let Some(cur) = s.run.current {
                if cur != pid && !task::with_task(cur, |t| t.is_terminated()).unwrap_or(true) {
                    s.run.push_ready(cur, priority_of(cur));
                }
            }
            install(s, pid);
        }
    });
}

/// Called once per timer tick: age sleeping tasks, then either preempt the
/// current task for a higher-priority arrival or round-robin it once its
/// time slice is spent.
pub fn timer_tick() {
    SCHED.with_mut(|s| {
        for pid in s.sleeping.tick() {
            wake_locked(s, pid);
        }

        let Some(cur) = s.run.current else { return };
        task::with_task_mut(cur, |t| t.elapsed_ticks += 1);
        if !task::with_task(cur, |t| t.can_preempt()).unwrap_or(true) {
            return;
        }

        let cur_priority = priority_of(cur);
        if let Some((pid, _)) = s.run.pop_higher_than(cur_priority) {
            s.run.push_ready(cur, cur_priority);
            install(s, pid);
            return;
        }

        let elapsed = task::with_task(cur, |t| t.elapsed_ticks).unwrap_or(0);
        if elapsed >= time_slice_for(cur_priority) {
            if let Some((pid, _)) = s.run.pop_same_or_lower(cur_priority) {
                s.run.push_ready(cur, cur_priority);
                install(s, pid);
            }
        }
    });
}

/// Voluntarily give up the remainder of the current time slice.
pub fn yield_now() {
    SCHED.with_mut(|s| {
        let Some(cur) = s.run.current else { return };
        let priority = priority_of(cur);
        if let Some((pid, _)) = s.run.pop_same_or_lower(priority) {
            s.run.push_ready(cur, priority);
            install(s, pid);
        }
    });
}

fn unschedule(s: &mut SchedState, pid: u32) {
    let priority = priority_of(pid);
    if s.run.current == Some(pid) {
        s.run.current = None;
    } else {
        s.run.remove_ready(pid, priority);
    }
}

/// Take `pid` off the ready queue and mark it uninterruptible. Used by
/// [`crate::ipc::wait_list::WaitList::add`] right before parking a task.
pub fn pause(pid: u32) {
    SCHED.with_mut(|s| {
        if !task::with_task(pid, |t| t.is_running()).unwrap_or(false) {
            return;
        }
        unschedule(s, pid);
        task::with_task_mut(pid, |t| t.state = TaskState::Uninterruptible);
    });
}

fn wake_locked(s: &mut SchedState, pid: u32) {
    let already_running = task::with_task(pid, |t| t.is_running()).unwrap_or(true);
    let terminated = task::with_task(pid, |t| t.is_terminated()).unwrap_or(true);
    if already_running || terminated {
        return;
    }
    task::with_task_mut(pid, |t| t.state = TaskState::Running);
    s.run.push_ready(pid, priority_of(pid));
}

/// Move a parked task back onto its priority's ready queue.
pub fn wake(pid: u32) {
    SCHED.with_mut(|s| wake_locked(s, pid));
}

/// Park `pid` in the delta queue for `ticks` timer ticks.
pub fn sleep(pid: u32, ticks: u64) {
    SCHED.with_mut(|s| {
        if task::with_task(pid, |t| t.is_running()).unwrap_or(false) {
            unschedule(s, pid);
        }
        task::with_task_mut(pid, |t| t.state = TaskState::Uninterruptible);
        s.sleeping.add(pid, ticks);
    });
}

pub fn set_priority(pid: u32, priority: u8) -> KernelResult<()> {
    if priority > MAX_PRIORITY {
        return Err(SchedError::InvalidPriority { priority }.into());
    }
    if !task::exists(pid) {
        return Err(SchedError::TaskNotFound { pid }.into());
    }
    SCHED.with_mut(|s| {
        let old = priority_of(pid);
        if old != priority && s.run.current != Some(pid) && s.run.remove_ready(pid, old) {
            s.run.push_ready(pid, priority);
        }
    });
    task::with_task_mut(pid, |t| t.priority = priority);
    Ok(())
}

pub fn get_priority(pid: u32) -> KernelResult<u8> {
    task::with_task(pid, |t| t.priority).ok_or(SchedError::TaskNotFound { pid }.into())
}

/// Terminate `pid`: pull it out of every scheduler-owned structure,
/// reparent its children, and drop its `Task` (which tears down its
/// address space and frees every frame it owned).
pub fn terminate(pid: u32, reason: ExitReason) {
    log::info!("task {} exiting: {:?}", pid, reason);
    SCHED.with_mut(|s| {
        unschedule(s, pid);
        s.sleeping.remove(pid);
    });
    task::with_task_mut(pid, |t| t.state = TaskState::Terminated);
    task::reparent_children(pid);
    let _ = task::remove(pid);
    schedule();
}

pub fn terminate_current(reason: ExitReason) {
    if let Some(pid) = current_pid() {
        terminate(pid, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let _ = SCHED.init(SchedState {
            run: RunQueues::new(),
            sleeping: DeltaQueue::new(),
        });
    }

    #[test]
    fn time_slice_matches_priority() {
        assert_eq!(time_slice_for(0), 1);
        assert_eq!(time_slice_for(15), 10);
        assert_eq!(time_slice_for(31), 10);
    }

    #[test]
    fn schedule_with_no_tasks_leaves_current_none() {
        reset();
        schedule();
        assert_eq!(current_pid(), None);
    }
}
