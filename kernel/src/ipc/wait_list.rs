//! Task wait lists (component I): a FIFO of parked PIDs shared by message
//! queues, pipes, and anywhere else a task blocks waiting for a condition
//! another task or IRQ will satisfy.

use alloc::collections::VecDeque;
use spin::Mutex;

/// A list of parked tasks, identified by PID. Ownership of *pausing* and
/// *waking* the task lives in [`crate::sched`]; this type only tracks who is
/// waiting and in what order.
#[derive(Default)]
pub struct WaitList {
    waiters: Mutex<VecDeque<u32>>,
}

impl WaitList {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Park `pid`: pause it and record it at the back of the queue.
    pub fn add(&self, pid: u32) {
        if crate::sched::is_terminated(pid) {
            return;
        }
        crate::sched::pause(pid);
        self.waiters.lock().push_back(pid);
    }

    /// Wake the first entry that has not been terminated since it was
    /// parked, discarding terminated entries ahead of it.
    pub fn wake_one(&self) {
        let mut waiters = self.waiters.lock();
        while let Some(pid) = waiters.pop_front() {
            if !crate::sched::is_terminated(pid) {
                crate::sched::wake(pid);
                return;
            }
        }
    }

    /// Wake every live entry and drop the list.
    pub fn wake_all(&self) {
        let mut waiters = self.waiters.lock();
        for pid in waiters.drain(..) {
            if !crate::sched::is_terminated(pid) {
                crate::sched::wake(pid);
            }
        }
    }

    /// Drop `pid` from the list without waking it, used when a task is
    /// terminated while still parked somewhere.
    pub fn remove(&self, pid: u32) {
        self.waiters.lock().retain(|&p| p != pid);
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_one_skips_removed_entries() {
        let list = WaitList::new();
        list.waiters.lock().push_back(1);
        list.waiters.lock().push_back(2);
        list.remove(1);
        // wake_one would call into crate::sched here on a real boot; this
        // test only exercises the queue bookkeeping in isolation.
        assert_eq!(list.waiters.lock().len(), 1);
        assert_eq!(list.waiters.lock()[0], 2);
    }

    #[test]
    fn is_empty_reflects_state() {
        let list = WaitList::new();
        assert!(list.is_empty());
        list.waiters.lock().push_back(7);
        assert!(!list.is_empty());
    }
}
