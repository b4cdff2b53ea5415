//! Bounded FIFO message queue (component I), the primitive behind the
//! `wait_message`/`poll_message` syscalls and window event delivery.

use spin::Mutex;

use crate::error::{IpcError, KernelResult};

use super::wait_list::WaitList;

/// Capacity chosen to match the window manager's event queue; generic
/// enough for any task-owned queue.
pub const CAPACITY: usize = 64;

/// A generic kernel-to-task event. `kind` is one of the `SYS_MSG_*`
/// constants defined in [`crate::wm`]; `data` carries kind-specific
/// payload (e.g. a packed key event, or x/y/w/h for a resize).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Message {
    pub kind: u32,
    pub data: [u64; 4],
}

struct Ring {
    slots: [Message; CAPACITY],
    head: usize,
    len: usize,
}

impl Ring {
    const fn empty() -> Self {
        Self {
            slots: [Message { kind: 0, data: [0; 4] }; CAPACITY],
            head: 0,
            len: 0,
        }
    }
}

/// A bounded FIFO of [`Message`] plus the wait list of tasks blocked on
/// `wait_message` against it.
pub struct MessageQueue {
    ring: Mutex<Ring>,
    waiters: WaitList,
}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::empty()),
            waiters: WaitList::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().len == 0
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().len == CAPACITY
    }

    /// Append `msg` to the tail and wake every task parked on an empty
    /// queue. Fails if the queue is already full.
    pub fn enqueue(&self, msg: Message) -> KernelResult<()> {
        {
            let mut ring = self.ring.lock();
            if ring.len == CAPACITY {
                return Err(IpcError::QueueFull.into());
            }
            let tail = (ring.head + ring.len) % CAPACITY;
            ring.slots[tail] = msg;
            ring.len += 1;
        }
        self.waiters.wake_all();
        Ok(())
    }

    /// Pop the head message. Fails if the queue is empty.
    pub fn dequeue(&self) -> KernelResult<Message> {
        let mut ring = self.ring.lock();
        if ring.len == 0 {
            return Err(IpcError::QueueEmpty.into());
        }
        let msg = ring.slots[ring.head];
        ring.head = (ring.head + 1) % CAPACITY;
        ring.len -= 1;
        Ok(msg)
    }

    /// Park `pid` on this queue's wait list if it is currently empty.
    /// Returns whether the caller must block.
    pub fn block_until_not_empty(&self, pid: u32) -> bool {
        if !self.is_empty() {
            return false;
        }
        self.waiters.add(pid);
        true
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_is_preserved() {
        let q = MessageQueue::new();
        q.enqueue(Message { kind: 1, data: [0; 4] }).unwrap();
        q.enqueue(Message { kind: 2, data: [0; 4] }).unwrap();
        assert_eq!(q.dequeue().unwrap().kind, 1);
        assert_eq!(q.dequeue().unwrap().kind, 2);
    }

    #[test]
    fn dequeue_on_empty_queue_fails() {
        let q = MessageQueue::new();
        assert!(q.dequeue().is_err());
    }

    #[test]
    fn enqueue_past_capacity_fails() {
        let q = MessageQueue::new();
        for i in 0..CAPACITY {
            q.enqueue(Message { kind: i as u32, data: [0; 4] }).unwrap();
        }
        assert!(q.enqueue(Message { kind: 999, data: [0; 4] }).is_err());
    }

    #[test]
    fn wraps_around_the_ring() {
        let q = MessageQueue::new();
        for i in 0..CAPACITY {
            q.enqueue(Message { kind: i as u32, data: [0; 4] }).unwrap();
        }
        for i in 0..CAPACITY / 2 {
            assert_eq!(q.dequeue().unwrap().kind, i as u32);
        }
        for i in 0..CAPACITY / 2 {
            q.enqueue(Message { kind: 100 + i as u32, data: [0; 4] }).unwrap();
        }
        for i in CAPACITY / 2..CAPACITY {
            assert_eq!(q.dequeue().unwrap().kind, i as u32);
        }
        for i in 0..CAPACITY / 2 {
            assert_eq!(q.dequeue().unwrap().kind, 100 + i as u32);
        }
    }
}
