//! Sleep scheduling via a delta queue (component G): rather than storing an
//! absolute wake tick per sleeper, each entry stores the number of ticks
//! *after the previous entry* it still has to wait, so a single decrement
//! of the front entry on every tick ages the whole list.

use alloc::collections::VecDeque;

struct Item {
    pid: u32,
    remaining: u64,
}

#[derive(Default)]
pub struct DeltaQueue {
    items: VecDeque<Item>,
}

impl DeltaQueue {
    pub const fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    /// Park `pid` for `ticks` ticks, inserting it in delta-encoded order.
    pub fn add(&mut self, pid: u32, ticks: u64) {
        let mut elapsed = 0u64;
        let mut insert_at = None;
        for (i, item) in self.items.iter().enumerate() {
            if elapsed + item.remaining > ticks {
                insert_at = Some(i);
                break;
            }
            elapsed += item.remaining;
        }
        match insert_at {
            Some(i) => {
                let remaining = ticks - elapsed;
                self.items[i].remaining -= remaining;
                self.items.insert(i, Item { pid, remaining });
            }
            None => self.items.push_back(Item { pid, remaining: ticks - elapsed }),
        }
    }

    /// Age the queue by one tick and return every PID whose sleep just
    /// expired, in the order they should wake.
    pub fn tick(&mut self) -> alloc::vec::Vec<u32> {
        let mut woken = alloc::vec::Vec::new();
        if let Some(front) = self.items.front_mut() {
            front.remaining = front.remaining.saturating_sub(1);
        } else {
            return woken;
        }
        while let Some(front) = self.items.front() {
            if front.remaining != 0 {
                break;
            }
            woken.push(self.items.pop_front().unwrap().pid);
        }
        woken
    }

    /// Drop `pid` from the queue without firing it, folding its remaining
    /// time into whatever follows so later entries are unaffected. Used
    /// when a sleeping task is terminated or explicitly woken early.
    pub fn remove(&mut self, pid: u32) {
        if let Some(pos) = self.items.iter().position(|i| i.pid == pid) {
            let removed = self.items.remove(pos).unwrap();
            if let Some(next) = self.items.get_mut(pos) {
                next.remaining += removed.remaining;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sleeper_wakes_after_its_ticks() {
        let mut q = DeltaQueue::new();
        q.add(1, 3);
        assert!(q.tick().is_empty());
        assert!(q.tick().is_empty());
        assert_eq!(q.tick(), alloc::vec![1]);
    }

    #[test]
    fn sleepers_wake_in_order_regardless_of_insertion_order() {
        let mut q = DeltaQueue::new();
        q.add(1, 5);
        q.add(2, 2);
        q.add(3, 8);
        let mut woken = alloc::vec::Vec::new();
        for _ in 0..8 {
            woken.extend(q.tick());
        }
        assert_eq!(woken, alloc::vec![2, 1, 3]);
    }

    #[test]
    fn simultaneous_expiry_wakes_both_same_tick() {
        let mut q = DeltaQueue::new();
        q.add(1, 4);
        q.add(2, 4);
        for _ in 0..3 {
            assert!(q.tick().is_empty());
        }
        let mut woken = q.tick();
        woken.sort_unstable();
        assert_eq!(woken, alloc::vec![1, 2]);
    }

    #[test]
    fn remove_folds_remaining_time_into_next_entry() {
        let mut q = DeltaQueue::new();
        q.add(1, 2);
        q.add(2, 5); // delta-encoded as 3 after pid 1
        q.remove(1);
        for _ in 0..4 {
            assert!(q.tick().is_empty());
        }
        assert_eq!(q.tick(), alloc::vec![2]);
    }

    #[test]
    fn empty_queue_tick_is_a_no_op() {
        let mut q = DeltaQueue::new();
        assert!(q.tick().is_empty());
    }
}
