use std::collections::VecDeque;

use parking_lot::Mutex;

/// A bounded multi-producer multi-consumer queue guarded by a short spin.
///
/// One ring per collector slave; the master is the sole producer while work
/// is being distributed, and idle slaves steal half of a peer's ring.
#[derive(Debug)]
pub struct TaskRing<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> TaskRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "task ring capacity must be > 0");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns the task back to the caller when the ring is full.
    pub fn push_back(&self, task: T) -> Result<(), T> {
        let mut q = self.inner.lock();
        if q.len() == self.capacity {
            return Err(task);
        }
        q.push_back(task);
        Ok(())
    }

    pub fn pop_front(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Move half of `victim`'s tasks (rounded up) into this ring, bounded by
    /// the free space here. Both locks are taken in address order so two
    /// concurrent steals cannot deadlock.
    pub fn steal_from(&self, victim: &TaskRing<T>) -> bool {
        if std::ptr::eq(self, victim) {
            return false;
        }
        let (mut ours, mut theirs) = if (self as *const Self) < (victim as *const Self) {
            let a = self.inner.lock();
            let b = victim.inner.lock();
            (a, b)
        } else {
            let b = victim.inner.lock();
            let a = self.inner.lock();
            (a, b)
        };

        let want = theirs.len().div_ceil(2);
        let room = self.capacity - ours.len();
        let take = want.min(room);
        if take == 0 {
            return false;
        }
        for _ in 0..take {
            // Steal from the front: oldest tasks first, like the owner pops.
            let task = theirs.pop_front().expect("victim length checked above");
            ours.push_back(task);
        }
        true
    }
}
