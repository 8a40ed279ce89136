use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::ring::TaskRing;

/// Fans tasks out over a fixed set of slaves.
///
/// The master is the sole producer: it round-robins tasks into one bounded
/// ring per slave and spins when a ring is full. Slaves drain their own ring
/// and steal half of a peer's when empty. There is no completion condvar:
/// a slave exits once it observes `master done ∧ own ring empty` after a
/// failed steal sweep.
pub struct Parallelizer<T: Send> {
    queues: Box<[TaskRing<T>]>,
    master_up: AtomicBool,
    master_done: AtomicBool,
}

impl<T: Send> Parallelizer<T> {
    pub fn new(num_slaves: u32, queue_depth: u32) -> Self {
        assert!(num_slaves > 0 && queue_depth > 0, "invalid parallelizer shape");
        let queues = (0..num_slaves)
            .map(|_| TaskRing::new(queue_depth as usize))
            .collect();
        Self {
            queues,
            master_up: AtomicBool::new(false),
            master_done: AtomicBool::new(false),
        }
    }

    pub fn num_slaves(&self) -> usize {
        self.queues.len()
    }

    /// Run one fan-out round: spawn the slaves, feed them through `master`,
    /// and return once every task has been executed.
    pub fn execute<M, S>(&self, master: M, slave: S)
    where
        M: FnOnce(&mut TaskSink<'_, T>),
        S: Fn(usize, T) + Sync,
    {
        self.master_up.store(false, Ordering::Relaxed);
        self.master_done.store(false, Ordering::Relaxed);

        let slave = &slave;
        thread::scope(|s| {
            for tid in 0..self.queues.len() {
                s.spawn(move || self.slave_loop(tid, slave));
            }
            self.master_up.store(true, Ordering::Release);
            let mut sink = TaskSink {
                queues: &self.queues[..],
                cursor: 0,
            };
            master(&mut sink);
            self.master_done.store(true, Ordering::Release);
        });

        debug_assert!(self.queues.iter().all(|q| q.is_empty()));
    }

    fn slave_loop<S>(&self, tid: usize, slave: &S)
    where
        S: Fn(usize, T) + Sync,
    {
        loop {
            if let Some(task) = self.queues[tid].pop_front() {
                slave(tid, task);
                continue;
            }
            if !self.master_up.load(Ordering::Acquire) {
                thread::yield_now();
                continue;
            }
            let mut stole = false;
            for peer in 0..self.queues.len() {
                if peer == tid {
                    continue;
                }
                if self.queues[tid].steal_from(&self.queues[peer]) {
                    stole = true;
                    break;
                }
            }
            if stole {
                continue;
            }
            if self.master_done.load(Ordering::Acquire) && self.queues[tid].is_empty() {
                return;
            }
            thread::yield_now();
        }
    }
}

/// The master's handle for dispatching tasks round-robin.
pub struct TaskSink<'a, T> {
    queues: &'a [TaskRing<T>],
    cursor: usize,
}

impl<T> TaskSink<'_, T> {
    pub fn push(&mut self, mut task: T) {
        loop {
            let queue = &self.queues[self.cursor];
            self.cursor = (self.cursor + 1) % self.queues.len();
            match queue.push_back(task) {
                Ok(()) => return,
                Err(back) => task = back,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    #[test]
    fn all_tasks_execute_exactly_once() {
        let par = Parallelizer::<u64>::new(4, 8);
        let sum = AtomicU64::new(0);
        let count = AtomicUsize::new(0);

        par.execute(
            |sink| {
                for i in 1..=1000u64 {
                    sink.push(i);
                }
            },
            |_tid, task| {
                sum.fetch_add(task, Ordering::Relaxed);
                count.fetch_add(1, Ordering::Relaxed);
            },
        );

        assert_eq!(count.load(Ordering::Relaxed), 1000);
        assert_eq!(sum.load(Ordering::Relaxed), 1000 * 1001 / 2);
    }

    #[test]
    fn uneven_tasks_are_stolen() {
        // One slow task up front; the rest must drain through stealing
        // while slave 0 is busy.
        let par = Parallelizer::<u64>::new(2, 256);
        let done = AtomicUsize::new(0);

        par.execute(
            |sink| {
                for i in 0..200u64 {
                    sink.push(i);
                }
            },
            |_tid, task| {
                if task == 0 {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                done.fetch_add(1, Ordering::Relaxed);
            },
        );

        assert_eq!(done.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn reusable_across_rounds() {
        let par = Parallelizer::<usize>::new(3, 4);
        for round in 0..3 {
            let count = AtomicUsize::new(0);
            par.execute(
                |sink| {
                    for i in 0..(50 * (round + 1)) {
                        sink.push(i);
                    }
                },
                |_tid, _task| {
                    count.fetch_add(1, Ordering::Relaxed);
                },
            );
            assert_eq!(count.load(Ordering::Relaxed), 50 * (round + 1));
        }
    }
}
