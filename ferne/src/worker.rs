use std::cell::Cell;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};

use heap::MAX_CORES;
use parking_lot::Mutex;

/// Observable per-worker state. Exactly one of `InV0`/`InV1` is the
/// process-wide expected status at any moment; `Gc` marks collector slaves.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Out = 0,
    InV0 = 1,
    InV1 = 2,
    Gc = 3,
}

impl From<u8> for Status {
    fn from(val: u8) -> Self {
        match val {
            1 => Status::InV0,
            2 => Status::InV1,
            3 => Status::Gc,
            _ => Status::Out,
        }
    }
}

#[repr(align(64))]
struct WorkerSlot {
    status: AtomicU8,
    counts: [AtomicI32; 4],
}

impl WorkerSlot {
    const fn new() -> Self {
        Self {
            status: AtomicU8::new(Status::Out as u8),
            counts: [
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
            ],
        }
    }
}

static SLOTS: [WorkerSlot; MAX_CORES] = [const { WorkerSlot::new() }; MAX_CORES];
static NEXT_CORE: AtomicUsize = AtomicUsize::new(0);
static FREE_CORES: Mutex<Vec<usize>> = Mutex::new(Vec::new());

struct CoreGuard(Cell<usize>);

impl Drop for CoreGuard {
    fn drop(&mut self) {
        let id = self.0.get();
        if id != usize::MAX {
            SLOTS[id].status.store(Status::Out as u8, Ordering::SeqCst);
            FREE_CORES.lock().push(id);
        }
    }
}

thread_local! {
    static CORE: CoreGuard = const { CoreGuard(Cell::new(usize::MAX)) };
}

/// The calling thread's stable core id, assigned on first use and recycled
/// when the thread exits. Core ids index the per-core region caches and the
/// status slots, so at most [`MAX_CORES`] threads may be live at once.
#[inline]
pub fn core_id() -> usize {
    CORE.with(|c| {
        let id = c.0.get();
        if id != usize::MAX {
            return id;
        }
        let id = FREE_CORES.lock().pop().unwrap_or_else(|| {
            let id = NEXT_CORE.fetch_add(1, Ordering::Relaxed);
            assert!(id < MAX_CORES, "worker context limit exceeded");
            id
        });
        c.0.set(id);
        id
    })
}

#[inline(always)]
pub fn self_status() -> Status {
    SLOTS[core_id()].status.load(Ordering::SeqCst).into()
}

#[inline(always)]
pub fn set_status(status: Status) {
    SLOTS[core_id()].status.store(status as u8, Ordering::SeqCst);
}

/// Adjust this worker's per-status count. Publication is sequentially
/// consistent so the collector can observe phase membership without
/// synchronising on worker execution.
#[inline(always)]
pub fn count_add(status: Status, delta: i32) {
    SLOTS[core_id()].counts[status as usize].fetch_add(delta, Ordering::SeqCst);
}

/// Number of workers currently observed in `status`, summed over all cores.
pub fn threads_in(status: Status) -> i32 {
    SLOTS
        .iter()
        .map(|slot| slot.counts[status as usize].load(Ordering::SeqCst))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_ids_are_stable_per_thread() {
        let a = core_id();
        let b = core_id();
        assert_eq!(a, b);
    }

    #[test]
    fn counts_sum_across_workers() {
        // Gc counts are untouched by the scope tests, so the sums here are
        // not racing any other test in the binary.
        let threads: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    count_add(Status::Gc, 1);
                    while threads_in(Status::Gc) < 4 {
                        std::thread::yield_now();
                    }
                    count_add(Status::Gc, -1);
                })
            })
            .collect();
        for t in threads {
            t.join().expect("worker join");
        }
        assert_eq!(threads_in(Status::Gc), 0);
    }

    #[test]
    fn status_round_trip() {
        set_status(Status::Gc);
        assert_eq!(self_status(), Status::Gc);
        set_status(Status::Out);
        assert_eq!(self_status(), Status::Out);
    }
}
