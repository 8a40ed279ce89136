use std::collections::HashSet;

use parking_lot::Mutex;

const SHARD_BITS: u32 = 10;
pub const LOCKER_SHARDS: usize = 1 << SHARD_BITS;

/// Keyed lock table serialising per-object operations.
///
/// Locks are identified by the first 8 bytes of the object id (shorter ids
/// zero-extended), so two distinct long ids sharing a prefix may falsely
/// contend; that only costs throughput, never correctness. Shard critical
/// sections are a short spin; waiters retry with a yield instead of parking
/// on a condvar.
pub struct ObjLocker {
    shards: Box<[Mutex<HashSet<u64>>]>,
}

impl ObjLocker {
    pub fn new() -> Self {
        Self {
            shards: (0..LOCKER_SHARDS)
                .map(|_| Mutex::new(HashSet::new()))
                .collect(),
        }
    }

    #[inline(always)]
    fn shard(&self, id: u64) -> &Mutex<HashSet<u64>> {
        let hash = id.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> (64 - SHARD_BITS);
        &self.shards[hash as usize]
    }

    /// Returns true when the id was newly inserted, false when contended.
    pub fn try_insert(&self, id: u64) -> bool {
        self.shard(id).lock().insert(id)
    }

    pub fn remove(&self, id: u64) {
        let removed = self.shard(id).lock().remove(&id);
        debug_assert!(removed, "unlock of an id that was not held");
    }

    /// Spin-yield until the id is held, returning an RAII guard.
    pub fn guard(&self, id: u64) -> ObjLockGuard<'_> {
        while !self.try_insert(id) {
            std::thread::yield_now();
        }
        ObjLockGuard { locker: self, id }
    }
}

impl Default for ObjLocker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ObjLockGuard<'a> {
    locker: &'a ObjLocker,
    id: u64,
}

impl Drop for ObjLockGuard<'_> {
    fn drop(&mut self) {
        self.locker.remove(self.id);
    }
}
