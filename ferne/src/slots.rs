use std::ptr::NonNull;

use object::PtrMeta;
use parking_lot::Mutex;

/// Arena of stable metadata-word slots.
///
/// Far pointers are freely movable values, so the 8-byte word an object's
/// back pointer targets cannot live inside them. Each pointer owns one slot
/// here instead; the slot address is what gets stamped into `back_ptr`, and
/// it stays valid until the pointer is dropped.
pub struct MetaSlab {
    slots: Box<[PtrMeta]>,
    free: Mutex<Vec<u32>>,
}

impl MetaSlab {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= u32::MAX as usize);
        let slots: Box<[PtrMeta]> = (0..capacity).map(|_| PtrMeta::new_null()).collect();
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free: Mutex::new(free),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.lock().len()
    }

    /// Hand out a nullified slot, or `None` when the arena is exhausted.
    pub fn alloc(&self) -> Option<NonNull<PtrMeta>> {
        let idx = self.free.lock().pop()? as usize;
        let slot = &self.slots[idx];
        slot.nullify();
        Some(NonNull::from(slot))
    }

    /// Return a slot to the freelist. The caller must no longer reference it.
    pub fn release(&self, slot: NonNull<PtrMeta>) {
        let base = self.slots.as_ptr() as usize;
        let addr = slot.as_ptr() as usize;
        debug_assert!(
            addr >= base && addr < base + self.slots.len() * size_of::<PtrMeta>(),
            "released slot does not belong to this arena"
        );
        debug_assert_eq!((addr - base) % size_of::<PtrMeta>(), 0);
        let idx = (addr - base) / size_of::<PtrMeta>();
        self.slots[idx].nullify();
        self.free.lock().push(idx as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_release_cycle() {
        let slab = MetaSlab::new(4);
        assert_eq!(slab.in_use(), 0);

        let a = slab.alloc().expect("slot");
        let b = slab.alloc().expect("slot");
        assert_ne!(a, b);
        assert_eq!(slab.in_use(), 2);

        // SAFETY: slots are live while the slab exists
        assert!(unsafe { a.as_ref() }.is_null());

        slab.release(a);
        slab.release(b);
        assert_eq!(slab.in_use(), 0);
    }

    #[test]
    fn exhaustion_returns_none() {
        let slab = MetaSlab::new(2);
        let a = slab.alloc().expect("slot");
        let _b = slab.alloc().expect("slot");
        assert!(slab.alloc().is_none());
        slab.release(a);
        assert!(slab.alloc().is_some());
    }

    #[test]
    fn released_slots_come_back_null() {
        let slab = MetaSlab::new(1);
        let slot = slab.alloc().expect("slot");
        slab.release(slot);
        let again = slab.alloc().expect("slot");
        // SAFETY: slot is live while the slab exists
        assert!(unsafe { again.as_ref() }.is_null());
    }
}
