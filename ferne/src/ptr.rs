use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use object::{
    HEADER_SIZE, MetaView, OBJ_DATA_ADDR_SHIFT, Object, PtrMeta, deref_exceptions,
};

use crate::manager::{VANILLA_DS_ID, manager};
use crate::scope::DerefScope;

/// An untyped far pointer.
///
/// The pointer value itself is freely movable: the metadata word it owns
/// lives in the manager's slot arena, and the referenced object's back
/// pointer targets that slot, never this struct. Dropping a non-null
/// pointer frees the object and recycles the slot.
pub struct GenericFarPtr {
    slot: Option<NonNull<PtrMeta>>,
}

// SAFETY: all mutable state sits behind the atomic metadata word and the
// manager's id locks.
unsafe impl Send for GenericFarPtr {}
// SAFETY: see above; concurrent dereferences are arbitrated by the word's
// state machine.
unsafe impl Sync for GenericFarPtr {}

impl GenericFarPtr {
    pub const fn null() -> Self {
        Self { slot: None }
    }

    pub(crate) fn from_slot(slot: NonNull<PtrMeta>) -> Self {
        Self { slot: Some(slot) }
    }

    #[inline(always)]
    pub(crate) fn meta(&self) -> Option<&PtrMeta> {
        // SAFETY: the slot stays allocated until this pointer is dropped
        self.slot.map(|s| unsafe { s.as_ref() })
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        match self.meta() {
            Some(meta) => meta.is_null(),
            None => true,
        }
    }

    /// Decoded metadata snapshot, mainly for assertions and diagnostics.
    pub fn meta_view(&self) -> MetaView {
        match self.meta() {
            Some(meta) => meta.decode(),
            None => MetaView::Null,
        }
    }

    /// The dereference fast path: one word load, one combined exception
    /// test, one shift. The slow path swaps in, migrates, or pays the
    /// hot/dirty bookkeeping, then retries.
    #[inline(always)]
    fn deref_raw<const MUT: bool>(&self, nt: bool) -> *mut u8 {
        debug_assert!(DerefScope::is_active(), "dereference outside a scope");
        let Some(meta) = self.meta() else {
            return ptr::null_mut();
        };
        loop {
            let word = meta.load();
            if word & deref_exceptions(MUT) == 0 {
                return ((word >> OBJ_DATA_ADDR_SHIFT) as usize) as *mut u8;
            }
            match object::decode_word(word) {
                MetaView::Null => return ptr::null_mut(),
                MetaView::Absent(_) => manager().swap_in(nt, meta),
                MetaView::Present(view) if view.evacuating => {
                    if !self.mutator_migrate(meta) {
                        // The collector or a racing worker owns the move;
                        // give it room to finish.
                        std::thread::yield_now();
                    }
                }
                MetaView::Present(_) => {
                    if MUT {
                        meta.set_present_dirty();
                    }
                    meta.dec_hot();
                    return ((word >> OBJ_DATA_ADDR_SHIFT) as usize) as *mut u8;
                }
            }
        }
    }

    /// Immutable dereference. Returns the object's data address, or null for
    /// a null pointer. Valid for the remainder of the scope.
    #[inline(always)]
    pub fn deref(&self, _scope: &DerefScope) -> *const u8 {
        self.deref_raw::<false>(false)
    }

    /// Mutable dereference; also marks the object dirty.
    #[inline(always)]
    pub fn deref_mut(&self, _scope: &DerefScope) -> *mut u8 {
        self.deref_raw::<true>(false)
    }

    /// Like [`GenericFarPtr::deref`], but a swap-in lands the object in a
    /// scan-friendly (non-temporal) region.
    #[inline(always)]
    pub fn deref_nt(&self, _scope: &DerefScope) -> *const u8 {
        self.deref_raw::<false>(true)
    }

    #[inline(always)]
    pub fn deref_mut_nt(&self, _scope: &DerefScope) -> *mut u8 {
        self.deref_raw::<true>(true)
    }

    /// Cooperative migration of an object whose region is being evacuated.
    /// Returns false when another worker (or the collector) won the race or
    /// the non-blocking allocator came up empty.
    fn mutator_migrate(&self, meta: &PtrMeta) -> bool {
        let m = manager();
        let MetaView::Present(snapshot) = meta.decode() else {
            return false;
        };
        let obj = Object::new(snapshot.data_addr - HEADER_SIZE);
        // SAFETY: within this scope the object cannot be reclaimed under us;
        // the id bytes are immutable for the object's lifetime.
        let frag = unsafe { obj.obj_id_value() };

        let _g = m.locker().guard(frag);
        if !meta.is_present() || !meta.is_evacuating() {
            return false;
        }
        // Re-read under the lock: the pre-lock snapshot may be stale.
        let obj = meta.object();
        // SAFETY: present and locked, so the object is stable.
        let (size, nt) = unsafe { (obj.size(), heap::is_nt_addr(obj.addr())) };

        // The blocking allocator could deadlock against a collector that is
        // waiting on this very id lock.
        let Some(new_addr) = m.allocate_local_object_nb(nt, size) else {
            return false;
        };
        // SAFETY: source is a live object, destination a fresh allocation of
        // the same size.
        unsafe {
            ptr::copy_nonoverlapping(obj.addr() as *const u8, new_addr as *mut u8, size as usize);
            heap::adjust_ref_by_addr(new_addr, -1);
        }
        meta.mutator_copy(new_addr);
        true
    }

    /// Free the object and null the pointer. Enters a scope when the caller
    /// is not already in one; the object is pinned locally first so its
    /// header can be stamped.
    pub fn free(&mut self) {
        let Some(meta) = self.meta() else { return };
        if meta.is_null() {
            return;
        }
        let _scope = (!DerefScope::is_active()).then(DerefScope::new);
        let data = self.deref_raw::<false>(false);
        if data.is_null() {
            return;
        }
        let obj = meta.object();
        // SAFETY: derefed within the current scope, so the object is pinned.
        let (frag, ds_id) = unsafe { (obj.obj_id_value(), obj.ds_id()) };
        let m = manager();
        {
            let _g = m.locker().guard(frag);
            // SAFETY: pinned, and identity transitions are ours under the lock.
            unsafe { obj.mark_freed() };
            meta.nullify();
        }
        if ds_id == VANILLA_DS_ID {
            m.release_remote_object(frag);
        }
    }

    /// Forget the referenced object without freeing it. The caller has moved
    /// ownership elsewhere (see [`GenericFarPtr::adopt`]).
    pub fn release(&mut self) {
        if let Some(meta) = self.meta() {
            meta.nullify();
        }
    }

    /// Take over `other`'s object identity: copy its word into this
    /// pointer's slot, re-point the object's back pointer here, and null
    /// `other`. Serialised under the object's id lock.
    pub fn adopt(&mut self, other: &mut GenericFarPtr) {
        assert!(self.is_null(), "adopt requires a null destination");
        let Some(other_meta) = other.meta() else {
            return;
        };
        if other_meta.is_null() {
            return;
        }
        let m = manager();
        if self.slot.is_none() {
            self.slot = Some(m.slots().alloc().expect("far-pointer slot arena exhausted"));
        }
        let self_meta = self.meta().expect("slot allocated above");

        loop {
            let (frag, was_present) = match other_meta.decode() {
                MetaView::Present(view) => {
                    let obj = Object::new(view.data_addr - HEADER_SIZE);
                    // SAFETY: id bytes are immutable while the object lives
                    (unsafe { obj.obj_id_value() }, true)
                }
                MetaView::Absent(view) => (view.obj_id, false),
                MetaView::Null => return,
            };
            let _g = m.locker().guard(frag);
            if other_meta.is_present() != was_present {
                continue;
            }
            self_meta.transfer_from(other_meta);
            if was_present {
                // SAFETY: present and locked, so the object is stable.
                unsafe { self_meta.object().set_back_ptr(self_meta.addr()) };
            }
            other_meta.nullify();
            return;
        }
    }
}

impl Drop for GenericFarPtr {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if !unsafe { slot.as_ref() }.is_null() {
                self.slot = Some(slot);
                self.free();
                self.slot = None;
            }
            manager().slots().release(slot);
        }
    }
}

impl std::fmt::Debug for GenericFarPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GenericFarPtr").field(&self.meta_view()).finish()
    }
}

/// A far pointer to a plain-data `T`.
///
/// Object payloads are byte-addressed with no alignment guarantee, so typed
/// access goes through unaligned reads and writes; `deref`/`deref_mut`
/// expose the raw location for callers that manage alignment themselves.
pub struct FarPtr<T> {
    raw: GenericFarPtr,
    _marker: PhantomData<T>,
}

impl<T: Copy> FarPtr<T> {
    pub const fn null() -> Self {
        Self {
            raw: GenericFarPtr::null(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_generic(raw: GenericFarPtr) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    pub fn as_generic(&self) -> &GenericFarPtr {
        &self.raw
    }

    #[inline(always)]
    pub fn deref(&self, scope: &DerefScope) -> *const T {
        self.raw.deref(scope) as *const T
    }

    #[inline(always)]
    pub fn deref_mut(&self, scope: &DerefScope) -> *mut T {
        self.raw.deref_mut(scope) as *mut T
    }

    /// Copy the value out, entering a scope if the caller is not in one.
    pub fn read(&self) -> T {
        let _scope = (!DerefScope::is_active()).then(DerefScope::new);
        let p = self.raw.deref_raw::<false>(false);
        assert!(!p.is_null(), "read through a null far pointer");
        // SAFETY: the scope pins the object; payloads have no alignment
        // guarantee, hence the unaligned read.
        unsafe { ptr::read_unaligned(p as *const T) }
    }

    /// Overwrite the value, entering a scope if the caller is not in one.
    pub fn write(&self, value: T) {
        let _scope = (!DerefScope::is_active()).then(DerefScope::new);
        let p = self.raw.deref_raw::<true>(false);
        assert!(!p.is_null(), "write through a null far pointer");
        // SAFETY: as in read; deref_mut marked the object dirty.
        unsafe { ptr::write_unaligned(p as *mut T, value) };
    }

    pub fn free(&mut self) {
        self.raw.free();
    }
}

impl<T> std::fmt::Debug for FarPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FarPtr").field(&self.raw.meta_view()).finish()
    }
}
