use std::sync::atomic::{AtomicU64, Ordering, fence};

use bitflags::bitflags;

use crate::obj::{HEADER_SIZE, Object};

// Word layout, selected by the present-cleared bit:
//
//  present: |XXXXXXX !H(1b)| 0 S !D 0 0 0 0 0 |E(1b)| object data addr (47b) |
//  absent:  |   ds_id(8b)  | 1 S | object size (16b) |    object id (38b)    |
//
// The hot byte counts down: bit 7 set means "not hot yet", bits 0..6 hold the
// remaining accesses. Present, dirty, and hot all read inverted so that the
// dereference fast path is a single mask test against zero.

bitflags! {
    /// Flag-bit subset of the metadata word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MetaFlags: u64 {
        /// Set while the pointer has not yet crossed the hot threshold.
        const HOT_CLEARED = 1 << 7;
        /// Set when the object lives only remotely (absent form).
        const PRESENT_CLEARED = 1 << 8;
        /// Reserved: unique vs shared pointer (design-time distinction).
        const SHARED = 1 << 9;
        /// Set when the local copy matches the remote copy.
        const DIRTY_CLEARED = 1 << 10;
        /// Set by the collector when the object must leave its region.
        const EVACUATING = 1 << 16;
    }
}

pub const OBJ_DATA_ADDR_SHIFT: u32 = 17;
pub const OBJ_SIZE_SHIFT: u32 = 10;
pub const OBJ_ID_SHIFT: u32 = 26;
pub const OBJ_ID_BITS: u32 = 38;

/// Accesses before a pointer counts as hot.
pub const HOT_THRESHOLD: u8 = 2;

/// The null sentinel: everything above the low byte equals the
/// present-cleared bit alone.
pub const NULL_WORD: u64 = MetaFlags::PRESENT_CLEARED.bits();
pub const NULL_MASK: u64 = !0u64 << 8;

const OBJ_SIZE_MASK: u64 = 0xFFFF;
/// Byte 1 holds present-cleared, shared, and dirty-cleared.
const STATE_BYTE_MASK: u64 = 0xFF00;
/// Byte 0 of a fresh present word: not hot, countdown primed.
const HOT_RESET: u64 = MetaFlags::HOT_CLEARED.bits() | (HOT_THRESHOLD - 1) as u64;

/// Decoded view of a metadata word. Decoding is total: any 64-bit value
/// falls into exactly one of the three forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaView {
    Null,
    Present(PresentView),
    Absent(AbsentView),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentView {
    pub data_addr: usize,
    pub hot: bool,
    pub dirty: bool,
    pub evacuating: bool,
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsentView {
    pub ds_id: u8,
    pub object_size: u16,
    pub obj_id: u64,
    pub shared: bool,
}

/// Decode a raw word into its typed view.
#[inline]
pub fn decode_word(word: u64) -> MetaView {
    if word & NULL_MASK == NULL_WORD {
        MetaView::Null
    } else if word & MetaFlags::PRESENT_CLEARED.bits() != 0 {
        MetaView::Absent(AbsentView {
            ds_id: word as u8,
            object_size: ((word >> OBJ_SIZE_SHIFT) & OBJ_SIZE_MASK) as u16,
            obj_id: word >> OBJ_ID_SHIFT,
            shared: word & MetaFlags::SHARED.bits() != 0,
        })
    } else {
        MetaView::Present(PresentView {
            data_addr: (word >> OBJ_DATA_ADDR_SHIFT) as usize,
            hot: word & MetaFlags::HOT_CLEARED.bits() == 0,
            dirty: word & MetaFlags::DIRTY_CLEARED.bits() == 0,
            evacuating: word & MetaFlags::EVACUATING.bits() != 0,
            shared: word & MetaFlags::SHARED.bits() != 0,
        })
    }
}

/// The combined exception mask tested by the dereference fast path.
#[inline(always)]
pub const fn deref_exceptions(mut_access: bool) -> u64 {
    let mut mask = MetaFlags::HOT_CLEARED.bits()
        | MetaFlags::PRESENT_CLEARED.bits()
        | MetaFlags::EVACUATING.bits();
    if mut_access {
        mask |= MetaFlags::DIRTY_CLEARED.bits();
    }
    mask
}

/// An 8-byte atomic far-pointer metadata word.
///
/// All state transitions publish with release stores; the fast path reads a
/// single relaxed load and always observes one of the three legal forms.
/// Present/absent transitions are serialised by the caller through the
/// object id lock; only atomic flag updates (evacuation, hot countdown)
/// happen outside it.
#[repr(transparent)]
pub struct PtrMeta(AtomicU64);

const _: () = assert!(size_of::<PtrMeta>() == 8);

impl PtrMeta {
    pub const fn new_null() -> Self {
        Self(AtomicU64::new(NULL_WORD))
    }

    /// # Safety
    ///
    /// `addr` must point at a live, naturally aligned metadata word for the
    /// duration of the borrow. Used by the collector to follow an object's
    /// back pointer.
    #[inline(always)]
    pub unsafe fn from_addr<'a>(addr: usize) -> &'a PtrMeta {
        debug_assert_eq!(addr % size_of::<PtrMeta>(), 0);
        unsafe { &*(addr as *const PtrMeta) }
    }

    #[inline(always)]
    pub fn addr(&self) -> usize {
        self as *const PtrMeta as usize
    }

    #[inline(always)]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn decode(&self) -> MetaView {
        decode_word(self.load())
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.load() & NULL_MASK == NULL_WORD
    }

    #[inline(always)]
    pub fn is_present(&self) -> bool {
        self.load() & MetaFlags::PRESENT_CLEARED.bits() == 0
    }

    #[inline(always)]
    pub fn is_dirty(&self) -> bool {
        self.load() & MetaFlags::DIRTY_CLEARED.bits() == 0
    }

    #[inline(always)]
    pub fn is_hot(&self) -> bool {
        self.load() & MetaFlags::HOT_CLEARED.bits() == 0
    }

    #[inline(always)]
    pub fn is_evacuating(&self) -> bool {
        self.load() & MetaFlags::EVACUATING.bits() != 0
    }

    /// Data address of the referenced object. Present form only.
    #[inline(always)]
    pub fn object_data_addr(&self) -> usize {
        (self.load() >> OBJ_DATA_ADDR_SHIFT) as usize
    }

    /// The referenced object. Present form only.
    #[inline(always)]
    pub fn object(&self) -> Object {
        debug_assert!(self.is_present());
        Object::new(self.object_data_addr() - HEADER_SIZE)
    }

    pub fn nullify(&self) {
        self.0.store(NULL_WORD, Ordering::Release);
    }

    /// Publish a freshly initialized object: write the object's back pointer,
    /// fence, then install the present word (clean, hot countdown primed).
    ///
    /// # Safety
    ///
    /// `object_addr` must point at an initialized object header.
    pub unsafe fn set_present(&self, object_addr: usize) {
        let obj = Object::new(object_addr);
        unsafe { obj.set_back_ptr(self.addr()) };
        fence(Ordering::Release);
        let word = (((object_addr + HEADER_SIZE) as u64) << OBJ_DATA_ADDR_SHIFT)
            | MetaFlags::DIRTY_CLEARED.bits()
            | HOT_RESET;
        self.0.store(word, Ordering::Release);
    }

    /// Publish a newborn object: present and dirty.
    ///
    /// # Safety
    ///
    /// Same contract as [`PtrMeta::set_present`].
    pub unsafe fn init_present(&self, object_addr: usize) {
        unsafe { self.set_present(object_addr) };
        self.0
            .fetch_and(!MetaFlags::DIRTY_CLEARED.bits(), Ordering::Release);
    }

    /// Mutator migration: re-point at the copied object and drop the
    /// evacuation bit, keeping every other flag. Caller holds the id lock.
    pub fn mutator_copy(&self, new_object_addr: usize) {
        let keep = ((1u64 << OBJ_DATA_ADDR_SHIFT) - 1) & !MetaFlags::EVACUATING.bits();
        let word = (self.load() & keep)
            | (((new_object_addr + HEADER_SIZE) as u64) << OBJ_DATA_ADDR_SHIFT);
        self.0.store(word, Ordering::Release);
    }

    /// Collector relocation of a hot survivor: new address, hot countdown
    /// reset, evacuation dropped, state byte preserved. Caller holds the id
    /// lock.
    pub fn gc_copy(&self, new_object_addr: usize) {
        let old = self.load();
        debug_assert_eq!(old & MetaFlags::PRESENT_CLEARED.bits(), 0);
        let word = (((new_object_addr + HEADER_SIZE) as u64) << OBJ_DATA_ADDR_SHIFT)
            | HOT_RESET
            | (old & STATE_BYTE_MASK);
        self.0.store(word, Ordering::Release);
    }

    /// Collector write-back: swap to the absent form. Caller holds the id
    /// lock and has already pushed the payload to the device.
    pub fn gc_wb(&self, ds_id: u8, object_size: u16, obj_id: u64) {
        debug_assert!(obj_id < (1 << OBJ_ID_BITS));
        let word = (obj_id << OBJ_ID_SHIFT)
            | ((object_size as u64) << OBJ_SIZE_SHIFT)
            | MetaFlags::PRESENT_CLEARED.bits()
            | ds_id as u64;
        self.0.store(word, Ordering::Release);
    }

    /// Adopt another word wholesale, e.g. when moving object identity
    /// between pointer slots. Caller holds the id lock and fixes the
    /// object's back pointer afterwards.
    pub fn transfer_from(&self, other: &PtrMeta) {
        self.0.store(other.load(), Ordering::Release);
    }

    /// Raise the evacuation flag. Skips words that are not in the present
    /// form so a racing free or write-back cannot be corrupted into an
    /// illegal state. Returns whether the flag was set.
    pub fn set_evacuating(&self) -> bool {
        let mut cur = self.load();
        loop {
            if cur & MetaFlags::PRESENT_CLEARED.bits() != 0 {
                return false;
            }
            match self.0.compare_exchange_weak(
                cur,
                cur | MetaFlags::EVACUATING.bits(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(w) => cur = w,
            }
        }
    }

    /// Fast-path slow branch for mutable access: clear the state byte, which
    /// makes the word present and dirty in one atomic op.
    #[inline(always)]
    pub fn set_present_dirty(&self) {
        self.0.fetch_and(!STATE_BYTE_MASK, Ordering::Relaxed);
    }

    /// Fast-path slow branch: count one access off the hot countdown. Once
    /// the countdown borrows through bit 7 the pointer reads as hot and the
    /// fast path stops paying for the update.
    #[inline(always)]
    pub fn dec_hot(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Reset the hot countdown on a present word.
    pub fn clear_hot(&self) {
        let mut cur = self.load();
        loop {
            let next = (cur & !0xFF) | HOT_RESET;
            match self.0.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(w) => cur = w,
            }
        }
    }
}

impl std::fmt::Debug for PtrMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PtrMeta").field(&self.decode()).finish()
    }
}
