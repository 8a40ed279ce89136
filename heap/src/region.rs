use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::system::Mapping;

pub const REGION_SHIFT: u32 = 20;
/// Regions are 1 MiB, power of two, and the backing slabs are aligned to
/// their size so a region base can be recovered from any object address by
/// masking.
pub const REGION_SIZE: usize = 1 << REGION_SHIFT;

/// In-slab header: |ref_cnt(4B)|nt(1B)|objects...|
pub const REF_CNT_POS: usize = 0;
pub const NT_POS: usize = 4;
pub const OBJECT_POS: usize = 5;

/// How many scan sub-ranges a region records for the parallel marker.
pub const GC_PARALLELISM: usize = 2;

/// Upper bound on worker contexts with core-local region slots.
pub const MAX_CORES: usize = 64;

const INVALID_IDX: u32 = u32::MAX;

/// Bump the refcount of whichever local region contains `object_addr`.
/// Sequentially consistent, like every refcount update.
///
/// # Safety
///
/// `object_addr` must lie inside a live local region slab.
#[inline(always)]
pub unsafe fn adjust_ref_by_addr(object_addr: usize, delta: i32) {
    let base = object_addr & !(REGION_SIZE - 1);
    let cnt = (base + REF_CNT_POS) as *const AtomicI32;
    // SAFETY: the slab base is REGION_SIZE-aligned and starts with the count
    unsafe { (*cnt).fetch_add(delta, Ordering::SeqCst) };
}

/// Whether the local region containing `object_addr` carries the
/// non-temporal allocation hint.
///
/// # Safety
///
/// `object_addr` must lie inside a live local region slab.
#[inline(always)]
pub unsafe fn is_nt_addr(object_addr: usize) -> bool {
    let base = object_addr & !(REGION_SIZE - 1);
    // SAFETY: slab header is mapped for the region's lifetime
    unsafe { (*((base + NT_POS) as *const AtomicU8)).load(Ordering::Relaxed) != 0 }
}

/// A fixed-size slab objects are bump-allocated from.
///
/// Local regions own a 1 MiB-aligned buffer whose first five bytes hold the
/// refcount and the nt flag. Far regions have no bytes at all: their
/// "addresses" are `idx << REGION_SHIFT | offset` and their refcount lives in
/// a side table owned by the far pool's manager.
///
/// The refcount counts in-flight operations pinning the region (an
/// allocation that has not been published yet, a migration copy in
/// progress); a region may only be recycled when it reaches zero.
#[derive(Debug)]
pub struct Region {
    idx: u32,
    first_free: u32,
    num_boundaries: u8,
    boundaries: [u32; GC_PARALLELISM],
    buf: Option<NonNull<u8>>,
    ref_cnt: Option<NonNull<AtomicI32>>,
}

// SAFETY: the raw pointers target slab/side-table memory owned by the pool
// manager, which outlives every region handle.
unsafe impl Send for Region {}

impl Region {
    pub const fn invalid() -> Self {
        Self {
            idx: INVALID_IDX,
            first_free: OBJECT_POS as u32,
            num_boundaries: 0,
            boundaries: [0; GC_PARALLELISM],
            buf: None,
            ref_cnt: None,
        }
    }

    /// # Safety
    ///
    /// `buf` must point at a REGION_SIZE-aligned, writable slab of
    /// REGION_SIZE bytes that outlives the region handle.
    pub unsafe fn new_local(idx: u32, buf: NonNull<u8>) -> Self {
        debug_assert_eq!(buf.as_ptr() as usize % REGION_SIZE, 0);
        let cnt = buf.as_ptr() as *mut AtomicI32;
        // SAFETY: slab header bytes are writable per the contract
        unsafe {
            (*cnt).store(0, Ordering::SeqCst);
            *(buf.as_ptr().add(NT_POS)) = 0;
        }
        Self {
            idx,
            first_free: OBJECT_POS as u32,
            num_boundaries: 0,
            boundaries: [0; GC_PARALLELISM],
            buf: Some(buf),
            ref_cnt: NonNull::new(cnt),
        }
    }

    /// # Safety
    ///
    /// `ref_cnt` must outlive the region handle.
    pub unsafe fn new_far(idx: u32, ref_cnt: NonNull<AtomicI32>) -> Self {
        Self {
            idx,
            first_free: OBJECT_POS as u32,
            num_boundaries: 0,
            boundaries: [0; GC_PARALLELISM],
            buf: None,
            ref_cnt: Some(ref_cnt),
        }
    }

    #[inline(always)]
    pub fn is_invalid(&self) -> bool {
        self.idx == INVALID_IDX
    }

    #[inline(always)]
    pub fn is_local(&self) -> bool {
        self.buf.is_some()
    }

    #[inline(always)]
    pub fn base_addr(&self) -> usize {
        match self.buf {
            Some(b) => b.as_ptr() as usize,
            None => (self.idx as usize) << REGION_SHIFT,
        }
    }

    /// Bump-allocate `object_size` bytes. Increments the refcount with the
    /// allocation: the caller drops its pin once the object is published.
    pub fn allocate_object(&mut self, object_size: u16) -> Option<usize> {
        if self.is_invalid() {
            return None;
        }
        let end = self.first_free + object_size as u32;
        if end > REGION_SIZE as u32 {
            return None;
        }
        let off = self.first_free;
        self.first_free = end;
        self.inc_ref(1);
        self.update_boundaries(false);
        Some(self.base_addr() + off as usize)
    }

    fn update_boundaries(&mut self, force: bool) {
        let n = self.num_boundaries as usize;
        if n >= GC_PARALLELISM {
            return;
        }
        let crossed =
            self.first_free as usize > REGION_SIZE / GC_PARALLELISM * (n + 1);
        if force || crossed {
            let last = if n == 0 {
                OBJECT_POS as u32
            } else {
                self.boundaries[n - 1]
            };
            if self.first_free > last {
                self.boundaries[n] = self.first_free;
                self.num_boundaries += 1;
            }
        }
    }

    /// Close the final scan sub-range. Called when the region is retired to
    /// the used pool.
    pub fn seal(&mut self) {
        self.update_boundaries(true);
    }

    #[inline(always)]
    pub fn num_boundaries(&self) -> u8 {
        self.num_boundaries
    }

    /// Absolute `(lo, hi)` address interval of scan sub-range `idx`.
    pub fn boundary(&self, idx: u8) -> (usize, usize) {
        assert!(idx < self.num_boundaries);
        let lo = if idx == 0 {
            OBJECT_POS as u32
        } else {
            self.boundaries[idx as usize - 1]
        };
        let hi = self.boundaries[idx as usize];
        let base = self.base_addr();
        (base + lo as usize, base + hi as usize)
    }

    #[inline(always)]
    pub fn ref_cnt(&self) -> i32 {
        match self.ref_cnt {
            // SAFETY: the count location outlives the handle
            Some(p) => unsafe { p.as_ref() }.load(Ordering::SeqCst),
            None => 0,
        }
    }

    #[inline(always)]
    pub fn inc_ref(&self, delta: i32) {
        if let Some(p) = self.ref_cnt {
            // SAFETY: the count location outlives the handle
            unsafe { p.as_ref() }.fetch_add(delta, Ordering::SeqCst);
        }
    }

    /// Only the collector clears the count, after every live object has been
    /// evacuated.
    pub fn clear_ref_cnt(&self) {
        if let Some(p) = self.ref_cnt {
            // SAFETY: the count location outlives the handle
            unsafe { p.as_ref() }.store(0, Ordering::SeqCst);
        }
    }

    #[inline(always)]
    pub fn is_gcable(&self) -> bool {
        self.ref_cnt() == 0
    }

    pub fn is_nt(&self) -> bool {
        match self.buf {
            // SAFETY: slab header is mapped for the region's lifetime
            Some(b) => unsafe {
                (*(b.as_ptr().add(NT_POS) as *const AtomicU8)).load(Ordering::Relaxed) != 0
            },
            None => false,
        }
    }

    pub fn set_nt(&self) {
        if let Some(b) = self.buf {
            // SAFETY: slab header is mapped for the region's lifetime
            unsafe {
                (*(b.as_ptr().add(NT_POS) as *const AtomicU8)).store(1, Ordering::Relaxed);
            }
        }
    }

    pub fn clear_nt(&self) {
        if let Some(b) = self.buf {
            // SAFETY: slab header is mapped for the region's lifetime
            unsafe {
                (*(b.as_ptr().add(NT_POS) as *const AtomicU8)).store(0, Ordering::Relaxed);
            }
        }
    }

    /// Rewind the bump cursor and drop the boundaries and nt flag. The
    /// refcount is cleared separately.
    pub fn reset(&mut self) {
        self.first_free = OBJECT_POS as u32;
        self.num_boundaries = 0;
        self.boundaries = [0; GC_PARALLELISM];
        self.clear_nt();
    }
}

#[repr(align(64))]
struct CoreSlots {
    normal: UnsafeCell<Region>,
    nt: UnsafeCell<Region>,
}

// SAFETY: a core's slot pair is only ever touched by the worker that owns
// that core id; cross-core traffic goes through the locked pools.
unsafe impl Send for CoreSlots {}
// SAFETY: see above.
unsafe impl Sync for CoreSlots {}

/// One pool of regions: a free FIFO, used FIFOs (normal and nt), and two
/// cached free regions per core. Core refills are a pop under the pool spin;
/// everything else on the allocation fast path is core-local.
pub struct RegionManager {
    mapping: Option<Mapping>,
    far_refs: Option<Box<[AtomicI32]>>,
    free: Mutex<VecDeque<Region>>,
    used: Mutex<VecDeque<Region>>,
    nt_used: Mutex<VecDeque<Region>>,
    core_slots: Box<[CoreSlots]>,
    num_regions: u32,
}

impl RegionManager {
    /// `size` is rounded down to whole regions. Local pools map and carve
    /// their backing slab; far pools only build the refcount side table.
    pub fn new(size: usize, is_local: bool) -> Self {
        let num_regions = (size / REGION_SIZE) as u32;
        assert!(num_regions > 0, "pool smaller than one region");

        let mut free = VecDeque::with_capacity(num_regions as usize);
        let (mapping, far_refs) = if is_local {
            let mapping = Mapping::new(num_regions as usize * REGION_SIZE, REGION_SIZE)
                .expect("map region pool backing");
            let base = mapping.base().as_ptr();
            for i in 0..num_regions {
                // SAFETY: each slab is a disjoint REGION_SIZE-aligned slice
                // of the mapping, which lives in self.
                let buf = unsafe {
                    NonNull::new_unchecked(base.add(i as usize * REGION_SIZE))
                };
                free.push_back(unsafe { Region::new_local(i, buf) });
            }
            (Some(mapping), None)
        } else {
            let refs: Box<[AtomicI32]> =
                (0..num_regions).map(|_| AtomicI32::new(0)).collect();
            for i in 0..num_regions {
                // SAFETY: the side table is heap-allocated and lives in self.
                let cnt = NonNull::from(&refs[i as usize]);
                free.push_back(unsafe { Region::new_far(i, cnt) });
            }
            (None, Some(refs))
        };

        let core_slots: Box<[CoreSlots]> = (0..MAX_CORES)
            .map(|_| CoreSlots {
                normal: UnsafeCell::new(Region::invalid()),
                nt: UnsafeCell::new(Region::invalid()),
            })
            .collect();

        debug!(num_regions, is_local, "region pool ready");
        Self {
            mapping,
            far_refs,
            free: Mutex::new(free),
            used: Mutex::new(VecDeque::new()),
            nt_used: Mutex::new(VecDeque::new()),
            core_slots,
            num_regions,
        }
    }

    pub fn is_local(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn num_regions(&self) -> u32 {
        self.num_regions
    }

    pub fn num_free_regions(&self) -> usize {
        self.free.lock().len()
    }

    pub fn free_region_ratio(&self) -> f64 {
        self.num_free_regions() as f64 / self.num_regions as f64
    }

    /// The cached free region for `core`.
    ///
    /// # Safety
    ///
    /// Only the worker owning `core` may call this, and the returned borrow
    /// must not outlive that exclusivity.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn core_local_region(&self, core: usize, nt: bool) -> &mut Region {
        let slots = &self.core_slots[core];
        let cell = if nt { &slots.nt } else { &slots.normal };
        // SAFETY: exclusivity guaranteed by the caller per the contract
        unsafe { &mut *cell.get() }
    }

    /// Swap a fresh free region into the core slot, retiring the full one to
    /// the used pool. Returns false when the free pool is empty.
    ///
    /// # Safety
    ///
    /// Same contract as [`RegionManager::core_local_region`].
    pub unsafe fn try_refill_core_local_free_region(&self, core: usize, nt: bool) -> bool {
        let Some(fresh) = self.free.lock().pop_front() else {
            return false;
        };
        if nt {
            fresh.set_nt();
        }
        // SAFETY: forwarded caller contract
        let slot = unsafe { self.core_local_region(core, nt) };
        let old = std::mem::replace(slot, fresh);
        self.retire(old);
        true
    }

    fn retire(&self, mut region: Region) {
        if region.is_invalid() {
            return;
        }
        region.seal();
        if region.is_nt() {
            self.nt_used.lock().push_back(region);
        } else {
            self.used.lock().push_back(region);
        }
    }

    /// Reset and return a region to the free pool.
    pub fn push_free_region(&self, mut region: Region) {
        debug_assert!(region.is_gcable());
        region.reset();
        self.free.lock().push_back(region);
    }

    /// Pop the oldest used region, preferring the normal pool over nt.
    pub fn pop_used_region(&self) -> Option<Region> {
        if let Some(r) = self.used.lock().pop_front() {
            return Some(r);
        }
        self.nt_used.lock().pop_front()
    }

    /// Return a used region that turned out not to be collectable yet.
    pub fn push_used_region(&self, region: Region) {
        if region.is_nt() {
            self.nt_used.lock().push_back(region);
        } else {
            self.used.lock().push_back(region);
        }
    }

    /// Live-object count bookkeeping for far pools, keyed by address.
    pub fn adjust_far_ref(&self, addr: usize, delta: i32) {
        let refs = self
            .far_refs
            .as_ref()
            .expect("far refcounts only exist on far pools");
        let idx = addr >> REGION_SHIFT;
        refs[idx].fetch_add(delta, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_pool(regions: usize) -> RegionManager {
        RegionManager::new(regions * REGION_SIZE, true)
    }

    #[test]
    fn bump_allocation_and_refcount() {
        let pool = local_pool(2);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
            let region = pool.core_local_region(0, false);

            let a = region.allocate_object(100).expect("first allocation");
            let b = region.allocate_object(100).expect("second allocation");
            assert_eq!(b, a + 100);
            assert_eq!(a % REGION_SIZE, OBJECT_POS);
            assert_eq!(region.ref_cnt(), 2);

            adjust_ref_by_addr(a, -1);
            adjust_ref_by_addr(b, -1);
            assert!(region.is_gcable());
        }
    }

    #[test]
    fn allocation_fails_when_full() {
        let pool = local_pool(2);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
            let region = pool.core_local_region(0, false);
            let chunk = u16::MAX;
            while region.allocate_object(chunk).is_some() {}
            let remaining = REGION_SIZE as u32 - region.first_free;
            assert!(remaining < chunk as u32);
        }
    }

    #[test]
    fn boundaries_split_the_scan() {
        let pool = local_pool(2);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
            let region = pool.core_local_region(0, false);

            // Fill past the halfway point, then seal.
            let n = REGION_SIZE / 2 / 1000 + 2;
            for _ in 0..n {
                region.allocate_object(1000).expect("allocation");
            }
            region.seal();

            assert_eq!(region.num_boundaries(), 2);
            let (lo0, hi0) = region.boundary(0);
            let (lo1, hi1) = region.boundary(1);
            assert_eq!(lo0 % REGION_SIZE, OBJECT_POS);
            assert_eq!(hi0, lo1);
            assert_eq!(hi1 - lo0, n * 1000);
        }
    }

    #[test]
    fn seal_on_sparse_region_records_one_boundary() {
        let pool = local_pool(2);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
            let region = pool.core_local_region(0, false);
            region.allocate_object(64).expect("allocation");
            region.seal();
            assert_eq!(region.num_boundaries(), 1);
            let (lo, hi) = region.boundary(0);
            assert_eq!(hi - lo, 64);
        }
    }

    #[test]
    fn refill_retires_full_region_to_used() {
        let pool = local_pool(3);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
            pool.core_local_region(0, false)
                .allocate_object(64)
                .expect("allocation");
            adjust_ref_by_addr(pool.core_local_region(0, false).base_addr() + OBJECT_POS, -1);

            assert!(pool.try_refill_core_local_free_region(0, false));
        }
        let used = pool.pop_used_region().expect("retired region");
        assert_eq!(used.num_boundaries(), 1);
        assert!(used.is_gcable());
        assert!(pool.pop_used_region().is_none());
    }

    #[test]
    fn nt_flag_round_trip() {
        let pool = local_pool(2);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, true));
            let region = pool.core_local_region(0, true);
            assert!(region.is_nt());
            let addr = region.allocate_object(64).expect("allocation");
            assert!(is_nt_addr(addr));
            region.clear_nt();
            assert!(!is_nt_addr(addr));
        }
    }

    #[test]
    fn far_pool_addresses_and_refs() {
        let pool = RegionManager::new(4 * REGION_SIZE, false);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
            let region = pool.core_local_region(0, false);
            assert!(!region.is_local());

            let a = region.allocate_object(128).expect("far allocation");
            assert_eq!(a >> REGION_SHIFT, 0);
            assert_eq!(a & (REGION_SIZE - 1), OBJECT_POS);
            assert_eq!(region.ref_cnt(), 1);

            pool.adjust_far_ref(a, -1);
            assert!(region.is_gcable());
        }
    }

    #[test]
    fn free_ratio_tracks_pool_movement() {
        let pool = local_pool(4);
        assert_eq!(pool.free_region_ratio(), 1.0);
        // SAFETY: single-threaded test owns core 0
        unsafe {
            assert!(pool.try_refill_core_local_free_region(0, false));
        }
        assert_eq!(pool.free_region_ratio(), 0.75);
    }
}
