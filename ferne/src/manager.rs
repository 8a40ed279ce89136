use std::collections::VecDeque;
use std::ptr;
use std::slice;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use heap::{Parallelizer, Region, RegionManager};
use object::{
    HEADER_SIZE, MAX_OBJECT_DATA_SIZE, MetaView, OBJ_ID_BITS, Object, PtrMeta,
    id_fragment,
};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use crate::config::FarMemConfig;
use crate::device::FarMemDevice;
use crate::locker::ObjLocker;
use crate::ptr::{FarPtr, GenericFarPtr};
use crate::scope;
use crate::slots::MetaSlab;
use crate::worker::{self, Status};

/// The data-structure id vanilla far pointers live under; their object id is
/// the 8-byte remote address.
pub const VANILLA_DS_ID: u8 = 0;

const FREE_CACHE_ALMOST_EMPTY_THRESH: f64 = 0.03;
const FREE_CACHE_LOW_THRESH: f64 = 0.12;
const FREE_CACHE_HIGH_THRESH: f64 = 0.22;

const GC_TASK_QUEUE_DEPTH: u32 = 8;
const MAX_REGIONS_PER_GC_ROUND: usize = 128;
const MAX_RATIO_REGIONS_PER_GC_ROUND: f64 = 0.1;
const MIN_RATIO_REGIONS_PER_GC_ROUND: f64 = 0.03;

/// Throttled waits re-check their condition on this period so a missed
/// notification cannot wedge a mutator.
const WAIT_RECHECK: Duration = Duration::from_millis(10);

pub type Notifier = Box<dyn Fn(Object) + Send + Sync>;

/// A collection work unit: one region scan sub-range.
#[derive(Debug, Clone, Copy)]
struct ScanRange {
    lo: usize,
    hi: usize,
}

static MANAGER: OnceLock<FarMemManager> = OnceLock::new();

/// The process-wide manager. Far pointers reach it through this accessor so
/// they stay plain 8-byte values.
#[inline(always)]
pub fn manager() -> &'static FarMemManager {
    MANAGER.get().expect("far-memory manager is not built")
}

pub struct FarMemManager {
    cache: RegionManager,
    far: RegionManager,
    device: Box<dyn FarMemDevice>,
    locker: ObjLocker,
    slots: MetaSlab,
    notifiers: Box<[RwLock<Option<Notifier>>]>,
    ds_ids: Mutex<VecDeque<u8>>,

    cache_wait: Mutex<()>,
    cache_condvar: Condvar,
    far_wait: Mutex<()>,
    far_condvar: Condvar,

    gc_lock: Mutex<()>,
    gc_spawned: AtomicBool,
    pending_gcs: AtomicU32,
    gc_parallel: Parallelizer<ScanRange>,
}

impl FarMemManager {
    /// Build and install the process-wide manager. Panics when called twice.
    pub fn build(
        config: FarMemConfig,
        device: Box<dyn FarMemDevice>,
    ) -> &'static FarMemManager {
        config.validate().expect("invalid far-memory configuration");
        let manager = Self::new(&config, device);
        if MANAGER.set(manager).is_err() {
            panic!("far-memory manager already built");
        }
        info!(
            cache_regions = config.cache_size / heap::REGION_SIZE,
            far_regions = config.far_mem_size / heap::REGION_SIZE,
            gc_threads = config.num_gc_threads,
            "far-memory manager ready"
        );
        MANAGER.get().expect("installed above")
    }

    fn new(config: &FarMemConfig, device: Box<dyn FarMemDevice>) -> Self {
        let notifiers = (0..u8::MAX as usize + 1)
            .map(|_| RwLock::new(None))
            .collect();
        Self {
            cache: RegionManager::new(config.cache_size, true),
            far: RegionManager::new(config.far_mem_size, false),
            device,
            locker: ObjLocker::new(),
            slots: MetaSlab::new(config.max_far_ptrs),
            notifiers,
            ds_ids: Mutex::new((1..=u8::MAX).collect()),
            cache_wait: Mutex::new(()),
            cache_condvar: Condvar::new(),
            far_wait: Mutex::new(()),
            far_condvar: Condvar::new(),
            gc_lock: Mutex::new(()),
            gc_spawned: AtomicBool::new(false),
            pending_gcs: AtomicU32::new(0),
            gc_parallel: Parallelizer::new(config.num_gc_threads, GC_TASK_QUEUE_DEPTH),
        }
    }

    pub(crate) fn locker(&self) -> &ObjLocker {
        &self.locker
    }

    pub(crate) fn slots(&self) -> &MetaSlab {
        &self.slots
    }

    pub fn device(&self) -> &dyn FarMemDevice {
        &*self.device
    }

    // ── Free-ratio thresholds ─────────────────────────────────────────

    pub fn free_cache_ratio(&self) -> f64 {
        self.cache.free_region_ratio()
    }

    fn is_free_cache_low(&self) -> bool {
        self.free_cache_ratio() <= FREE_CACHE_LOW_THRESH
    }

    fn is_free_cache_high(&self) -> bool {
        self.free_cache_ratio() >= FREE_CACHE_HIGH_THRESH
    }

    fn is_free_cache_almost_empty(&self) -> bool {
        self.free_cache_ratio() <= FREE_CACHE_ALMOST_EMPTY_THRESH
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Bump-allocate `object_size` local bytes, yielding to the collector
    /// until a region is available. The returned region pin (refcount +1)
    /// is the caller's to drop after publication.
    pub(crate) fn allocate_local_object(&self, nt: bool, object_size: u16) -> usize {
        let core = worker::core_id();
        loop {
            // SAFETY: the core id belongs to this thread
            let region = unsafe { self.cache.core_local_region(core, nt) };
            if let Some(addr) = region.allocate_object(object_size) {
                return addr;
            }
            // SAFETY: as above
            if unsafe { self.cache.try_refill_core_local_free_region(core, nt) } {
                continue;
            }
            self.gc_check();
            thread::yield_now();
        }
    }

    /// Non-blocking variant; used where blocking could deadlock against a
    /// collector holding the same id lock.
    pub(crate) fn allocate_local_object_nb(&self, nt: bool, object_size: u16) -> Option<usize> {
        let core = worker::core_id();
        // SAFETY: the core id belongs to this thread
        let region = unsafe { self.cache.core_local_region(core, nt) };
        if let Some(addr) = region.allocate_object(object_size) {
            return Some(addr);
        }
        // SAFETY: as above
        if unsafe { self.cache.try_refill_core_local_free_region(core, nt) } {
            // SAFETY: as above
            let region = unsafe { self.cache.core_local_region(core, nt) };
            if let Some(addr) = region.allocate_object(object_size) {
                return Some(addr);
            }
        }
        self.gc_check();
        None
    }

    /// Reserve `object_size` bytes of remote address space. The returned
    /// address doubles as the object id; the far region's live-object count
    /// was bumped and stays up until the object is freed.
    pub(crate) fn allocate_remote_object(&self, nt: bool, object_size: u16) -> usize {
        let core = worker::core_id();
        loop {
            // SAFETY: the core id belongs to this thread
            let region = unsafe { self.far.core_local_region(core, nt) };
            if let Some(addr) = region.allocate_object(object_size) {
                return addr;
            }
            // SAFETY: as above
            if unsafe { self.far.try_refill_core_local_free_region(core, nt) } {
                continue;
            }
            self.mutator_wait_for_gc_far_mem();
        }
    }

    fn allocate_remote_object_nb(&self, nt: bool, object_size: u16) -> Option<usize> {
        let core = worker::core_id();
        // SAFETY: the core id belongs to this thread
        let region = unsafe { self.far.core_local_region(core, nt) };
        if let Some(addr) = region.allocate_object(object_size) {
            return Some(addr);
        }
        // SAFETY: as above
        if unsafe { self.far.try_refill_core_local_free_region(core, nt) } {
            // SAFETY: as above
            return unsafe { self.far.core_local_region(core, nt) }.allocate_object(object_size);
        }
        None
    }

    /// Drop the live-object count a vanilla object held on its far region.
    pub(crate) fn release_remote_object(&self, remote_addr: u64) {
        self.far.adjust_far_ref(remote_addr as usize, -1);
    }

    fn checked_object_size(item_size: u16, id_len: usize) -> u16 {
        assert!(
            id_len <= 8,
            "object ids longer than 8 bytes cannot be swapped out"
        );
        assert!(
            item_size <= MAX_OBJECT_DATA_SIZE,
            "object payload exceeds the size limit"
        );
        HEADER_SIZE as u16 + item_size + id_len as u16
    }

    fn publish_ptr(&self, ds_id: u8, item_size: u16, id: &[u8], local_addr: usize) -> GenericFarPtr {
        let obj = Object::new(local_addr);
        // SAFETY: local_addr spans header + payload + id, freshly allocated
        unsafe { obj.init(ds_id, item_size, id) };
        let slot = self
            .slots
            .alloc()
            .expect("far-pointer slot arena exhausted");
        // SAFETY: the object header was initialized above
        unsafe { slot.as_ref().init_present(local_addr) };
        // SAFETY: local_addr came from the cache pool
        unsafe { heap::adjust_ref_by_addr(local_addr, -1) };
        GenericFarPtr::from_slot(slot)
    }

    /// Allocate a present-and-dirty far pointer. With no id, the object is a
    /// vanilla one: remote space is reserved and its address becomes the id.
    /// Container-supplied ids must fit the absent form's 38-bit id field.
    pub fn allocate_generic_far_ptr(
        &self,
        ds_id: u8,
        item_size: u16,
        id: Option<&[u8]>,
    ) -> GenericFarPtr {
        match id {
            Some(id) => {
                assert!(
                    id_fragment(id) < (1 << OBJ_ID_BITS),
                    "object id exceeds the 38-bit id space"
                );
                let total = Self::checked_object_size(item_size, id.len());
                let local = self.allocate_local_object(false, total);
                self.publish_ptr(ds_id, item_size, id, local)
            }
            None => {
                let total = Self::checked_object_size(item_size, 8);
                let remote = self.allocate_remote_object(false, total) as u64;
                let local = self.allocate_local_object(false, total);
                self.publish_ptr(VANILLA_DS_ID, item_size, &remote.to_le_bytes(), local)
            }
        }
    }

    /// Non-blocking form of [`FarMemManager::allocate_generic_far_ptr`].
    pub fn allocate_generic_far_ptr_nb(
        &self,
        ds_id: u8,
        item_size: u16,
        id: Option<&[u8]>,
    ) -> Option<GenericFarPtr> {
        match id {
            Some(id) => {
                assert!(
                    id_fragment(id) < (1 << OBJ_ID_BITS),
                    "object id exceeds the 38-bit id space"
                );
                let total = Self::checked_object_size(item_size, id.len());
                let local = self.allocate_local_object_nb(false, total)?;
                Some(self.publish_ptr(ds_id, item_size, id, local))
            }
            None => {
                let total = Self::checked_object_size(item_size, 8);
                let remote = self.allocate_remote_object_nb(false, total)? as u64;
                let Some(local) = self.allocate_local_object_nb(false, total) else {
                    self.release_remote_object(remote);
                    return None;
                };
                Some(self.publish_ptr(VANILLA_DS_ID, item_size, &remote.to_le_bytes(), local))
            }
        }
    }

    /// Typed vanilla far pointer holding a plain-data `T`.
    pub fn allocate_far_ptr<T: Copy>(&self) -> FarPtr<T> {
        assert!(size_of::<T>() <= MAX_OBJECT_DATA_SIZE as usize);
        let raw = self.allocate_generic_far_ptr(VANILLA_DS_ID, size_of::<T>() as u16, None);
        FarPtr::from_generic(raw)
    }

    pub fn allocate_far_ptr_with<T: Copy>(&self, value: T) -> FarPtr<T> {
        let p = self.allocate_far_ptr::<T>();
        p.write(value);
        p
    }

    // ── Swapping ──────────────────────────────────────────────────────

    /// Bring an absent object back into the cache. Serialised under its id
    /// lock; a racing swap-in simply finds the word present and returns.
    pub(crate) fn swap_in(&self, nt: bool, meta: &PtrMeta) {
        let MetaView::Absent(absent) = meta.decode() else {
            return;
        };
        let _g = self.locker.guard(absent.obj_id);
        // Re-check under the lock: a racing swap-in, or an identity move,
        // may have rewritten the word since the snapshot.
        let MetaView::Absent(current) = meta.decode() else {
            return;
        };
        if current.obj_id != absent.obj_id {
            return;
        }

        let addr = self.allocate_local_object(nt, absent.object_size);
        let obj = Object::new(addr);
        let data_cap = absent.object_size as usize - HEADER_SIZE;
        // SAFETY: the allocation spans the whole declared object size
        let data_buf = unsafe {
            slice::from_raw_parts_mut((addr + HEADER_SIZE) as *mut u8, data_cap)
        };
        let key = absent.obj_id.to_le_bytes();
        let data_len = self
            .device
            .read_object(absent.ds_id, &key, data_buf)
            .expect("far-memory device read");
        let id_len = absent.object_size as usize - HEADER_SIZE - data_len as usize;
        // SAFETY: header and id bytes are within the allocation
        unsafe { obj.init(absent.ds_id, data_len, &key[..id_len]) };
        // SAFETY: header initialized above; publishes the present form
        unsafe { meta.set_present(addr) };
        // SAFETY: addr came from the cache pool
        unsafe { heap::adjust_ref_by_addr(addr, -1) };
        self.notify(absent.ds_id, obj);
    }

    // ── Collection ────────────────────────────────────────────────────

    /// Called from allocation paths: when the free cache runs low, flag the
    /// almost-empty throttle and make sure a collector master is running.
    pub(crate) fn gc_check(&self) {
        if self.is_free_cache_low() {
            scope::ALMOST_EMPTY.store(self.is_free_cache_almost_empty(), Ordering::Relaxed);
            self.launch_gc_master();
        }
    }

    /// Deduplicated collector launch: requests are counted, one master runs.
    pub fn launch_gc_master(&self) {
        self.pending_gcs.fetch_add(1, Ordering::SeqCst);
        if self
            .gc_spawned
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            thread::spawn(|| {
                let m = manager();
                loop {
                    m.pending_gcs.store(0, Ordering::Relaxed);
                    let reclaimed = m.gc_cache();
                    m.gc_far_mem();
                    if reclaimed == 0 || m.pending_gcs.load(Ordering::Relaxed) == 0 {
                        break;
                    }
                }
                m.gc_spawned.store(false, Ordering::SeqCst);
                // A request that raced the exit re-launches from its next
                // allocation attempt.
            });
        }
    }

    /// Block until the almost-empty throttle lifts. Called on scope entry.
    pub(crate) fn mutator_wait_for_gc_cache(&self) {
        let mut guard = self.cache_wait.lock();
        while scope::ALMOST_EMPTY.load(Ordering::Relaxed) {
            if !self.is_free_cache_almost_empty() {
                // The reserve recovered through frees alone; lift the
                // throttle ourselves instead of waiting on a round.
                scope::ALMOST_EMPTY.store(false, Ordering::Relaxed);
                break;
            }
            self.launch_gc_master();
            self.cache_condvar.wait_for(&mut guard, WAIT_RECHECK);
        }
    }

    fn mutator_wait_for_gc_far_mem(&self) {
        self.gc_far_mem();
        if self.far.num_free_regions() > 0 {
            return;
        }
        let mut guard = self.far_wait.lock();
        self.far_condvar.wait_for(&mut guard, WAIT_RECHECK);
    }

    /// One cache collection: rounds of pick → mark → flip → write back →
    /// recycle until the free ratio clears the high threshold. Returns the
    /// number of regions reclaimed.
    fn gc_cache(&self) -> usize {
        let _rounds = self.gc_lock.lock();
        let mut reclaimed = 0;
        while !self.is_free_cache_high() {
            let from = self.pick_from_regions();
            if from.is_empty() {
                break;
            }
            debug!(regions = from.len(), free = self.free_cache_ratio(), "gc round");
            self.mark_pointers(&from);
            let prior = self.start_prioritizing();
            self.drain_prior_phase(prior);
            self.write_back_regions(&from);
            self.stop_prioritizing();
            reclaimed += from.len();
            self.recycle_from_regions(from);
        }
        reclaimed
    }

    /// Pop this round's from-regions off the used pool: at least the 3%
    /// floor, at most 10% of the cache, capped at 128.
    fn pick_from_regions(&self) -> Vec<Region> {
        let total = self.cache.num_regions() as f64;
        let floor = ((total * MIN_RATIO_REGIONS_PER_GC_ROUND) as usize).max(1);
        let quota = ((total * MAX_RATIO_REGIONS_PER_GC_ROUND) as usize)
            .max(floor)
            .min(MAX_REGIONS_PER_GC_ROUND);
        let mut from = Vec::with_capacity(quota);
        while from.len() < quota {
            match self.cache.pop_used_region() {
                Some(region) => from.push(region),
                None => break,
            }
        }
        from
    }

    fn scan_tasks(from: &[Region], sink: &mut heap::TaskSink<'_, ScanRange>) {
        for region in from {
            for b in 0..region.num_boundaries() {
                let (lo, hi) = region.boundary(b);
                sink.push(ScanRange { lo, hi });
            }
        }
    }

    /// Parallel marker: walk every object in the from-regions and raise the
    /// evacuation flag on its metadata word through the back pointer.
    fn mark_pointers(&self, from: &[Region]) {
        self.gc_parallel.execute(
            |sink| Self::scan_tasks(from, sink),
            |_tid, range| {
                if worker::self_status() != Status::Gc {
                    worker::set_status(Status::Gc);
                }
                let mut addr = range.lo;
                while addr < range.hi {
                    let obj = Object::new(addr);
                    // SAFETY: retired regions hold fully initialized objects
                    let size = unsafe { obj.size() } as usize;
                    debug_assert!(addr + size <= range.hi, "scan overran its sub-range");
                    // SAFETY: as above
                    if !unsafe { obj.is_freed() } {
                        // SAFETY: a live object's back pointer targets its
                        // pointer's slot; set_evacuating tolerates the word
                        // having moved on concurrently.
                        let meta = unsafe { PtrMeta::from_addr(obj.back_ptr()) };
                        meta.set_evacuating();
                    }
                    addr += size;
                }
            },
        );
    }

    /// Flip the expected phase. Workers already in a scope keep the prior
    /// status; everyone entering afterwards adopts the new one and cannot
    /// miss the evacuation marks.
    fn start_prioritizing(&self) -> Status {
        let prior = scope::expected_status();
        scope::GC_ACTIVE.store(true, Ordering::SeqCst);
        scope::EXPECTED_STATUS.store(scope::flip(prior) as u8, Ordering::SeqCst);
        prior
    }

    /// Wait for the count of workers still in the prior phase to drain.
    fn drain_prior_phase(&self, prior: Status) {
        while worker::threads_in(prior) > 0 {
            thread::yield_now();
        }
    }

    fn stop_prioritizing(&self) {
        scope::GC_ACTIVE.store(false, Ordering::SeqCst);
    }

    /// Parallel writer: every live, still-resident object in a from-region
    /// is either relocated locally (hot survivors) or pushed to the device
    /// and flipped to the absent form.
    fn write_back_regions(&self, from: &[Region]) {
        self.gc_parallel.execute(
            |sink| Self::scan_tasks(from, sink),
            |_tid, range: ScanRange| {
                if worker::self_status() != Status::Gc {
                    worker::set_status(Status::Gc);
                }
                let mut addr = range.lo;
                while addr < range.hi {
                    let obj = Object::new(addr);
                    // SAFETY: retired regions hold fully initialized objects
                    let size = unsafe { obj.size() } as usize;
                    self.write_back_object(obj);
                    addr += size;
                }
            },
        );
    }

    fn write_back_object(&self, obj: Object) {
        // SAFETY: from-region bytes stay mapped until the round recycles
        // them, and identity transitions happen under the id lock below.
        unsafe {
            if obj.is_freed() {
                return;
            }
            let frag = obj.obj_id_value();
            let _g = self.locker.guard(frag);
            if obj.is_freed() {
                // Freed while we waited for the lock.
                return;
            }
            let meta = PtrMeta::from_addr(obj.back_ptr());
            let MetaView::Present(view) = meta.decode() else {
                return;
            };
            if view.data_addr != obj.data_addr() {
                // A mutator migrated it out of the from-region already.
                return;
            }
            debug_assert!(view.evacuating, "write-back found an unmarked object");

            let ds_id = obj.ds_id();
            let size = obj.size();
            if view.hot {
                let nt = heap::is_nt_addr(obj.addr());
                if let Some(new_addr) = self.allocate_local_object_nb(nt, size) {
                    ptr::copy_nonoverlapping(
                        obj.addr() as *const u8,
                        new_addr as *mut u8,
                        size as usize,
                    );
                    heap::adjust_ref_by_addr(new_addr, -1);
                    meta.gc_copy(new_addr);
                    self.notify(ds_id, Object::new(new_addr));
                    return;
                }
                // No room to keep it local; fall through to write-back.
            }
            if view.dirty {
                let data =
                    slice::from_raw_parts(obj.data_addr() as *const u8, obj.data_len() as usize);
                self.device
                    .write_object(ds_id, &frag.to_le_bytes(), data)
                    .expect("far-memory device write");
            }
            self.notify(ds_id, obj);
            meta.gc_wb(ds_id, size, frag);
        }
    }

    /// Reset drained from-regions and hand them back to the free pool, then
    /// lift the almost-empty throttle if the reserve recovered.
    fn recycle_from_regions(&self, from: Vec<Region>) {
        for region in from {
            // In-flight pins (an unfinished publication, a migration copy)
            // drain quickly; the region cannot be reused under them.
            while !region.is_gcable() {
                thread::yield_now();
            }
            region.clear_ref_cnt();
            self.cache.push_free_region(region);
        }
        if !self.is_free_cache_almost_empty() {
            scope::ALMOST_EMPTY.store(false, Ordering::Relaxed);
        }
        self.cache_condvar.notify_all();
    }

    /// Recycle far regions whose live-object count dropped to zero.
    pub(crate) fn gc_far_mem(&self) {
        let mut keep = Vec::new();
        let mut freed = 0usize;
        while let Some(region) = self.far.pop_used_region() {
            if region.is_gcable() {
                self.far.push_free_region(region);
                freed += 1;
            } else {
                keep.push(region);
            }
        }
        for region in keep {
            self.far.push_used_region(region);
        }
        if freed > 0 {
            debug!(freed, "far regions recycled");
            self.far_condvar.notify_all();
        }
    }

    // ── Container surface ─────────────────────────────────────────────

    /// Register the callback invoked whenever the runtime moves or swaps an
    /// object belonging to `ds_id`.
    pub fn register_notifier(&self, ds_id: u8, notifier: Notifier) {
        *self.notifiers[ds_id as usize].write() = Some(notifier);
    }

    fn notify(&self, ds_id: u8, obj: Object) {
        if let Some(notifier) = &*self.notifiers[ds_id as usize].read() {
            notifier(obj);
        }
    }

    pub fn allocate_ds_id(&self) -> u8 {
        self.ds_ids
            .lock()
            .pop_front()
            .expect("data-structure ids exhausted")
    }

    pub fn free_ds_id(&self, ds_id: u8) {
        assert_ne!(ds_id, VANILLA_DS_ID);
        self.ds_ids.lock().push_back(ds_id);
    }

    /// Coarse by-id lock for container-level critical sections.
    pub fn lock_object(&self, obj_id: &[u8]) {
        let frag = id_fragment(obj_id);
        while !self.locker.try_insert(frag) {
            thread::yield_now();
        }
    }

    pub fn unlock_object(&self, obj_id: &[u8]) {
        self.locker.remove(id_fragment(obj_id));
    }

    // ── Device pass-throughs ──────────────────────────────────────────

    pub fn read_object(
        &self,
        ds_id: u8,
        obj_id: &[u8],
        data_buf: &mut [u8],
    ) -> crate::device::DeviceResult<u16> {
        self.device.read_object(ds_id, obj_id, data_buf)
    }

    pub fn write_object(
        &self,
        ds_id: u8,
        obj_id: &[u8],
        data: &[u8],
    ) -> crate::device::DeviceResult<()> {
        self.device.write_object(ds_id, obj_id, data)
    }

    pub fn remove_object(&self, ds_id: u8, obj_id: &[u8]) -> crate::device::DeviceResult<bool> {
        self.device.remove_object(ds_id, obj_id)
    }

    pub fn construct(&self, ds_type: u8, ds_id: u8, params: &[u8]) -> crate::device::DeviceResult<()> {
        self.device.construct(ds_type, ds_id, params)
    }

    pub fn deconstruct(&self, ds_id: u8) -> crate::device::DeviceResult<()> {
        self.free_ds_id(ds_id);
        self.device.deconstruct(ds_id)
    }

    pub fn compute(
        &self,
        ds_id: u8,
        opcode: u8,
        input: &[u8],
        output: &mut [u8],
    ) -> crate::device::DeviceResult<u16> {
        self.device.compute(ds_id, opcode, input, output)
    }

    pub fn get_prefetch_win_size(&self) -> usize {
        self.device.get_prefetch_win_size()
    }
}
