use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::worker::{self, Status};

/// The phase every newly entered scope adopts. Flipped by the collector.
pub(crate) static EXPECTED_STATUS: AtomicU8 = AtomicU8::new(Status::InV0 as u8);
/// Whether a collection round is between its phase flip and its end.
pub(crate) static GC_ACTIVE: AtomicBool = AtomicBool::new(false);
/// Set when the free cache drops below the almost-empty threshold; new
/// scopes block until the collector makes progress.
pub(crate) static ALMOST_EMPTY: AtomicBool = AtomicBool::new(false);

#[inline(always)]
pub(crate) fn expected_status() -> Status {
    EXPECTED_STATUS.load(Ordering::SeqCst).into()
}

pub(crate) fn flip(status: Status) -> Status {
    match status {
        Status::InV0 => Status::InV1,
        Status::InV1 => Status::InV0,
        _ => unreachable!("only in-scope phases flip"),
    }
}

/// A bounded interval during which the worker's pinned pointers are
/// guaranteed present. While any worker whose status equals the expected
/// phase is inside a scope, the collector must not treat its own metadata
/// mutations as observed.
///
/// Scopes are strictly per-thread and must not nest.
pub struct DerefScope {
    _not_send: PhantomData<*mut ()>,
}

impl DerefScope {
    pub fn new() -> Self {
        Self::enter();
        DerefScope {
            _not_send: PhantomData,
        }
    }

    /// Whether the calling worker is currently inside a scope.
    #[inline(always)]
    pub fn is_active() -> bool {
        worker::self_status() != Status::Out
    }

    fn enter() {
        assert!(!Self::is_active(), "nested dereference scope");
        if ALMOST_EMPTY.load(Ordering::Relaxed) {
            crate::manager().mutator_wait_for_gc_cache();
        }
        let expected = expected_status();
        worker::set_status(expected);
        worker::count_add(expected, 1);
    }

    fn exit() {
        let old = worker::self_status();
        debug_assert_ne!(old, Status::Out, "scope exit without enter");
        worker::count_add(old, -1);
        worker::set_status(Status::Out);
        if old != expected_status() && GC_ACTIVE.load(Ordering::Relaxed) {
            // This worker was the phase the collector is draining; step
            // aside so the collector thread can run.
            std::thread::yield_now();
        }
    }
}

impl Default for DerefScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DerefScope {
    fn drop(&mut self) {
        Self::exit();
    }
}
