//! Runtime of an application-integrated far-memory cache.
//!
//! Applications hold far pointers to objects that live either in the local
//! DRAM cache (as raw region memory) or remotely, addressed only by id.
//! A worker opens a [`DerefScope`] before touching a pointer; inside the
//! scope, dereferenced objects are guaranteed resident. Outside of scopes
//! the collector is free to migrate, evict, and reclaim.
//!
//! The crate splits into the metadata word and object layout (`object`),
//! the region pools and parallel task plumbing (`heap`), and the runtime
//! proper here: scopes, the per-object lock table, far pointers with their
//! one-load dereference fast path, and the collector that swaps cold
//! objects out through a [`FarMemDevice`].

mod config;
mod device;
mod locker;
mod manager;
mod ptr;
mod scope;
mod slots;
mod worker;

pub use config::FarMemConfig;
pub use device::{DeviceError, DeviceResult, FakeDevice, FarMemDevice};
pub use locker::{LOCKER_SHARDS, ObjLockGuard, ObjLocker};
pub use manager::{FarMemManager, Notifier, VANILLA_DS_ID, manager};
pub use ptr::{FarPtr, GenericFarPtr};
pub use scope::DerefScope;
pub use slots::MetaSlab;
pub use worker::Status;

pub use object::{
    HEADER_SIZE, HOT_THRESHOLD, MAX_OBJECT_DATA_SIZE, MetaView, Object,
    id_fragment,
};
