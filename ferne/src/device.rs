use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use object::id_fragment;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("object not found (ds {ds_id}, id fragment {fragment:#x})")]
    NotFound { ds_id: u8, fragment: u64 },
    #[error("data buffer too small for object ({needed} > {available})")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("far memory exhausted ({requested} bytes over a {capacity} byte budget)")]
    OutOfSpace { requested: usize, capacity: usize },
    #[error("data structure {0} is not constructed")]
    UnknownDs(u8),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// The remote-storage transport the runtime swaps objects through.
///
/// Object ids shorter than 8 bytes are equivalent to their zero-extended
/// 8-byte form: implementations must treat `[1, 0]` and `[1]` as the same
/// key. The runtime itself always swaps with canonical 8-byte ids.
pub trait FarMemDevice: Send + Sync {
    /// Copy the payload of `(ds_id, obj_id)` into `data_buf`, returning its
    /// length.
    fn read_object(&self, ds_id: u8, obj_id: &[u8], data_buf: &mut [u8]) -> DeviceResult<u16>;

    fn write_object(&self, ds_id: u8, obj_id: &[u8], data: &[u8]) -> DeviceResult<()>;

    /// Returns whether the object existed.
    fn remove_object(&self, ds_id: u8, obj_id: &[u8]) -> DeviceResult<bool>;

    /// Establish a remote container of `ds_type` under `ds_id`.
    fn construct(&self, ds_type: u8, ds_id: u8, params: &[u8]) -> DeviceResult<()>;

    fn deconstruct(&self, ds_id: u8) -> DeviceResult<()>;

    /// Opaque pass-through computation on the remote container. Returns the
    /// number of output bytes written.
    fn compute(&self, ds_id: u8, opcode: u8, input: &[u8], output: &mut [u8])
    -> DeviceResult<u16>;

    fn get_prefetch_win_size(&self) -> usize;
}

/// Sharing a device between the manager and its owner (e.g. a test that
/// wants to inspect the store) is just an `Arc`.
impl<D: FarMemDevice> FarMemDevice for std::sync::Arc<D> {
    fn read_object(&self, ds_id: u8, obj_id: &[u8], data_buf: &mut [u8]) -> DeviceResult<u16> {
        (**self).read_object(ds_id, obj_id, data_buf)
    }

    fn write_object(&self, ds_id: u8, obj_id: &[u8], data: &[u8]) -> DeviceResult<()> {
        (**self).write_object(ds_id, obj_id, data)
    }

    fn remove_object(&self, ds_id: u8, obj_id: &[u8]) -> DeviceResult<bool> {
        (**self).remove_object(ds_id, obj_id)
    }

    fn construct(&self, ds_type: u8, ds_id: u8, params: &[u8]) -> DeviceResult<()> {
        (**self).construct(ds_type, ds_id, params)
    }

    fn deconstruct(&self, ds_id: u8) -> DeviceResult<()> {
        (**self).deconstruct(ds_id)
    }

    fn compute(
        &self,
        ds_id: u8,
        opcode: u8,
        input: &[u8],
        output: &mut [u8],
    ) -> DeviceResult<u16> {
        (**self).compute(ds_id, opcode, input, output)
    }

    fn get_prefetch_win_size(&self) -> usize {
        (**self).get_prefetch_win_size()
    }
}

type ObjKey = (u8, Vec<u8>);

fn canonical_key(ds_id: u8, obj_id: &[u8]) -> ObjKey {
    if obj_id.len() <= 8 {
        (ds_id, id_fragment(obj_id).to_le_bytes().to_vec())
    } else {
        (ds_id, obj_id.to_vec())
    }
}

/// In-process device double backing objects with a concurrent hash map.
///
/// `compute` echoes its input back, which is all the pass-through contract
/// promises. The byte budget models the remote side's capacity.
pub struct FakeDevice {
    store: DashMap<ObjKey, Vec<u8>>,
    ds_types: DashMap<u8, u8>,
    capacity: usize,
    used: AtomicUsize,
    writes: AtomicU64,
    per_key_writes: DashMap<ObjKey, u64>,
}

impl FakeDevice {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: DashMap::new(),
            ds_types: DashMap::new(),
            capacity,
            used: AtomicUsize::new(0),
            writes: AtomicU64::new(0),
            per_key_writes: DashMap::new(),
        }
    }

    /// Total `write_object` calls observed. Test instrumentation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// `write_object` calls for one key. Test instrumentation.
    pub fn write_count_for(&self, ds_id: u8, obj_id: &[u8]) -> u64 {
        self.per_key_writes
            .get(&canonical_key(ds_id, obj_id))
            .map_or(0, |n| *n)
    }

    pub fn object_count(&self) -> usize {
        self.store.len()
    }

    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

impl FarMemDevice for FakeDevice {
    fn read_object(&self, ds_id: u8, obj_id: &[u8], data_buf: &mut [u8]) -> DeviceResult<u16> {
        let key = canonical_key(ds_id, obj_id);
        let entry = self.store.get(&key).ok_or(DeviceError::NotFound {
            ds_id,
            fragment: id_fragment(obj_id),
        })?;
        let data = entry.value();
        if data.len() > data_buf.len() {
            return Err(DeviceError::BufferTooSmall {
                needed: data.len(),
                available: data_buf.len(),
            });
        }
        data_buf[..data.len()].copy_from_slice(data);
        Ok(data.len() as u16)
    }

    fn write_object(&self, ds_id: u8, obj_id: &[u8], data: &[u8]) -> DeviceResult<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        *self
            .per_key_writes
            .entry(canonical_key(ds_id, obj_id))
            .or_insert(0) += 1;
        if self.used.load(Ordering::Relaxed) + data.len() > self.capacity {
            return Err(DeviceError::OutOfSpace {
                requested: data.len(),
                capacity: self.capacity,
            });
        }
        trace!(ds_id, len = data.len(), "device write");
        let prev = self.store.insert(canonical_key(ds_id, obj_id), data.to_vec());
        let prev_len = prev.map_or(0, |v| v.len());
        if data.len() >= prev_len {
            self.used.fetch_add(data.len() - prev_len, Ordering::Relaxed);
        } else {
            self.used.fetch_sub(prev_len - data.len(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn remove_object(&self, ds_id: u8, obj_id: &[u8]) -> DeviceResult<bool> {
        match self.store.remove(&canonical_key(ds_id, obj_id)) {
            Some((_, data)) => {
                self.used.fetch_sub(data.len(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn construct(&self, ds_type: u8, ds_id: u8, _params: &[u8]) -> DeviceResult<()> {
        self.ds_types.insert(ds_id, ds_type);
        Ok(())
    }

    fn deconstruct(&self, ds_id: u8) -> DeviceResult<()> {
        if self.ds_types.remove(&ds_id).is_none() {
            return Err(DeviceError::UnknownDs(ds_id));
        }
        self.store.retain(|(key_ds, _), data| {
            if *key_ds == ds_id {
                self.used.fetch_sub(data.len(), Ordering::Relaxed);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn compute(
        &self,
        _ds_id: u8,
        _opcode: u8,
        input: &[u8],
        output: &mut [u8],
    ) -> DeviceResult<u16> {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        Ok(n as u16)
    }

    fn get_prefetch_win_size(&self) -> usize {
        64 * 1024
    }
}
