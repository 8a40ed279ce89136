use heap::REGION_SIZE;
use object::OBJ_ID_BITS;

/// Runtime tunables. Sizes are rounded down to whole regions.
#[derive(Debug, Clone)]
pub struct FarMemConfig {
    /// Local DRAM cache, in bytes.
    pub cache_size: usize,
    /// Remote address space backing vanilla far pointers, in bytes.
    pub far_mem_size: usize,
    /// Slaves per parallel collection phase.
    pub num_gc_threads: u32,
    /// Capacity of the metadata slot arena, i.e. the maximum number of live
    /// far pointers.
    pub max_far_ptrs: usize,
}

impl Default for FarMemConfig {
    fn default() -> Self {
        Self {
            cache_size: 128 << 20,
            far_mem_size: 1 << 30,
            num_gc_threads: 2,
            max_far_ptrs: 1 << 20,
        }
    }
}

impl FarMemConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.cache_size < 2 * REGION_SIZE {
            return Err("cache must hold at least two regions");
        }
        if self.far_mem_size < REGION_SIZE {
            return Err("far memory must hold at least one region");
        }
        if self.far_mem_size > 1usize << OBJ_ID_BITS {
            return Err("far memory exceeds the object-id address range");
        }
        if self.num_gc_threads == 0 {
            return Err("at least one collection thread is required");
        }
        if self.max_far_ptrs == 0 {
            return Err("the pointer slot arena cannot be empty");
        }
        Ok(())
    }
}
