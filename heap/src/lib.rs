mod parallel;
mod region;
mod ring;
mod system;

pub use parallel::{Parallelizer, TaskSink};
pub use region::{
    GC_PARALLELISM, MAX_CORES, NT_POS, OBJECT_POS, REF_CNT_POS, REGION_SHIFT,
    REGION_SIZE, Region, RegionManager, adjust_ref_by_addr, is_nt_addr,
};
pub use ring::TaskRing;
pub use system::{Mapping, OS_PAGE_SIZE};
